// Binary smoke tests: the CLI wires the service up and answers the
// discovery surface without any state prepared.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn relay(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("relay").expect("relay binary builds");
    let db_path = tmp.path().join("relay.db");
    cmd.env("DATABASE_URL", format!("sqlite://{}?mode=rwc", db_path.display()))
        .env("LOCAL_STORAGE_PATH", tmp.path().join("blobs"))
        .env("STORAGE_MODE", "local")
        .env("REQUIRE_AUTH", "false");
    cmd
}

#[test]
fn test_health_reports_service() {
    let tmp = tempfile::tempdir().expect("tempdir");
    relay(&tmp)
        .arg("health")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"service\": \"relay\""));
}

#[test]
fn test_capabilities_lists_sources() {
    let tmp = tempfile::tempdir().expect("tempdir");
    relay(&tmp)
        .arg("capabilities")
        .assert()
        .success()
        .stdout(predicate::str::contains("synthetic"))
        .stdout(predicate::str::contains("csv_url"))
        .stdout(predicate::str::contains("ontology_workflow"));
}

#[test]
fn test_pipeline_list_empty() {
    let tmp = tempfile::tempdir().expect("tempdir");
    relay(&tmp)
        .args(["pipeline", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 pipeline(s)"));
}

#[test]
fn test_unknown_proposal_review_fails_cleanly() {
    let tmp = tempfile::tempdir().expect("tempdir");
    relay(&tmp)
        .args(["ontology", "review", "prop-missing", "--approve"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
