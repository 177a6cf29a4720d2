// relay-core/src/infrastructure/config.rs
//
// Environment-loaded settings, read once at startup and dependency-
// injected everywhere. No process globals.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::error::InfrastructureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    S3,
    Local,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub storage_mode: StorageMode,
    pub local_storage_path: PathBuf,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    /// Base64 of 32 key bytes; validated lazily at first use.
    pub encryption_key: Option<String>,
    pub require_auth: bool,
    pub anthropic_api_key: Option<String>,
    pub fetch_timeout: Duration,
    pub connection_test_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://relay.db?mode=rwc".to_string(),
            storage_mode: StorageMode::Local,
            local_storage_path: PathBuf::from("./relay-data"),
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-west-1".to_string(),
            encryption_key: None,
            require_auth: false,
            anthropic_api_key: None,
            fetch_timeout: Duration::from_secs(30),
            connection_test_timeout: Duration::from_secs(10),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, InfrastructureError> {
        let mut settings = Settings::default();

        if let Ok(v) = env::var("DATABASE_URL") {
            settings.database_url = v;
        }
        if let Ok(v) = env::var("STORAGE_MODE") {
            settings.storage_mode = match v.to_lowercase().as_str() {
                "s3" => StorageMode::S3,
                "local" => StorageMode::Local,
                other => {
                    return Err(InfrastructureError::Config(format!(
                        "STORAGE_MODE must be 's3' or 'local', got '{other}'"
                    )));
                }
            };
        }
        if let Ok(v) = env::var("LOCAL_STORAGE_PATH") {
            settings.local_storage_path = PathBuf::from(v);
        }
        settings.aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty());
        settings.aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY")
            .ok()
            .filter(|v| !v.is_empty());
        if let Ok(v) = env::var("AWS_DEFAULT_REGION") {
            settings.aws_region = v;
        }
        settings.encryption_key = env::var("ENCRYPTION_KEY").ok().filter(|v| !v.is_empty());
        if let Ok(v) = env::var("REQUIRE_AUTH") {
            settings.require_auth = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        settings.anthropic_api_key = env::var("ANTHROPIC_API_KEY").ok().filter(|v| !v.is_empty());
        if let Some(secs) = read_secs("RELAY_FETCH_TIMEOUT_SECS")? {
            settings.fetch_timeout = secs;
        }
        if let Some(secs) = read_secs("RELAY_TEST_TIMEOUT_SECS")? {
            settings.connection_test_timeout = secs;
        }

        Ok(settings)
    }
}

fn read_secs(var: &str) -> Result<Option<Duration>, InfrastructureError> {
    match env::var(var) {
        Ok(v) => {
            let secs: u64 = v
                .parse()
                .map_err(|_| InfrastructureError::Config(format!("{var} must be an integer")))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}
