// relay/src/commands/scheduler.rs
//
// USE CASE: run the schedule sweep loop in the foreground.

use std::sync::Arc;

use relay_core::application::service::RelayService;

pub async fn execute(service: &RelayService) -> anyhow::Result<()> {
    println!("⏰ Scheduler running (checks every 60s). Ctrl-C to stop.");
    let scheduler = Arc::new(service.scheduler());
    scheduler.run().await;
    Ok(())
}
