// relay-core/src/application/scheduler.rs
//
// One long-lived loop: every 60 s, read all pipelines and trigger the
// ones whose cadence is due. Dispatched runs execute in the background;
// the timestamp only advances after a successful dispatch, so a failed
// tick retries on the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{error, info, warn};

use crate::application::engine::PipelineEngine;
use crate::domain::naming::short_id;
use crate::domain::pipeline::{Pipeline, ScheduleInterval};
use crate::error::RelayError;
use crate::infrastructure::store::Store;

pub struct PipelineScheduler {
    store: Arc<Store>,
    engine: Arc<PipelineEngine>,
    tick_interval: Duration,
}

impl PipelineScheduler {
    pub fn new(store: Arc<Store>, engine: Arc<PipelineEngine>) -> Self {
        Self {
            store,
            engine,
            tick_interval: Duration::from_secs(60),
        }
    }

    /// Run the sweep loop until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        info!("pipeline scheduler started");
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick(Utc::now()).await {
                error!(error = %e, "scheduler tick failed");
            }
        }
    }

    /// One sweep: flag stuck runs, then dispatch every due pipeline.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(), RelayError> {
        // crash-safety: a row stuck in `running` is an operator signal,
        // never rolled forward
        for stale in self
            .store
            .stale_running_runs(now - ChronoDuration::hours(1))
            .await?
        {
            warn!(
                run_id = %stale.run_id,
                pipeline_id = %stale.pipeline_id,
                started_at = %stale.started_at,
                "run has been in 'running' state for over an hour"
            );
        }

        for pipeline in self.store.list_pipelines().await? {
            if !pipeline.schedule.enabled || !should_run(&pipeline, now) {
                continue;
            }

            let run_id = short_id("run");
            info!(pipeline_id = %pipeline.id, run_id = %run_id, "triggering scheduled run");
            let engine = self.engine.clone();
            let pipeline_id = pipeline.id.clone();
            let spawned_run_id = run_id.clone();
            tokio::spawn(async move {
                engine.execute(&pipeline_id, &spawned_run_id).await;
            });

            // Only after a successful dispatch; a failure here leaves the
            // timestamp behind and the next tick retries.
            self.store.set_last_scheduled_run(&pipeline.id, now).await?;
        }
        Ok(())
    }
}

fn cadence(interval: ScheduleInterval) -> ChronoDuration {
    match interval {
        ScheduleInterval::Hourly => ChronoDuration::hours(1),
        ScheduleInterval::Daily => ChronoDuration::hours(24),
        ScheduleInterval::Weekly => ChronoDuration::days(7),
        // custom expressions execute as daily until a cron parser lands
        ScheduleInterval::Custom => ChronoDuration::hours(24),
    }
}

/// Is this pipeline due? Never-run pipelines run immediately.
pub fn should_run(pipeline: &Pipeline, now: DateTime<Utc>) -> bool {
    match pipeline.last_scheduled_run {
        None => true,
        Some(last) => now - last >= cadence(pipeline.schedule.interval),
    }
}

/// Next fire time for display; None when scheduling is disabled.
pub fn next_run_time(pipeline: &Pipeline) -> Option<DateTime<Utc>> {
    if !pipeline.schedule.enabled {
        return None;
    }
    match pipeline.last_scheduled_run {
        None => Some(Utc::now()),
        Some(last) => Some(last + cadence(pipeline.schedule.interval)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{
        PipelineKind, PipelineOptions, ScheduleConfig, ScheduleInterval,
    };

    fn scheduled(interval: ScheduleInterval, last: Option<DateTime<Utc>>) -> Pipeline {
        Pipeline {
            id: "pipe-1".into(),
            name: "P".into(),
            description: String::new(),
            kind: PipelineKind::Regular,
            status: "active".into(),
            source: None,
            destination: None,
            options: PipelineOptions::default(),
            schedule: ScheduleConfig {
                enabled: true,
                interval,
                expression: None,
                timezone: None,
            },
            transformation: None,
            last_scheduled_run: last,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_never_run_is_due_immediately() {
        let pipeline = scheduled(ScheduleInterval::Weekly, None);
        assert!(should_run(&pipeline, Utc::now()));
    }

    #[test]
    fn test_hourly_cadence() {
        let now = Utc::now();
        let fresh = scheduled(ScheduleInterval::Hourly, Some(now - ChronoDuration::minutes(30)));
        let stale = scheduled(ScheduleInterval::Hourly, Some(now - ChronoDuration::minutes(61)));
        assert!(!should_run(&fresh, now));
        assert!(should_run(&stale, now));
    }

    #[test]
    fn test_custom_runs_as_daily() {
        let now = Utc::now();
        let fresh = scheduled(ScheduleInterval::Custom, Some(now - ChronoDuration::hours(23)));
        let stale = scheduled(ScheduleInterval::Custom, Some(now - ChronoDuration::hours(25)));
        assert!(!should_run(&fresh, now));
        assert!(should_run(&stale, now));
    }

    #[test]
    fn test_next_run_time_disabled_is_none() {
        let mut pipeline = scheduled(ScheduleInterval::Daily, None);
        pipeline.schedule.enabled = false;
        assert!(next_run_time(&pipeline).is_none());
    }
}
