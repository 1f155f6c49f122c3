//! Scheduled monitor: periodic scans that emit reminders and retry deliveries.
//!
//! The scheduler is constructed explicitly by the composition root and owns
//! one task per job. `start()` hands back a [`MonitorHandle`]; stopping it
//! lets running ticks finish before the tasks exit.

pub mod jobs;

pub use jobs::{JobReport, MonitorContext, MonitorError, MonitorJob};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, Instrument};

use crate::observability::WorkflowMetrics;
use crate::store::WorkflowStore;
use crate::telemetry::create_monitor_span;

pub struct MonitorScheduler<S: WorkflowStore> {
    context: Arc<MonitorContext<S>>,
    metrics: Arc<WorkflowMetrics>,
}

impl<S: WorkflowStore> MonitorScheduler<S> {
    pub fn new(context: Arc<MonitorContext<S>>, metrics: Arc<WorkflowMetrics>) -> Self {
        Self { context, metrics }
    }

    /// Run one job now, logging and counting the result.
    pub async fn run_once(&self, job: MonitorJob) -> Result<JobReport, MonitorError> {
        run_tick(&self.context, &self.metrics, job).await
    }

    /// Spawn one ticking task per job. The first tick of each job fires one
    /// interval after start.
    pub fn start(&self) -> MonitorHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(MonitorJob::ALL.len());

        for job in MonitorJob::ALL {
            let seconds = job.interval_seconds(self.context.config()).max(1);
            let period = Duration::from_secs(seconds);
            let context = self.context.clone();
            let metrics = self.metrics.clone();
            let mut stop = stop_rx.clone();

            tasks.push(tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            // Errors are logged inside; the next tick rescans.
                            let _ = run_tick(&context, &metrics, job).await;
                        }
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
            info!(job = %job, interval_seconds = seconds, "Monitor job scheduled");
        }

        MonitorHandle {
            stop: stop_tx,
            tasks,
        }
    }
}

async fn run_tick<S: WorkflowStore>(
    context: &MonitorContext<S>,
    metrics: &WorkflowMetrics,
    job: MonitorJob,
) -> Result<JobReport, MonitorError> {
    let span = create_monitor_span(job.as_str());
    let result = context.run(job, Utc::now()).instrument(span).await;
    match &result {
        Ok(report) => {
            metrics.record_monitor_tick(false);
            info!(
                job = %job,
                examined = report.examined,
                notified = report.notified,
                "Monitor tick finished"
            );
        }
        Err(err) => {
            metrics.record_monitor_tick(true);
            error!(job = %job, error = %err, "Monitor tick failed");
        }
    }
    result
}

/// Running monitor tasks.
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal every job to stop and wait for them to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Monitor task ended abnormally");
            }
        }
        info!("Monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, NotificationConfig};
    use crate::notifications::{NotificationDispatcher, RecordingEmailSender};
    use crate::store::MemoryStore;

    fn scheduler(config: MonitorConfig) -> (MonitorScheduler<MemoryStore>, Arc<WorkflowMetrics>) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(WorkflowMetrics::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            Arc::new(RecordingEmailSender::new()),
            NotificationConfig::default(),
            metrics.clone(),
        ));
        let context = Arc::new(MonitorContext::new(store, dispatcher, config));
        (MonitorScheduler::new(context, metrics.clone()), metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_tick_on_their_intervals_until_stopped() {
        let config = MonitorConfig {
            delivery_retry_interval_seconds: 60,
            approval_reminder_interval_seconds: 120,
            obligation_scan_interval_seconds: 3600,
            escalation_interval_seconds: 7200,
            ..MonitorConfig::default()
        };
        let (scheduler, metrics) = scheduler(config);
        let handle = scheduler.start();

        tokio::time::sleep(Duration::from_secs(130)).await;
        let ticks = metrics.get_stats().monitor_ticks;
        // Delivery retry at 60s and 120s, reminders at 120s.
        assert_eq!(ticks, 3);

        handle.stop().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(metrics.get_stats().monitor_ticks, ticks);
        assert_eq!(metrics.get_stats().monitor_failures, 0);
    }

    #[tokio::test]
    async fn run_once_counts_the_tick() {
        let (scheduler, metrics) = scheduler(MonitorConfig::default());
        let report = scheduler.run_once(MonitorJob::DeliveryRetry).await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(metrics.get_stats().monitor_ticks, 1);
    }
}
