use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Process-local counters for workflow activity
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    pub decisions: AtomicU64,
    pub approvals: AtomicU64,
    pub rejections: AtomicU64,
    pub completions: AtomicU64,
    pub concurrent_conflicts: AtomicU64,
    pub transaction_failures: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_failed: AtomicU64,
    pub monitor_ticks: AtomicU64,
    pub monitor_failures: AtomicU64,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decision(&self) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_approval(&self) {
        self.approvals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.concurrent_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_failure(&self) {
        self.transaction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failure(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_monitor_tick(&self, failed: bool) {
        self.monitor_ticks.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.monitor_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_stats(&self) -> WorkflowStats {
        WorkflowStats {
            decisions: self.decisions.load(Ordering::Relaxed),
            approvals: self.approvals.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            concurrent_conflicts: self.concurrent_conflicts.load(Ordering::Relaxed),
            transaction_failures: self.transaction_failures.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            monitor_ticks: self.monitor_ticks.load(Ordering::Relaxed),
            monitor_failures: self.monitor_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            decisions = stats.decisions,
            approvals = stats.approvals,
            rejections = stats.rejections,
            completions = stats.completions,
            conflicts = stats.concurrent_conflicts,
            transaction_failures = stats.transaction_failures,
            notifications_sent = stats.notifications_sent,
            notifications_failed = stats.notifications_failed,
            monitor_ticks = stats.monitor_ticks,
            monitor_failures = stats.monitor_failures,
            "Workflow metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStats {
    pub decisions: u64,
    pub approvals: u64,
    pub rejections: u64,
    pub completions: u64,
    pub concurrent_conflicts: u64,
    pub transaction_failures: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub monitor_ticks: u64,
    pub monitor_failures: u64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = WorkflowMetrics::new();
        metrics.record_decision();
        metrics.record_decision();
        metrics.record_approval();
        metrics.record_monitor_tick(true);
        metrics.record_monitor_tick(false);

        let stats = metrics.get_stats();
        assert_eq!(stats.decisions, 2);
        assert_eq!(stats.approvals, 1);
        assert_eq!(stats.rejections, 0);
        assert_eq!(stats.monitor_ticks, 2);
        assert_eq!(stats.monitor_failures, 1);
    }
}
