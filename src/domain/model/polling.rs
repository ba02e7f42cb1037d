use std::time::Duration;

use super::WorkerStatus;

/// Derived polling cadence; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    pub running_interval: Duration,
    pub idle_interval: Duration,
    /// Used while the countdown has asked for tighter polling near the
    /// predicted reset
    pub near_reset_interval: Duration,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            running_interval: Duration::from_millis(5_000),
            idle_interval: Duration::from_millis(30_000),
            near_reset_interval: Duration::from_millis(5_000),
        }
    }
}

impl PollingPolicy {
    pub fn interval_for(&self, status: WorkerStatus, near_reset: bool) -> Duration {
        let base = if status == WorkerStatus::Running {
            self.running_interval
        } else {
            self.idle_interval
        };
        if near_reset {
            base.min(self.near_reset_interval)
        } else {
            base
        }
    }
}
