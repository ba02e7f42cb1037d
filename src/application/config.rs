use std::time::Duration;

use crate::domain::model::PollingPolicy;

/// Steps shown in the placeholder session until the worker reports its own
pub const DEFAULT_INITIAL_STEPS: &[&str] = &[
    "Initializing",
    "Logging in",
    "Searching jobs",
    "Applying",
    "Finalizing",
];

/// Runtime settings for one controller instance
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub polling: PollingPolicy,
    /// Upper bound for any single backend request
    pub request_timeout: Duration,
    /// Consecutive poll failures before the connectivity banner shows
    pub failure_threshold: u32,
    pub application_limit: usize,
    /// How long before the predicted reset the countdown tightens polling
    pub near_reset_lead: Duration,
    /// How long tightened polling lasts once requested
    pub near_reset_window: Duration,
    pub countdown_tick: Duration,
    /// Start the worker again when a quota block clears
    pub auto_resume: bool,
    pub initial_steps: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            polling: PollingPolicy::default(),
            request_timeout: Duration::from_secs(10),
            failure_threshold: 3,
            application_limit: 20,
            near_reset_lead: Duration::from_secs(60),
            near_reset_window: Duration::from_secs(180),
            countdown_tick: Duration::from_secs(1),
            auto_resume: true,
            initial_steps: DEFAULT_INITIAL_STEPS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
