use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::settings::UserSettings;
use crate::application::config::{ControllerConfig, DEFAULT_INITIAL_STEPS};
use crate::domain::error::ConfigError;
use crate::domain::model::PollingPolicy;
use crate::infrastructure::http::BackendConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub polling: PollingConfig,
    pub controller: ControllerSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub running_interval_ms: u64,
    pub idle_interval_ms: u64,
    /// Cadence while the countdown has asked for tighter polling
    pub near_reset_interval_ms: u64,
    pub near_reset_lead_sec: u64,
    pub near_reset_window_sec: u64,
    /// Consecutive failures before the connectivity banner shows
    pub failure_threshold: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            running_interval_ms: 5_000,
            idle_interval_ms: 30_000,
            near_reset_interval_ms: 5_000,
            near_reset_lead_sec: 60,
            near_reset_window_sec: 180,
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    pub auto_resume: bool,
    pub initial_steps: Vec<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            auto_resume: true,
            initial_steps: DEFAULT_INITIAL_STEPS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Info-level console plus a daily rolling log file
    pub production: bool,
}

impl AppConfig {
    /// Layer user settings over the embedded defaults.
    pub fn apply_settings(&mut self, settings: &UserSettings) {
        if let Some(base_url) = &settings.backend.base_url {
            self.backend.base_url = base_url.clone();
        }
        if let Some(token) = &settings.backend.token {
            self.backend.token = Some(token.clone());
        }
        if let Some(auto_resume) = settings.auto_resume {
            self.controller.auto_resume = auto_resume;
        }
        if let Some(production) = settings.production_logging {
            self.logging.production = production;
        }
    }

    /// A token from the environment wins over the settings file.
    pub fn apply_env_token(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.backend.token = Some(token.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.backend.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "backend.base_url must be an http(s) URL, got {:?}",
                self.backend.base_url
            )));
        }
        if self.backend.request_timeout_sec == 0 {
            return Err(ConfigError::Invalid(
                "backend.request_timeout_sec must be positive".into(),
            ));
        }
        let p = &self.polling;
        if p.running_interval_ms == 0 || p.idle_interval_ms == 0 || p.near_reset_interval_ms == 0 {
            return Err(ConfigError::Invalid("polling intervals must be positive".into()));
        }
        if self.controller.initial_steps.is_empty() {
            return Err(ConfigError::Invalid(
                "controller.initial_steps must name at least one step".into(),
            ));
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            polling: PollingPolicy {
                running_interval: Duration::from_millis(self.polling.running_interval_ms),
                idle_interval: Duration::from_millis(self.polling.idle_interval_ms),
                near_reset_interval: Duration::from_millis(self.polling.near_reset_interval_ms),
            },
            request_timeout: self.backend.request_timeout(),
            failure_threshold: self.polling.failure_threshold,
            application_limit: self.backend.application_limit,
            near_reset_lead: Duration::from_secs(self.polling.near_reset_lead_sec),
            near_reset_window: Duration::from_secs(self.polling.near_reset_window_sec),
            auto_resume: self.controller.auto_resume,
            initial_steps: self.controller.initial_steps.clone(),
            ..ControllerConfig::default()
        }
    }
}
