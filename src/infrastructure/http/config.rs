//! Backend connection settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the dashboard API, without a trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent on every request
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,

    /// How many recent applications to fetch
    #[serde(default = "default_application_limit")]
    pub application_limit: usize,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_request_timeout_sec() -> u64 {
    10
}

fn default_application_limit() -> usize {
    20
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            request_timeout_sec: default_request_timeout_sec(),
            application_limit: default_application_limit(),
        }
    }
}

impl BackendConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_sec", &self.request_timeout_sec)
            .field("application_limit", &self.application_limit)
            .finish()
    }
}
