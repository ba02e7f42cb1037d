use serde::{Deserialize, Serialize};

/// User settings stored in settings.yaml in user config directory.
/// All fields are optional - missing values use the embedded defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserSettings {
    pub backend: BackendOverride,

    /// Restart the worker automatically when a quota block clears
    pub auto_resume: Option<bool>,

    /// Write a rolling log file and log at info level
    pub production_logging: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BackendOverride {
    pub base_url: Option<String>,
    /// Bearer token; `AUTOAPPLY_TOKEN` takes precedence
    pub token: Option<String>,
}
