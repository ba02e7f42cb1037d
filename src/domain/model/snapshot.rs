use serde::{Deserialize, Serialize};

use super::{
    ActionRecord, AdmissionState, ApplicationRecord, ApplicationSummary, CredentialPresence,
    QuotaState, WorkerSession,
};

/// Connectivity to the backend as seen by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Online,
    /// Shown as a transient banner; never changes the session itself
    Degraded { consecutive_failures: u32 },
}

/// Lifecycle of the controller instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    #[default]
    Active,
    /// Backend answered 401; timers are halted until re-authentication
    SessionInvalid,
    TornDown,
}

/// Consistent read-only view of the controller state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ControllerSnapshot {
    pub session: WorkerSession,
    pub quota: Option<QuotaState>,
    pub admission: AdmissionState,
    pub credentials: CredentialPresence,
    pub connectivity: Connectivity,
    pub applications: Vec<ApplicationRecord>,
    pub application_summary: ApplicationSummary,
    pub last_action: Option<ActionRecord>,
    /// Set after an ambiguous action outcome; cleared by the next successful
    /// status poll
    pub needs_refresh: bool,
    pub phase: ControllerPhase,
}

impl ControllerSnapshot {
    pub fn quota_exhausted(&self) -> bool {
        self.quota.as_ref().map(QuotaState::is_exhausted).unwrap_or(true)
    }
}
