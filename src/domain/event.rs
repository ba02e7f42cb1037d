use serde::{Deserialize, Serialize};

use super::model::{
    ActionKind, ActionOutcome, AdmissionState, ApplicationSummary, Connectivity, QuotaState,
    ResetCountdown, WorkerSession, WorkerStatus,
};

/// Where a session write came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    Poll,
    Optimistic,
    Rollback,
    Reset,
}

/// Domain events that represent state changes in the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// Session snapshot replaced
    SessionUpdated {
        session: WorkerSession,
        source: SessionSource,
    },

    /// Authoritative running -> terminal transition observed
    RunFinished { status: WorkerStatus },

    /// Quota snapshot received from the server
    QuotaUpdated { quota: QuotaState },

    /// Admission gate state changed
    AdmissionChanged {
        old_state: AdmissionState,
        new_state: AdmissionState,
    },

    /// A quota block cleared after the server reported spare capacity
    QuotaRestored { quota: QuotaState },

    /// Application list re-fetched
    ApplicationsRefreshed { summary: ApplicationSummary },

    /// Poll connectivity changed (transient banner)
    ConnectivityChanged { connectivity: Connectivity },

    /// A user action settled
    ActionSettled {
        kind: ActionKind,
        outcome: ActionOutcome,
    },

    /// One-second countdown tick
    CountdownTick {
        countdown: ResetCountdown,
        quota_exhausted: bool,
    },

    /// Predicted reset is within the lead window
    ResetImminent { countdown: ResetCountdown },

    /// Backend answered 401; controller halted
    SessionInvalidated,

    /// Controller torn down
    ControllerStopped,
}

impl DomainEvent {
    /// Get the event type name for consumers that route by name
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionUpdated { .. } => "session_updated",
            Self::RunFinished { .. } => "run_finished",
            Self::QuotaUpdated { .. } => "quota_updated",
            Self::AdmissionChanged { .. } => "admission_changed",
            Self::QuotaRestored { .. } => "quota_restored",
            Self::ApplicationsRefreshed { .. } => "applications_refreshed",
            Self::ConnectivityChanged { .. } => "connectivity_changed",
            Self::ActionSettled { .. } => "action_settled",
            Self::CountdownTick { .. } => "countdown_tick",
            Self::ResetImminent { .. } => "reset_imminent",
            Self::SessionInvalidated => "session_invalidated",
            Self::ControllerStopped => "controller_stopped",
        }
    }
}
