use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::BlockReason;

/// User-initiated command kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Start,
    Stop,
    Reset,
    SaveCredentials,
}

/// Typed rejection codes understood by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    QuotaExceeded,
    CredentialsMissing,
    Busy,
    #[serde(other)]
    Unrecognized,
}

/// Server reply to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Accepted,
    Rejected {
        code: Option<RejectionCode>,
        message: String,
    },
}

/// What the user should do about a failed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Remediation {
    WaitForReset { resume_at: NaiveDateTime },
    SupplyCredentials,
    RetryLater,
    Refresh,
}

/// Outcome of a single start/stop/reset request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Optimistic transition applied and confirmed by the server
    Accepted,
    /// Refused by the admission gate; no command was sent
    Blocked { reason: BlockReason },
    /// Refused by the server or by the in-flight guard; prior state restored
    Rejected {
        code: Option<RejectionCode>,
        message: String,
    },
    /// Response lost; state neither committed nor rolled back
    Unknown { message: String },
}

impl ActionOutcome {
    pub fn busy(kind: ActionKind) -> Self {
        Self::Rejected {
            code: Some(RejectionCode::Busy),
            message: format!("a {} request is already in flight", kind.as_str()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Accepted => None,
            Self::Blocked { reason } => Some(reason.remediation()),
            Self::Rejected { code, .. } => match code {
                Some(RejectionCode::Busy) => Some(Remediation::RetryLater),
                Some(RejectionCode::CredentialsMissing) => Some(Remediation::SupplyCredentials),
                // The server does not tell us when its quota resets; the
                // admission state carries the predicted reset instead
                Some(RejectionCode::QuotaExceeded) => Some(Remediation::RetryLater),
                Some(RejectionCode::Unrecognized) | None => None,
            },
            Self::Unknown { .. } => Some(Remediation::Refresh),
        }
    }
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::SaveCredentials => "save-credentials",
        }
    }
}

/// Record of the most recent settled action, kept in the snapshot for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Ulid,
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
    pub settled_at: DateTime<Utc>,
}
