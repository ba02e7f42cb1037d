use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Remediation;

/// Why the admission gate refused a start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    CredentialsMissing,
    QuotaExceeded { resume_at: NaiveDateTime },
}

impl BlockReason {
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::CredentialsMissing => Remediation::SupplyCredentials,
            Self::QuotaExceeded { resume_at } => Remediation::WaitForReset {
                resume_at: *resume_at,
            },
        }
    }

    /// Human readable reason for display
    pub fn describe(&self) -> String {
        match self {
            Self::CredentialsMissing => "Job board credentials are missing".to_string(),
            Self::QuotaExceeded { resume_at } => {
                format!("Daily application limit reached; resumes at {}", resume_at.format("%H:%M"))
            }
        }
    }
}

/// Admission gate state for the start command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AdmissionState {
    #[default]
    Idle,
    CredentialCheck,
    QuotaCheck,
    Dispatching,
    Blocked { reason: BlockReason },
}

impl AdmissionState {
    pub fn is_quota_blocked(&self) -> bool {
        matches!(
            self,
            Self::Blocked {
                reason: BlockReason::QuotaExceeded { .. }
            }
        )
    }

    pub fn is_credentials_blocked(&self) -> bool {
        matches!(
            self,
            Self::Blocked {
                reason: BlockReason::CredentialsMissing
            }
        )
    }
}

/// Whether the user has stored job board credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPresence {
    #[default]
    Unknown,
    Present,
    Missing,
}
