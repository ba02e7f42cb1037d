use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::application::reconciler::Reconciler;
use crate::domain::clock::SharedClock;
use crate::domain::error::{ApiError, ControllerError};
use crate::domain::model::quota::next_reset;
use crate::domain::model::{AdmissionState, BlockReason, CredentialPresence, QuotaState};
use crate::domain::worker_api::WorkerApiHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Block(BlockReason),
}

/// Credential check first, then quota.
///
/// Unknown credentials are let through (the server still enforces them); an
/// unknown quota is treated as exhausted.
pub fn decide(
    credentials: CredentialPresence,
    quota: Option<&QuotaState>,
    now: NaiveDateTime,
) -> GateDecision {
    if credentials == CredentialPresence::Missing {
        return GateDecision::Block(BlockReason::CredentialsMissing);
    }

    match quota {
        Some(quota) if !quota.is_exhausted() => GateDecision::Admit,
        _ => GateDecision::Block(BlockReason::QuotaExceeded {
            resume_at: next_reset(now),
        }),
    }
}

/// Admission control in front of the start command
pub struct AdmissionGate {
    api: WorkerApiHandle,
    reconciler: Arc<Reconciler>,
    clock: SharedClock,
    request_timeout: Duration,
}

impl AdmissionGate {
    pub fn new(
        api: WorkerApiHandle,
        reconciler: Arc<Reconciler>,
        clock: SharedClock,
        request_timeout: Duration,
    ) -> Self {
        Self {
            api,
            reconciler,
            clock,
            request_timeout,
        }
    }

    /// Walk the gate, resolving unknown inputs from the backend.
    ///
    /// Only an authorization failure is returned as an error.
    pub async fn evaluate(&self) -> Result<GateDecision, ControllerError> {
        self.reconciler.set_admission(AdmissionState::CredentialCheck);
        let mut credentials = self.reconciler.snapshot().credentials;
        if credentials == CredentialPresence::Unknown {
            credentials = self.resolve_credentials().await?;
        }
        if credentials == CredentialPresence::Missing {
            return Ok(GateDecision::Block(BlockReason::CredentialsMissing));
        }

        self.reconciler.set_admission(AdmissionState::QuotaCheck);
        let mut quota = self.reconciler.snapshot().quota;
        if quota.is_none() {
            quota = self.resolve_quota().await?;
        }

        Ok(decide(credentials, quota.as_ref(), self.clock.local_now()))
    }

    async fn resolve_credentials(&self) -> Result<CredentialPresence, ControllerError> {
        let result = tokio::time::timeout(self.request_timeout, self.api.credentials_configured())
            .await
            .unwrap_or(Err(ApiError::Timeout));

        match result {
            Ok(configured) => {
                let presence = if configured {
                    CredentialPresence::Present
                } else {
                    CredentialPresence::Missing
                };
                self.reconciler.set_credentials(presence);
                Ok(presence)
            }
            Err(ApiError::Unauthorized) => Err(ApiError::Unauthorized.into()),
            Err(err) => {
                tracing::warn!(error = %err, "Could not check credentials, deferring to the server");
                Ok(CredentialPresence::Unknown)
            }
        }
    }

    async fn resolve_quota(&self) -> Result<Option<QuotaState>, ControllerError> {
        let result = tokio::time::timeout(self.request_timeout, self.api.quota_status())
            .await
            .unwrap_or(Err(ApiError::Timeout));

        match result {
            Ok(quota) => {
                self.reconciler.apply_quota(quota.clone(), None);
                Ok(Some(quota))
            }
            Err(ApiError::Unauthorized) => Err(ApiError::Unauthorized.into()),
            Err(err) => {
                tracing::warn!(error = %err, "Quota unavailable, treating as exhausted");
                Ok(None)
            }
        }
    }
}
