//! User commands with optimistic transitions.
//!
//! At most one request per command kind is in flight. Each command settles
//! into an [`ActionOutcome`] that is also recorded in the snapshot.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::application::config::ControllerConfig;
use crate::application::gate::{AdmissionGate, GateDecision};
use crate::application::poller::PollerHandle;
use crate::application::reconciler::Reconciler;
use crate::domain::clock::SharedClock;
use crate::domain::error::{ApiError, ControllerError};
use crate::domain::model::quota::next_reset;
use crate::domain::model::{
    ActionKind, ActionOutcome, AdmissionState, BlockReason, CommandReply, ControllerPhase,
    CredentialPresence, RejectionCode, WorkerSession,
};
use crate::domain::worker_api::{self, Credentials, WorkerApiHandle};

struct InFlight(AtomicBool);

struct InFlightGuard<'a>(&'a AtomicBool);

impl InFlight {
    fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn try_acquire(&self) -> Option<InFlightGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(&self.0))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CommandDispatcher {
    api: WorkerApiHandle,
    reconciler: Arc<Reconciler>,
    gate: AdmissionGate,
    poller: PollerHandle,
    clock: SharedClock,
    request_timeout: Duration,
    initial_steps: Vec<String>,
    shutdown: CancellationToken,
    start_flight: InFlight,
    stop_flight: InFlight,
    reset_flight: InFlight,
    credentials_flight: InFlight,
}

impl CommandDispatcher {
    pub fn new(
        api: WorkerApiHandle,
        reconciler: Arc<Reconciler>,
        poller: PollerHandle,
        clock: SharedClock,
        config: &ControllerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let gate = AdmissionGate::new(
            api.clone(),
            reconciler.clone(),
            clock.clone(),
            config.request_timeout,
        );
        Self {
            api,
            reconciler,
            gate,
            poller,
            clock,
            request_timeout: config.request_timeout,
            initial_steps: config.initial_steps.clone(),
            shutdown,
            start_flight: InFlight::new(),
            stop_flight: InFlight::new(),
            reset_flight: InFlight::new(),
            credentials_flight: InFlight::new(),
        }
    }

    pub async fn start(&self) -> Result<ActionOutcome, ControllerError> {
        self.ensure_active()?;
        let Some(_guard) = self.start_flight.try_acquire() else {
            return Ok(self.settle(ActionKind::Start, ActionOutcome::busy(ActionKind::Start)));
        };

        let decision = match self.gate.evaluate().await {
            Ok(decision) => decision,
            Err(err) => return Err(self.fail(err)),
        };
        if let GateDecision::Block(reason) = decision {
            tracing::info!(reason = %reason.describe(), "Start blocked by admission gate");
            self.reconciler.set_admission(AdmissionState::Blocked {
                reason: reason.clone(),
            });
            return Ok(self.settle(ActionKind::Start, ActionOutcome::Blocked { reason }));
        }

        self.reconciler.set_admission(AdmissionState::Dispatching);
        let last_run_at = self.reconciler.snapshot().session.last_run_at;
        let placeholder =
            WorkerSession::placeholder_run(&self.initial_steps, self.clock.utc_now(), last_run_at);
        let write = self.reconciler.begin_start(placeholder).ok_or_else(|| self.inactive())?;

        tracing::info!("Sending start command");
        let outcome = match self.send(self.api.start_worker()).await? {
            Ok(CommandReply::Accepted) => {
                self.reconciler.set_admission(AdmissionState::Idle);
                ActionOutcome::Accepted
            }
            Ok(CommandReply::Rejected { code, message }) => {
                self.reconciler.rollback(write);
                self.reconciler.set_admission(self.admission_after_rejection(code));
                ActionOutcome::Rejected { code, message }
            }
            Err(ApiError::Unauthorized) => return Err(self.fail(ApiError::Unauthorized.into())),
            Err(err) => {
                self.reconciler.set_admission(AdmissionState::Idle);
                self.ambiguous(err)
            }
        };

        Ok(self.settle(ActionKind::Start, outcome))
    }

    pub async fn stop(&self) -> Result<ActionOutcome, ControllerError> {
        self.ensure_active()?;
        let Some(_guard) = self.stop_flight.try_acquire() else {
            return Ok(self.settle(ActionKind::Stop, ActionOutcome::busy(ActionKind::Stop)));
        };

        let write = self.reconciler.begin_stop().ok_or_else(|| self.inactive())?;

        tracing::info!("Sending stop command");
        let outcome = match self.send(self.api.stop_worker()).await? {
            Ok(CommandReply::Accepted) => ActionOutcome::Accepted,
            Ok(CommandReply::Rejected { code, message }) => {
                self.reconciler.rollback(write);
                ActionOutcome::Rejected { code, message }
            }
            Err(ApiError::Unauthorized) => return Err(self.fail(ApiError::Unauthorized.into())),
            // Stays stopped locally; the next poll tells the truth
            Err(err) => self.ambiguous(err),
        };

        Ok(self.settle(ActionKind::Stop, outcome))
    }

    /// Account reset. Local state only changes once the server confirms.
    pub async fn reset(&self) -> Result<ActionOutcome, ControllerError> {
        self.ensure_active()?;
        let Some(_guard) = self.reset_flight.try_acquire() else {
            return Ok(self.settle(ActionKind::Reset, ActionOutcome::busy(ActionKind::Reset)));
        };

        tracing::info!("Sending account reset");
        let outcome = match self.send(self.api.reset_account()).await? {
            Ok(CommandReply::Accepted) => {
                self.reconciler.reset_to_idle();
                self.poller.poll_now();
                ActionOutcome::Accepted
            }
            Ok(CommandReply::Rejected { code, message }) => ActionOutcome::Rejected { code, message },
            Err(ApiError::Unauthorized) => return Err(self.fail(ApiError::Unauthorized.into())),
            Err(err) => self.ambiguous(err),
        };

        Ok(self.settle(ActionKind::Reset, outcome))
    }

    pub async fn supply_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<ActionOutcome, ControllerError> {
        self.ensure_active()?;
        let Some(_guard) = self.credentials_flight.try_acquire() else {
            return Ok(self.settle(
                ActionKind::SaveCredentials,
                ActionOutcome::busy(ActionKind::SaveCredentials),
            ));
        };

        tracing::info!(email = %credentials.email, "Saving job board credentials");
        let outcome = match self.send(self.api.save_credentials(credentials)).await? {
            Ok(CommandReply::Accepted) => {
                self.reconciler.set_credentials(CredentialPresence::Present);
                ActionOutcome::Accepted
            }
            Ok(CommandReply::Rejected { code, message }) => ActionOutcome::Rejected { code, message },
            Err(ApiError::Unauthorized) => return Err(self.fail(ApiError::Unauthorized.into())),
            Err(err) => ActionOutcome::Unknown {
                message: err.to_string(),
            },
        };

        Ok(self.settle(ActionKind::SaveCredentials, outcome))
    }

    pub fn ensure_active(&self) -> Result<(), ControllerError> {
        match self.reconciler.phase() {
            ControllerPhase::Active => Ok(()),
            _ => Err(self.inactive()),
        }
    }

    fn inactive(&self) -> ControllerError {
        match self.reconciler.phase() {
            ControllerPhase::SessionInvalid => ControllerError::SessionInvalid,
            _ => ControllerError::ShutDown,
        }
    }

    /// Bound the request by the timeout and abandon it on shutdown.
    async fn send(
        &self,
        request: impl Future<Output = worker_api::Result<CommandReply>>,
    ) -> Result<worker_api::Result<CommandReply>, ControllerError> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(ControllerError::ShutDown),
            result = tokio::time::timeout(self.request_timeout, request) => {
                Ok(result.unwrap_or(Err(ApiError::Timeout)))
            }
        }
    }

    fn admission_after_rejection(&self, code: Option<RejectionCode>) -> AdmissionState {
        match code {
            Some(RejectionCode::QuotaExceeded) => AdmissionState::Blocked {
                reason: BlockReason::QuotaExceeded {
                    resume_at: next_reset(self.clock.local_now()),
                },
            },
            Some(RejectionCode::CredentialsMissing) => {
                self.reconciler.set_credentials(CredentialPresence::Missing);
                AdmissionState::Blocked {
                    reason: BlockReason::CredentialsMissing,
                }
            }
            _ => AdmissionState::Idle,
        }
    }

    /// The request may or may not have reached the worker.
    fn ambiguous(&self, err: ApiError) -> ActionOutcome {
        tracing::warn!(error = %err, "Command outcome unknown, polling for the truth");
        self.poller.poll_now();
        ActionOutcome::Unknown {
            message: err.to_string(),
        }
    }

    fn fail(&self, err: ControllerError) -> ControllerError {
        match err {
            ControllerError::Api(ApiError::Unauthorized) => {
                if self.reconciler.invalidate_session() {
                    self.shutdown.cancel();
                }
                ControllerError::SessionInvalid
            }
            other => other,
        }
    }

    fn settle(&self, kind: ActionKind, outcome: ActionOutcome) -> ActionOutcome {
        match &outcome {
            ActionOutcome::Accepted => tracing::info!(action = kind.as_str(), "Action accepted"),
            ActionOutcome::Blocked { reason } => {
                tracing::info!(action = kind.as_str(), reason = %reason.describe(), "Action blocked")
            }
            ActionOutcome::Rejected { code, message } => {
                tracing::warn!(action = kind.as_str(), code = ?code, message = %message, "Action rejected")
            }
            ActionOutcome::Unknown { message } => {
                tracing::warn!(action = kind.as_str(), message = %message, "Action outcome unknown")
            }
        }
        self.reconciler
            .record_action(kind, outcome.clone(), self.clock.utc_now());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::eventbus::create_event_bus;
    use crate::application::poller::PollerControl;
    use crate::application::test_support::{network_error, running, FakeWorkerApi, ManualClock};
    use crate::domain::model::{QuotaState, WorkerStatus};
    use tokio::sync::mpsc;

    struct Harness {
        api: Arc<FakeWorkerApi>,
        reconciler: Arc<Reconciler>,
        dispatcher: CommandDispatcher,
        control_rx: mpsc::UnboundedReceiver<PollerControl>,
        shutdown: CancellationToken,
    }

    fn harness() -> Harness {
        let api = Arc::new(FakeWorkerApi::new());
        let (handle, control_rx) = PollerHandle::channel();
        let reconciler = Arc::new(Reconciler::new(create_event_bus(), handle.clone(), 3));
        let shutdown = CancellationToken::new();
        let dispatcher = CommandDispatcher::new(
            api.clone(),
            reconciler.clone(),
            handle,
            Arc::new(ManualClock::at(9, 0, 0)),
            &ControllerConfig::default(),
            shutdown.clone(),
        );
        reconciler.set_credentials(CredentialPresence::Present);
        reconciler.apply_quota(QuotaState::new("pro", 10, 3), None);
        Harness {
            api,
            reconciler,
            dispatcher,
            control_rx,
            shutdown,
        }
    }

    fn polled_now(rx: &mut mpsc::UnboundedReceiver<PollerControl>) -> bool {
        std::iter::from_fn(|| rx.try_recv().ok()).any(|c| c == PollerControl::PollNow)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_writes_placeholder_before_confirmation() {
        let h = harness();
        h.api.set_command_delay(Duration::from_secs(1));

        let (outcome, during) = tokio::join!(h.dispatcher.start(), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            h.reconciler.snapshot()
        });

        assert_eq!(outcome.unwrap(), ActionOutcome::Accepted);
        assert_eq!(during.session.status, WorkerStatus::Running);
        assert_eq!(during.session.progress, 0);
        assert_eq!(during.session.current_task, "Initializing");
        assert_eq!(during.admission, AdmissionState::Dispatching);
        assert_eq!(h.reconciler.snapshot().admission, AdmissionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_start_sends_nothing() {
        let h = harness();
        h.reconciler.apply_quota(QuotaState::new("pro", 10, 10), None);

        let outcome = h.dispatcher.start().await.unwrap();
        assert!(matches!(
            outcome,
            ActionOutcome::Blocked {
                reason: BlockReason::QuotaExceeded { .. }
            }
        ));
        assert_eq!(h.api.start_calls(), 0);
        assert!(h.reconciler.snapshot().admission.is_quota_blocked());
        assert_eq!(h.reconciler.snapshot().session.status, WorkerStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_start_restores_exact_state() {
        let h = harness();
        let prior = WorkerSession {
            status: WorkerStatus::Completed,
            progress: 100,
            tasks_completed: 12,
            ..WorkerSession::idle()
        };
        h.reconciler.apply_session(prior.clone(), None);
        h.api.set_start_reply(Ok(CommandReply::Rejected {
            code: None,
            message: "Worker pool is full".into(),
        }));

        let outcome = h.dispatcher.start().await.unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Rejected {
                code: None,
                message: "Worker pool is full".into()
            }
        );
        let snapshot = h.reconciler.snapshot();
        assert_eq!(snapshot.session, prior);
        assert_eq!(snapshot.admission, AdmissionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_rejection_blocks_until_reset() {
        let h = harness();
        h.api.set_start_reply(Ok(CommandReply::Rejected {
            code: Some(RejectionCode::QuotaExceeded),
            message: "Daily limit reached".into(),
        }));

        h.dispatcher.start().await.unwrap();
        let snapshot = h.reconciler.snapshot();
        assert!(snapshot.admission.is_quota_blocked());
        assert_eq!(snapshot.session.status, WorkerStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_credentials_rejection_prompts_for_credentials() {
        let h = harness();
        h.api.set_start_reply(Ok(CommandReply::Rejected {
            code: Some(RejectionCode::CredentialsMissing),
            message: "Connect your job board account".into(),
        }));

        let outcome = h.dispatcher.start().await.unwrap();
        assert_eq!(
            outcome.remediation(),
            Some(crate::domain::model::Remediation::SupplyCredentials)
        );
        let snapshot = h.reconciler.snapshot();
        assert!(snapshot.admission.is_credentials_blocked());
        assert_eq!(snapshot.credentials, CredentialPresence::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_start_response_is_unknown() {
        let mut h = harness();
        h.api.set_start_reply(Err(network_error()));

        let outcome = h.dispatcher.start().await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Unknown { .. }));
        let snapshot = h.reconciler.snapshot();
        assert!(snapshot.needs_refresh);
        // Neither committed nor rolled back
        assert_eq!(snapshot.session.status, WorkerStatus::Running);
        assert!(polled_now(&mut h.control_rx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_stop_sends_one_request() {
        let h = harness();
        h.reconciler.apply_session(running(40), None);
        h.api.set_command_delay(Duration::from_secs(1));

        let (first, second) = tokio::join!(h.dispatcher.stop(), h.dispatcher.stop());
        assert_eq!(first.unwrap(), ActionOutcome::Accepted);
        assert_eq!(second.unwrap(), ActionOutcome::busy(ActionKind::Stop));
        assert_eq!(h.api.stop_calls(), 1);

        // The slot frees once the first request settles
        h.dispatcher.stop().await.unwrap();
        assert_eq!(h.api.stop_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_network_failure_stays_stopped() {
        let mut h = harness();
        h.reconciler.apply_session(running(40), None);
        h.api.set_stop_reply(Err(ApiError::Timeout));

        let outcome = h.dispatcher.stop().await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Unknown { .. }));
        assert_eq!(h.reconciler.snapshot().session.status, WorkerStatus::Stopped);
        assert!(polled_now(&mut h.control_rx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_stop_rolls_back() {
        let h = harness();
        h.reconciler.apply_session(running(40), None);
        h.api.set_stop_reply(Ok(CommandReply::Rejected {
            code: None,
            message: "Worker is finishing an application".into(),
        }));

        h.dispatcher.stop().await.unwrap();
        assert_eq!(h.reconciler.snapshot().session, running(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_to_idle() {
        let h = harness();
        h.reconciler.apply_session(running(40), None);

        assert_eq!(h.dispatcher.reset().await.unwrap(), ActionOutcome::Accepted);
        let snapshot = h.reconciler.snapshot();
        assert_eq!(snapshot.session, WorkerSession::idle());
        assert!(snapshot.applications.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_supplied_credentials_clear_block() {
        let h = harness();
        h.reconciler.set_credentials(CredentialPresence::Missing);
        assert!(matches!(
            h.dispatcher.start().await.unwrap(),
            ActionOutcome::Blocked {
                reason: BlockReason::CredentialsMissing
            }
        ));

        let credentials = Credentials {
            email: "me@example.com".into(),
            password: "hunter2".into(),
        };
        assert_eq!(
            h.dispatcher.supply_credentials(&credentials).await.unwrap(),
            ActionOutcome::Accepted
        );
        assert_eq!(h.reconciler.snapshot().admission, AdmissionState::Idle);
        assert_eq!(h.dispatcher.start().await.unwrap(), ActionOutcome::Accepted);
        assert_eq!(h.api.start_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_invalidates_controller() {
        let h = harness();
        h.api.set_start_reply(Err(ApiError::Unauthorized));

        assert_eq!(h.dispatcher.start().await, Err(ControllerError::SessionInvalid));
        assert!(h.shutdown.is_cancelled());
        assert_eq!(h.reconciler.phase(), ControllerPhase::SessionInvalid);
        assert_eq!(h.dispatcher.stop().await, Err(ControllerError::SessionInvalid));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_in_flight_command() {
        let h = harness();
        h.api.set_command_delay(Duration::from_secs(5));

        let (outcome, _) = tokio::join!(h.dispatcher.stop(), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            h.shutdown.cancel();
            h.reconciler.tear_down();
        });
        assert_eq!(outcome, Err(ControllerError::ShutDown));
        assert_eq!(h.reconciler.snapshot().phase, ControllerPhase::TornDown);
    }
}
