//! Session controller.
//!
//! One instance per user session. Owns the poller, the countdown and the
//! auto-resume listener, and exposes the command API plus read-only state.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::config::ControllerConfig;
use crate::application::countdown::CountdownEmitter;
use crate::application::dispatcher::CommandDispatcher;
use crate::application::eventbus::SharedEventBus;
use crate::application::poller::{PollerHandle, StatusPoller};
use crate::application::reconciler::Reconciler;
use crate::domain::clock::SharedClock;
use crate::domain::error::ControllerError;
use crate::domain::event::DomainEvent;
use crate::domain::model::{ActionOutcome, ControllerPhase, ControllerSnapshot};
use crate::domain::worker_api::{Credentials, WorkerApiHandle};

pub struct SessionController {
    reconciler: Arc<Reconciler>,
    dispatcher: Arc<CommandDispatcher>,
    event_bus: SharedEventBus,
    poller: PollerHandle,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionController {
    /// Build the controller and spawn its background tasks on the current
    /// runtime. Polling starts immediately.
    pub fn spawn(
        api: WorkerApiHandle,
        config: ControllerConfig,
        clock: SharedClock,
        event_bus: SharedEventBus,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (poller, control_rx) = PollerHandle::channel();
        let reconciler = Arc::new(Reconciler::new(
            event_bus.clone(),
            poller.clone(),
            config.failure_threshold,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            api.clone(),
            reconciler.clone(),
            poller.clone(),
            clock.clone(),
            &config,
            shutdown.clone(),
        ));

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(
            StatusPoller::new(api, reconciler.clone(), &config, shutdown.clone(), control_rx).run(),
        ));
        tasks.push(tokio::spawn(
            CountdownEmitter::new(
                reconciler.clone(),
                event_bus.clone(),
                poller.clone(),
                clock,
                config.countdown_tick,
                config.near_reset_lead,
                shutdown.clone(),
            )
            .run(),
        ));
        if config.auto_resume {
            tasks.push(tokio::spawn(resume_when_quota_restored(
                dispatcher.clone(),
                event_bus.subscribe(),
                shutdown.clone(),
            )));
        }

        tracing::info!(
            auto_resume = config.auto_resume,
            running_interval = %humantime::format_duration(config.polling.running_interval),
            idle_interval = %humantime::format_duration(config.polling.idle_interval),
            "Session controller started"
        );

        Self {
            reconciler,
            dispatcher,
            event_bus,
            poller,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub async fn start(&self) -> Result<ActionOutcome, ControllerError> {
        self.dispatcher.start().await
    }

    pub async fn stop(&self) -> Result<ActionOutcome, ControllerError> {
        self.dispatcher.stop().await
    }

    pub async fn reset(&self) -> Result<ActionOutcome, ControllerError> {
        self.dispatcher.reset().await
    }

    pub async fn supply_credentials(
        &self,
        credentials: Credentials,
    ) -> Result<ActionOutcome, ControllerError> {
        self.dispatcher.supply_credentials(&credentials).await
    }

    /// Manual refresh: poll now and restart the timer.
    pub fn refresh(&self) -> Result<(), ControllerError> {
        self.dispatcher.ensure_active()?;
        self.poller.poll_now();
        Ok(())
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.reconciler.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<ControllerSnapshot> {
        self.reconciler.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.event_bus.subscribe()
    }

    pub fn phase(&self) -> ControllerPhase {
        self.reconciler.phase()
    }

    /// Cancel every timer and in-flight request, reset state to idle and wait
    /// for the background tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.reconciler.tear_down();

        let tasks = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *tasks)
        };
        for result in join_all(tasks).await {
            if let Err(err) = result {
                tracing::error!(error = %err, "Controller task failed");
            }
        }
        tracing::info!("Session controller stopped");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.reconciler.tear_down();
    }
}

async fn resume_when_quota_restored(
    dispatcher: Arc<CommandDispatcher>,
    mut events: broadcast::Receiver<DomainEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(DomainEvent::QuotaRestored { quota }) => {
                tracing::info!(remaining = quota.remaining(), "Quota restored, resuming worker");
                match dispatcher.start().await {
                    Ok(outcome) => tracing::debug!(outcome = ?outcome, "Auto-resume settled"),
                    Err(err) => tracing::warn!(error = %err, "Auto-resume failed"),
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Auto-resume listener lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::eventbus::create_event_bus;
    use crate::application::test_support::{running, FakeWorkerApi, ManualClock};
    use crate::domain::error::ApiError;
    use crate::domain::model::{
        AdmissionState, ApplicationRecord, BlockReason, QuotaState, WorkerSession, WorkerStatus,
    };
    use chrono::NaiveDate;
    use std::time::Duration;

    fn spawn(api: Arc<FakeWorkerApi>, auto_resume: bool) -> SessionController {
        let config = ControllerConfig {
            auto_resume,
            ..ControllerConfig::default()
        };
        SessionController::spawn(
            api,
            config,
            Arc::new(ManualClock::at(14, 0, 0)),
            create_event_bus(),
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn application(id: &str, status: &str) -> ApplicationRecord {
        ApplicationRecord {
            id: id.into(),
            job_title: "Backend Engineer".into(),
            company: "Acme".into(),
            status: status.into(),
            applied_at: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_populates_snapshot() {
        let api = Arc::new(FakeWorkerApi::new());
        api.set_default_status(running(25));
        api.set_applications(vec![application("a1", "applied"), application("a2", "Applied")]);
        let controller = spawn(api, false);
        settle().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.session.progress, 25);
        assert_eq!(snapshot.quota, Some(QuotaState::new("pro", 10, 0)));
        assert_eq!(snapshot.application_summary.total, 2);
        assert_eq!(snapshot.application_summary.by_status.get("applied"), Some(&2));
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_quota_blocks_without_start_call() {
        let api = Arc::new(FakeWorkerApi::new());
        api.set_quota(Ok(QuotaState::new("free", 10, 10)));
        let controller = spawn(api.clone(), false);
        settle().await;

        let outcome = controller.start().await.unwrap();
        let midnight = NaiveDate::from_ymd_opt(2026, 10, 20)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Blocked {
                reason: BlockReason::QuotaExceeded {
                    resume_at: midnight
                }
            }
        );
        assert_eq!(api.start_calls(), 0);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_reset_admits_next_start() {
        let api = Arc::new(FakeWorkerApi::new());
        api.set_quota(Ok(QuotaState::new("free", 10, 10)));
        let controller = spawn(api.clone(), false);
        settle().await;
        controller.start().await.unwrap();
        assert!(controller.snapshot().admission.is_quota_blocked());

        api.set_quota(Ok(QuotaState::new("free", 10, 0)));
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(controller.snapshot().admission, AdmissionState::Idle);
        // Nothing restarts on its own without auto-resume
        assert_eq!(api.start_calls(), 0);

        assert_eq!(controller.start().await.unwrap(), ActionOutcome::Accepted);
        assert_eq!(api.start_calls(), 1);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_resume_after_quota_reset() {
        let api = Arc::new(FakeWorkerApi::new());
        api.set_quota(Ok(QuotaState::new("free", 10, 10)));
        let controller = spawn(api.clone(), true);
        settle().await;
        controller.start().await.unwrap();

        api.set_quota(Ok(QuotaState::new("free", 10, 0)));
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;

        assert_eq!(api.start_calls(), 1);
        let last = controller.snapshot().last_action.unwrap();
        assert_eq!(last.outcome, ActionOutcome::Accepted);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_restores_prior_status() {
        let api = Arc::new(FakeWorkerApi::new());
        let prior = WorkerSession {
            status: WorkerStatus::Error,
            current_task: "Login failed".into(),
            ..WorkerSession::idle()
        };
        api.set_default_status(prior.clone());
        api.set_start_reply(Ok(crate::domain::model::CommandReply::Rejected {
            code: None,
            message: "Worker unavailable".into(),
        }));
        let controller = spawn(api, false);
        settle().await;

        let outcome = controller.start().await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Rejected { ref message, .. } if message == "Worker unavailable"));
        assert_eq!(controller.snapshot().session, prior);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_poll_halts_controller() {
        let api = Arc::new(FakeWorkerApi::new());
        api.push_status(Duration::ZERO, Err(ApiError::Unauthorized));
        let controller = spawn(api.clone(), true);
        settle().await;

        assert_eq!(controller.phase(), ControllerPhase::SessionInvalid);
        assert_eq!(controller.start().await, Err(ControllerError::SessionInvalid));
        assert_eq!(controller.refresh(), Err(ControllerError::SessionInvalid));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(api.status_calls(), 1);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_poll_discards_late_response() {
        let api = Arc::new(FakeWorkerApi::new());
        api.push_status(Duration::from_secs(3), Ok(running(80)));
        let controller = spawn(api, false);
        settle().await;

        controller.shutdown().await;
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, ControllerPhase::TornDown);
        assert_eq!(snapshot.session, WorkerSession::idle());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(controller.snapshot(), snapshot);
        assert_eq!(controller.start().await, Err(ControllerError::ShutDown));
    }
}
