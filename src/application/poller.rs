//! Status poller.
//!
//! One task, one timer. Every tick starts a status fetch and a quota fetch;
//! each fetch kind owns a single in-flight slot, and starting a new fetch
//! cancels whatever still occupies that slot. A fetch still unanswered when
//! the next tick arrives counts as a failed poll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::application::config::ControllerConfig;
use crate::application::reconciler::{FetchKind, Reconciler};
use crate::domain::error::ApiError;
use crate::domain::model::{
    ApplicationRecord, ControllerPhase, ControllerSnapshot, CredentialPresence, PollingPolicy,
    QuotaState, WorkerSession,
};
use crate::domain::worker_api::WorkerApiHandle;

/// Requests other components send to the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerControl {
    /// Fetch status and quota now and restart the timer
    PollNow,
    /// A run just finished: re-fetch applications and quota
    RefreshAfterRun,
    /// The predicted reset is close: poll at the near-reset cadence for a while
    TightenNearReset,
}

/// Cheap, cloneable sender side of the poller's control channel
#[derive(Debug, Clone)]
pub struct PollerHandle {
    tx: mpsc::UnboundedSender<PollerControl>,
}

impl PollerHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PollerControl>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn poll_now(&self) {
        self.send(PollerControl::PollNow);
    }

    pub fn refresh_after_run(&self) {
        self.send(PollerControl::RefreshAfterRun);
    }

    pub fn tighten_near_reset(&self) {
        self.send(PollerControl::TightenNearReset);
    }

    fn send(&self, control: PollerControl) {
        if self.tx.send(control).is_err() {
            tracing::trace!(control = ?control, "Poller already stopped");
        }
    }
}

enum Fetched {
    Session(WorkerSession),
    Quota(QuotaState),
    Applications(Vec<ApplicationRecord>),
    Credentials(bool),
}

/// One in-flight fetch. `settled` is claimed exactly once: by the fetch
/// delivering its result, or by a newer fetch abandoning it.
#[derive(Clone)]
struct Slot {
    token: CancellationToken,
    settled: Arc<AtomicBool>,
}

impl Slot {
    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }
}

enum Wake {
    Tick,
    Control(PollerControl),
    SnapshotChanged,
}

pub struct StatusPoller {
    api: WorkerApiHandle,
    reconciler: Arc<Reconciler>,
    policy: PollingPolicy,
    request_timeout: Duration,
    application_limit: usize,
    near_reset_window: Duration,
    shutdown: CancellationToken,
    control_rx: mpsc::UnboundedReceiver<PollerControl>,
    slots: HashMap<FetchKind, Slot>,
    tightened_until: Option<Instant>,
}

impl StatusPoller {
    pub fn new(
        api: WorkerApiHandle,
        reconciler: Arc<Reconciler>,
        config: &ControllerConfig,
        shutdown: CancellationToken,
        control_rx: mpsc::UnboundedReceiver<PollerControl>,
    ) -> Self {
        Self {
            api,
            reconciler,
            policy: config.polling,
            request_timeout: config.request_timeout,
            application_limit: config.application_limit,
            near_reset_window: config.near_reset_window,
            shutdown,
            control_rx,
            slots: HashMap::new(),
            tightened_until: None,
        }
    }

    pub async fn run(mut self) {
        let mut snapshot_rx = self.reconciler.subscribe();
        let mut interval = self.interval_for(&snapshot_rx.borrow_and_update());

        tracing::debug!(interval = %humantime::format_duration(interval), "Status poller started");
        self.spawn_fetch(FetchKind::Applications, false);
        self.spawn_fetch(FetchKind::Credentials, false);
        // First tick is immediate
        let mut deadline = Instant::now();

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = sleep_until(deadline) => Wake::Tick,
                control = self.control_rx.recv() => match control {
                    Some(control) => Wake::Control(control),
                    None => break,
                },
                changed = snapshot_rx.changed() => match changed {
                    Ok(()) => Wake::SnapshotChanged,
                    Err(_) => break,
                },
            };

            match wake {
                Wake::Tick => {
                    self.poll(true);
                    deadline = Instant::now() + interval;
                }
                Wake::Control(PollerControl::PollNow) => {
                    self.poll(false);
                    deadline = Instant::now() + interval;
                }
                Wake::Control(PollerControl::RefreshAfterRun) => {
                    self.spawn_fetch(FetchKind::Applications, false);
                    self.spawn_fetch(FetchKind::Quota, false);
                }
                Wake::Control(PollerControl::TightenNearReset) => {
                    tracing::info!(window = %humantime::format_duration(self.near_reset_window), "Tightening poll cadence near quota reset");
                    self.tightened_until = Some(Instant::now() + self.near_reset_window);
                }
                Wake::SnapshotChanged => {}
            }

            let snapshot = snapshot_rx.borrow_and_update().clone();
            if snapshot.phase != ControllerPhase::Active {
                tracing::debug!(phase = ?snapshot.phase, "Controller inactive, poller exiting");
                break;
            }

            let next = self.interval_for(&snapshot);
            if next != interval {
                tracing::debug!(
                    from = %humantime::format_duration(interval),
                    to = %humantime::format_duration(next),
                    "Poll interval changed"
                );
                interval = next;
                deadline = Instant::now() + interval;
            }
        }

        for slot in self.slots.values() {
            slot.token.cancel();
        }
        tracing::debug!("Status poller stopped");
    }

    fn interval_for(&self, snapshot: &ControllerSnapshot) -> Duration {
        let tightened = self
            .tightened_until
            .map_or(false, |until| Instant::now() < until);
        let near_reset = tightened && snapshot.quota_exhausted();
        self.policy.interval_for(snapshot.session.status, near_reset)
    }

    /// `overdue` is set on timer ticks: a fetch of the previous tick that is
    /// still unanswered has had a whole interval.
    fn poll(&mut self, overdue: bool) {
        self.spawn_fetch(FetchKind::Status, overdue);
        self.spawn_fetch(FetchKind::Quota, overdue);
    }

    /// Claim the slot for `kind`, abandoning any fetch still holding it.
    fn claim_slot(&mut self, kind: FetchKind, overdue: bool) -> Slot {
        let slot = Slot {
            token: self.shutdown.child_token(),
            settled: Arc::new(AtomicBool::new(false)),
        };
        if let Some(previous) = self.slots.insert(kind, slot.clone()) {
            if previous.settle() {
                if overdue {
                    self.reconciler.record_failure(kind, &ApiError::Timeout, None);
                } else {
                    tracing::trace!(kind = ?kind, "Abandoning previous fetch");
                }
            }
            previous.token.cancel();
        }
        slot
    }

    fn spawn_fetch(&mut self, kind: FetchKind, overdue: bool) {
        let slot = self.claim_slot(kind, overdue);
        let api = self.api.clone();
        let reconciler = self.reconciler.clone();
        let shutdown = self.shutdown.clone();
        let timeout = self.request_timeout;
        let limit = self.application_limit;

        tokio::spawn(async move {
            let token = &slot.token;
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = tokio::time::timeout(timeout, fetch(&api, kind, limit)) => {
                    result.unwrap_or(Err(ApiError::Timeout))
                }
            };
            if !slot.settle() {
                return;
            }

            match result {
                Ok(Fetched::Session(session)) => {
                    reconciler.apply_session(session, Some(token));
                }
                Ok(Fetched::Quota(quota)) => {
                    reconciler.apply_quota(quota, Some(token));
                }
                Ok(Fetched::Applications(records)) => {
                    reconciler.apply_applications(records, Some(token));
                }
                Ok(Fetched::Credentials(configured)) => {
                    if !token.is_cancelled() {
                        reconciler.set_credentials(if configured {
                            CredentialPresence::Present
                        } else {
                            CredentialPresence::Missing
                        });
                    }
                }
                Err(ApiError::Unauthorized) => {
                    if reconciler.invalidate_session() {
                        shutdown.cancel();
                    }
                }
                Err(err) => reconciler.record_failure(kind, &err, Some(token)),
            }
        });
    }
}

async fn fetch(api: &WorkerApiHandle, kind: FetchKind, limit: usize) -> Result<Fetched, ApiError> {
    Ok(match kind {
        FetchKind::Status => Fetched::Session(api.worker_status().await?),
        FetchKind::Quota => Fetched::Quota(api.quota_status().await?),
        FetchKind::Applications => Fetched::Applications(api.applications(limit).await?),
        FetchKind::Credentials => Fetched::Credentials(api.credentials_configured().await?),
    })
}
