//! Single writer for the controller state.
//!
//! Every mutation of the session, quota and admission state goes through
//! [`Reconciler`]. Writes happen under one lock in the order they arrive, and
//! the staleness check for a fetch happens inside the same critical section as
//! the write, so an abandoned request can never land after its replacement.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::application::eventbus::SharedEventBus;
use crate::application::poller::PollerHandle;
use crate::domain::error::ApiError;
use crate::domain::event::{DomainEvent, SessionSource};
use crate::domain::model::{
    ActionKind, ActionOutcome, ActionRecord, AdmissionState, ApplicationRecord,
    ApplicationSummary, Connectivity, ControllerPhase, ControllerSnapshot, CredentialPresence,
    QuotaState, WorkerSession, WorkerStatus,
};

/// Backend reads the poller performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Status,
    Quota,
    Applications,
    Credentials,
}

/// Receipt for an optimistic session write, used for exact rollback
#[derive(Debug, Clone)]
pub struct OptimisticWrite {
    revision: u64,
    prior_session: WorkerSession,
    prior_armed: bool,
}

struct ReconcilerState {
    snapshot: ControllerSnapshot,
    /// A run is believed to be executing; cleared by the first authoritative
    /// terminal snapshot
    armed: bool,
    /// Bumped on every session write
    revision: u64,
    status_failures: u32,
    quota_failures: u32,
    torn_down: bool,
}

pub struct Reconciler {
    state: Mutex<ReconcilerState>,
    snapshot_tx: watch::Sender<ControllerSnapshot>,
    event_bus: SharedEventBus,
    poller: PollerHandle,
    failure_threshold: u32,
}

impl Reconciler {
    pub fn new(event_bus: SharedEventBus, poller: PollerHandle, failure_threshold: u32) -> Self {
        let snapshot = ControllerSnapshot::default();
        let (snapshot_tx, _) = watch::channel(snapshot.clone());
        Self {
            state: Mutex::new(ReconcilerState {
                snapshot,
                armed: false,
                revision: 0,
                status_failures: 0,
                quota_failures: 0,
                torn_down: false,
            }),
            snapshot_tx,
            event_bus,
            poller,
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn phase(&self) -> ControllerPhase {
        self.lock().snapshot.phase
    }

    /// Replace the session with an authoritative snapshot.
    ///
    /// Returns false if the snapshot was dropped because the fetch was
    /// abandoned or the controller is gone.
    pub fn apply_session(&self, session: WorkerSession, fetch: Option<&CancellationToken>) -> bool {
        let mut state = self.lock();
        if !Self::accepts(&state, fetch) {
            tracing::debug!("Dropping status snapshot from an abandoned fetch");
            return false;
        }

        if !session.steps_well_formed() {
            tracing::warn!(steps = ?session.detailed_steps, "Worker reported malformed step list");
        }

        let status = session.status;
        state.snapshot.session = session.clone();
        state.snapshot.needs_refresh = false;
        state.revision += 1;
        self.note_success(&mut state, FetchKind::Status);

        // Only a terminal snapshot directly after `running` finishes a run
        let finished = match status {
            WorkerStatus::Running => {
                state.armed = true;
                false
            }
            _ if status.is_terminal() => std::mem::replace(&mut state.armed, false),
            WorkerStatus::Paused => {
                state.armed = false;
                false
            }
            _ => false,
        };

        self.commit(&state);
        self.event_bus.publish(DomainEvent::SessionUpdated {
            session,
            source: SessionSource::Poll,
        });

        if finished {
            tracing::info!(status = ?status, "Run finished, refreshing applications and quota");
            self.event_bus.publish(DomainEvent::RunFinished { status });
            self.poller.refresh_after_run();
        }
        true
    }

    /// Store a quota snapshot and release a quota block if capacity returned.
    pub fn apply_quota(&self, quota: QuotaState, fetch: Option<&CancellationToken>) -> bool {
        let mut state = self.lock();
        if !Self::accepts(&state, fetch) {
            tracing::debug!("Dropping quota snapshot from an abandoned fetch");
            return false;
        }

        state.snapshot.quota = Some(quota.clone());
        self.note_success(&mut state, FetchKind::Quota);

        let release = state.snapshot.admission.is_quota_blocked() && !quota.is_exhausted();
        let old_admission = state.snapshot.admission.clone();
        if release {
            state.snapshot.admission = AdmissionState::Idle;
        }

        self.commit(&state);
        self.event_bus.publish(DomainEvent::QuotaUpdated {
            quota: quota.clone(),
        });

        if release {
            tracing::info!(
                usage = quota.daily_usage,
                limit = quota.daily_limit,
                "Quota available again, admission released"
            );
            self.event_bus.publish(DomainEvent::AdmissionChanged {
                old_state: old_admission,
                new_state: AdmissionState::Idle,
            });
            self.event_bus.publish(DomainEvent::QuotaRestored { quota });
        }
        true
    }

    pub fn apply_applications(
        &self,
        records: Vec<ApplicationRecord>,
        fetch: Option<&CancellationToken>,
    ) -> bool {
        let mut state = self.lock();
        if !Self::accepts(&state, fetch) {
            return false;
        }

        let summary = ApplicationSummary::from_records(&records);
        state.snapshot.applications = records;
        state.snapshot.application_summary = summary.clone();
        self.commit(&state);
        self.event_bus
            .publish(DomainEvent::ApplicationsRefreshed { summary });
        true
    }

    /// Count a failed fetch. Never touches the session.
    pub fn record_failure(&self, kind: FetchKind, error: &ApiError, fetch: Option<&CancellationToken>) {
        let mut state = self.lock();
        if !Self::accepts(&state, fetch) {
            return;
        }

        let failures = match kind {
            FetchKind::Status => {
                state.status_failures += 1;
                state.status_failures
            }
            FetchKind::Quota => {
                state.quota_failures += 1;
                state.quota_failures
            }
            FetchKind::Applications | FetchKind::Credentials => {
                tracing::warn!(kind = ?kind, error = %error, "Fetch failed");
                return;
            }
        };
        tracing::warn!(kind = ?kind, failures, error = %error, "Poll fetch failed");

        let worst = state.status_failures.max(state.quota_failures);
        if worst < self.failure_threshold {
            return;
        }

        let was_online = state.snapshot.connectivity == Connectivity::Online;
        let connectivity = Connectivity::Degraded {
            consecutive_failures: worst,
        };
        state.snapshot.connectivity = connectivity;
        self.commit(&state);
        if was_online {
            tracing::warn!(failures = worst, "Backend unreachable, showing connectivity banner");
            self.event_bus
                .publish(DomainEvent::ConnectivityChanged { connectivity });
        }
    }

    pub fn set_admission(&self, new_state: AdmissionState) {
        let mut state = self.lock();
        if state.torn_down || state.snapshot.admission == new_state {
            return;
        }
        let old_state = std::mem::replace(&mut state.snapshot.admission, new_state.clone());
        self.commit(&state);
        tracing::debug!(old = ?old_state, new = ?new_state, "Admission state changed");
        self.event_bus.publish(DomainEvent::AdmissionChanged {
            old_state,
            new_state,
        });
    }

    /// Record credential presence; supplying credentials clears a
    /// credentials block.
    pub fn set_credentials(&self, presence: CredentialPresence) {
        let release = {
            let mut state = self.lock();
            if state.torn_down {
                return;
            }
            state.snapshot.credentials = presence;
            self.commit(&state);
            presence == CredentialPresence::Present && state.snapshot.admission.is_credentials_blocked()
        };
        if release {
            self.set_admission(AdmissionState::Idle);
        }
    }

    /// Write the start placeholder before the command is sent.
    pub fn begin_start(&self, placeholder: WorkerSession) -> Option<OptimisticWrite> {
        let mut state = self.lock();
        if state.torn_down || state.snapshot.phase != ControllerPhase::Active {
            return None;
        }

        let write = OptimisticWrite {
            revision: state.revision + 1,
            prior_session: std::mem::replace(&mut state.snapshot.session, placeholder.clone()),
            prior_armed: state.armed,
        };
        state.revision = write.revision;
        state.armed = true;
        self.commit(&state);
        self.event_bus.publish(DomainEvent::SessionUpdated {
            session: placeholder,
            source: SessionSource::Optimistic,
        });
        Some(write)
    }

    /// Mark the session stopped before the command is sent. The run stays
    /// armed so the server's own terminal snapshot still triggers the refresh.
    pub fn begin_stop(&self) -> Option<OptimisticWrite> {
        let mut state = self.lock();
        if state.torn_down || state.snapshot.phase != ControllerPhase::Active {
            return None;
        }

        let write = OptimisticWrite {
            revision: state.revision + 1,
            prior_session: state.snapshot.session.clone(),
            prior_armed: state.armed,
        };
        state.revision = write.revision;
        state.snapshot.session.status = WorkerStatus::Stopped;
        let session = state.snapshot.session.clone();
        self.commit(&state);
        self.event_bus.publish(DomainEvent::SessionUpdated {
            session,
            source: SessionSource::Optimistic,
        });
        Some(write)
    }

    /// Restore the session exactly as it was before `write`.
    ///
    /// Skipped when an authoritative snapshot already replaced the
    /// optimistic value.
    pub fn rollback(&self, write: OptimisticWrite) -> bool {
        let mut state = self.lock();
        if state.torn_down {
            return false;
        }
        if state.revision != write.revision {
            tracing::debug!("Skipping rollback, server snapshot already superseded the optimistic write");
            return false;
        }

        state.snapshot.session = write.prior_session.clone();
        state.armed = write.prior_armed;
        state.revision += 1;
        self.commit(&state);
        self.event_bus.publish(DomainEvent::SessionUpdated {
            session: write.prior_session,
            source: SessionSource::Rollback,
        });
        true
    }

    pub fn record_action(&self, kind: ActionKind, outcome: ActionOutcome, settled_at: DateTime<Utc>) {
        let mut state = self.lock();
        if state.torn_down {
            return;
        }
        if matches!(outcome, ActionOutcome::Unknown { .. }) {
            state.snapshot.needs_refresh = true;
        }
        state.snapshot.last_action = Some(ActionRecord {
            id: Ulid::new(),
            kind,
            outcome: outcome.clone(),
            settled_at,
        });
        self.commit(&state);
        self.event_bus
            .publish(DomainEvent::ActionSettled { kind, outcome });
    }

    /// Account reset confirmed: back to idle defaults.
    pub fn reset_to_idle(&self) {
        let old_admission = {
            let mut state = self.lock();
            if state.torn_down {
                return;
            }
            state.snapshot.session = WorkerSession::idle();
            state.snapshot.applications.clear();
            state.snapshot.application_summary = ApplicationSummary::default();
            state.snapshot.needs_refresh = false;
            state.armed = false;
            state.revision += 1;
            let old = std::mem::take(&mut state.snapshot.admission);
            self.commit(&state);
            old
        };

        self.event_bus.publish(DomainEvent::SessionUpdated {
            session: WorkerSession::idle(),
            source: SessionSource::Reset,
        });
        if old_admission != AdmissionState::Idle {
            self.event_bus.publish(DomainEvent::AdmissionChanged {
                old_state: old_admission,
                new_state: AdmissionState::Idle,
            });
        }
    }

    /// Backend rejected our credentials. Returns true the first time.
    pub fn invalidate_session(&self) -> bool {
        let mut state = self.lock();
        if state.torn_down || state.snapshot.phase != ControllerPhase::Active {
            return false;
        }
        state.snapshot.phase = ControllerPhase::SessionInvalid;
        self.commit(&state);
        tracing::warn!("Backend answered 401, halting controller");
        self.event_bus.publish(DomainEvent::SessionInvalidated);
        true
    }

    /// Final write. Everything after this is a no-op.
    pub fn tear_down(&self) {
        let mut state = self.lock();
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        state.armed = false;
        state.snapshot = ControllerSnapshot {
            phase: ControllerPhase::TornDown,
            ..ControllerSnapshot::default()
        };
        self.commit(&state);
        self.event_bus.publish(DomainEvent::ControllerStopped);
    }

    fn note_success(&self, state: &mut ReconcilerState, kind: FetchKind) {
        match kind {
            FetchKind::Status => state.status_failures = 0,
            FetchKind::Quota => state.quota_failures = 0,
            FetchKind::Applications | FetchKind::Credentials => return,
        }

        let worst = state.status_failures.max(state.quota_failures);
        if let Connectivity::Degraded { .. } = state.snapshot.connectivity {
            if worst < self.failure_threshold {
                state.snapshot.connectivity = Connectivity::Online;
                tracing::info!("Backend reachable again");
                self.event_bus.publish(DomainEvent::ConnectivityChanged {
                    connectivity: Connectivity::Online,
                });
            }
        }
    }

    fn accepts(state: &ReconcilerState, fetch: Option<&CancellationToken>) -> bool {
        !state.torn_down
            && state.snapshot.phase == ControllerPhase::Active
            && fetch.map_or(true, |token| !token.is_cancelled())
    }

    fn commit(&self, state: &ReconcilerState) {
        self.snapshot_tx.send_replace(state.snapshot.clone());
    }

    fn lock(&self) -> MutexGuard<'_, ReconcilerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
