//! In-memory backend and clock for controller tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio::time::Instant;

use crate::domain::clock::Clock;
use crate::domain::error::ApiError;
use crate::domain::model::{ApplicationRecord, CommandReply, QuotaState, WorkerSession, WorkerStatus};
use crate::domain::worker_api::{Credentials, Result, WorkerApi};

pub fn running(progress: u8) -> WorkerSession {
    WorkerSession {
        status: WorkerStatus::Running,
        current_task: "Applying".into(),
        progress,
        ..WorkerSession::idle()
    }
}

pub fn stopped() -> WorkerSession {
    WorkerSession::idle()
}

struct FakeState {
    scripted_status: VecDeque<(Duration, Result<WorkerSession>)>,
    default_status: WorkerSession,
    quota: Result<QuotaState>,
    applications: Vec<ApplicationRecord>,
    credentials_configured: Result<bool>,
    start_reply: Result<CommandReply>,
    stop_reply: Result<CommandReply>,
    reset_reply: Result<CommandReply>,
    save_reply: Result<CommandReply>,
    command_delay: Duration,
}

/// Scripted [`WorkerApi`] that counts calls.
///
/// Status responses are popped from a script first, then fall back to the
/// default. Every other endpoint returns its configured value.
pub struct FakeWorkerApi {
    state: Mutex<FakeState>,
    status_calls: AtomicUsize,
    quota_calls: AtomicUsize,
    application_calls: AtomicUsize,
    credential_calls: AtomicUsize,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    save_calls: AtomicUsize,
}

impl FakeWorkerApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                scripted_status: VecDeque::new(),
                default_status: WorkerSession::idle(),
                quota: Ok(QuotaState::new("pro", 10, 0)),
                applications: Vec::new(),
                credentials_configured: Ok(true),
                start_reply: Ok(CommandReply::Accepted),
                stop_reply: Ok(CommandReply::Accepted),
                reset_reply: Ok(CommandReply::Accepted),
                save_reply: Ok(CommandReply::Accepted),
                command_delay: Duration::ZERO,
            }),
            status_calls: AtomicUsize::new(0),
            quota_calls: AtomicUsize::new(0),
            application_calls: AtomicUsize::new(0),
            credential_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_status(&self, delay: Duration, result: Result<WorkerSession>) {
        self.state.lock().unwrap().scripted_status.push_back((delay, result));
    }

    pub fn set_default_status(&self, session: WorkerSession) {
        self.state.lock().unwrap().default_status = session;
    }

    pub fn set_quota(&self, quota: Result<QuotaState>) {
        self.state.lock().unwrap().quota = quota;
    }

    pub fn set_applications(&self, applications: Vec<ApplicationRecord>) {
        self.state.lock().unwrap().applications = applications;
    }

    pub fn set_credentials_configured(&self, configured: Result<bool>) {
        self.state.lock().unwrap().credentials_configured = configured;
    }

    pub fn set_start_reply(&self, reply: Result<CommandReply>) {
        self.state.lock().unwrap().start_reply = reply;
    }

    pub fn set_stop_reply(&self, reply: Result<CommandReply>) {
        self.state.lock().unwrap().stop_reply = reply;
    }

    pub fn set_reset_reply(&self, reply: Result<CommandReply>) {
        self.state.lock().unwrap().reset_reply = reply;
    }

    pub fn set_save_reply(&self, reply: Result<CommandReply>) {
        self.state.lock().unwrap().save_reply = reply;
    }

    /// Delay applied to every command endpoint
    pub fn set_command_delay(&self, delay: Duration) {
        self.state.lock().unwrap().command_delay = delay;
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn quota_calls(&self) -> usize {
        self.quota_calls.load(Ordering::SeqCst)
    }

    pub fn application_calls(&self) -> usize {
        self.application_calls.load(Ordering::SeqCst)
    }

    pub fn credential_calls(&self) -> usize {
        self.credential_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    async fn command(&self, counter: &AtomicUsize, pick: impl Fn(&FakeState) -> Result<CommandReply>) -> Result<CommandReply> {
        counter.fetch_add(1, Ordering::SeqCst);
        let (delay, reply) = {
            let state = self.state.lock().unwrap();
            (state.command_delay, pick(&*state))
        };
        pause(delay).await;
        reply
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl WorkerApi for FakeWorkerApi {
    async fn worker_status(&self) -> Result<WorkerSession> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let mut state = self.state.lock().unwrap();
            match state.scripted_status.pop_front() {
                Some(scripted) => scripted,
                None => (Duration::ZERO, Ok(state.default_status.clone())),
            }
        };
        pause(delay).await;
        result
    }

    async fn quota_status(&self) -> Result<QuotaState> {
        self.quota_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().quota.clone()
    }

    async fn applications(&self, limit: usize) -> Result<Vec<ApplicationRecord>> {
        self.application_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state.applications.iter().take(limit).cloned().collect())
    }

    async fn start_worker(&self) -> Result<CommandReply> {
        self.command(&self.start_calls, |s| s.start_reply.clone()).await
    }

    async fn stop_worker(&self) -> Result<CommandReply> {
        self.command(&self.stop_calls, |s| s.stop_reply.clone()).await
    }

    async fn reset_account(&self) -> Result<CommandReply> {
        self.command(&self.reset_calls, |s| s.reset_reply.clone()).await
    }

    async fn credentials_configured(&self) -> Result<bool> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().credentials_configured.clone()
    }

    async fn save_credentials(&self, _credentials: &Credentials) -> Result<CommandReply> {
        self.command(&self.save_calls, |s| s.save_reply.clone()).await
    }
}

pub fn network_error() -> ApiError {
    ApiError::Network("connection refused".into())
}

/// Wall clock that starts at a fixed local time and advances with tokio's
/// (pausable) clock.
pub struct ManualClock {
    base_local: NaiveDateTime,
    base_utc: DateTime<Utc>,
    origin: Instant,
}

impl ManualClock {
    pub fn at(h: u32, m: u32, s: u32) -> Self {
        let base_local = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap();
        Self {
            base_local,
            base_utc: base_local.and_utc(),
            origin: Instant::now(),
        }
    }

    fn elapsed(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.origin.elapsed()).unwrap()
    }
}

impl Clock for ManualClock {
    fn local_now(&self) -> NaiveDateTime {
        self.base_local + self.elapsed()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.base_utc + self.elapsed()
    }
}
