use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::error::ApiError;
use crate::domain::model::{ApplicationRecord, CommandReply, QuotaState, WorkerSession};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Job board login supplied by the user to clear a credentials block
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Backend operations the controller depends on
#[async_trait]
pub trait WorkerApi: Send + Sync {
    async fn worker_status(&self) -> Result<WorkerSession>;
    async fn quota_status(&self) -> Result<QuotaState>;
    async fn applications(&self, limit: usize) -> Result<Vec<ApplicationRecord>>;
    async fn start_worker(&self) -> Result<CommandReply>;
    async fn stop_worker(&self) -> Result<CommandReply>;
    async fn reset_account(&self) -> Result<CommandReply>;
    /// Whether job board credentials are stored server-side
    async fn credentials_configured(&self) -> Result<bool>;
    async fn save_credentials(&self, credentials: &Credentials) -> Result<CommandReply>;
}

/// Handle to a worker API for cloning and sharing
pub type WorkerApiHandle = Arc<dyn WorkerApi>;
