use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::config::BackendConfig;
use crate::domain::error::ApiError;
use crate::domain::model::{ApplicationRecord, CommandReply, QuotaState, RejectionCode, WorkerSession};
use crate::domain::worker_api::{Credentials, Result, WorkerApi};

/// [`WorkerApi`] over the dashboard's REST endpoints.
///
/// A 401 from any endpoint maps to [`ApiError::Unauthorized`]. Command
/// endpoints answer with an accepted/rejected envelope, which is honoured on
/// 4xx responses as well.
pub struct HttpWorkerApi {
    config: BackendConfig,
    client: Client,
}

impl HttpWorkerApi {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.token.as_deref() {
            Some(token) if !token.is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authorize(request).send().await?;
        read_json(response).await
    }

    async fn post_command(&self, request: RequestBuilder) -> Result<CommandReply> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        let body = response.text().await?;
        if status.is_success() && body.trim().is_empty() {
            return Ok(CommandReply::Accepted);
        }
        if status.is_success() || status.is_client_error() {
            if let Ok(envelope) = serde_json::from_str::<CommandEnvelope>(&body) {
                return Ok(envelope.into());
            }
        }
        if status.is_success() {
            return Err(ApiError::Decode(format!("unexpected command reply: {}", body)));
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CommandResult {
    Accepted,
    Rejected,
}

#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    result: CommandResult,
    #[serde(default)]
    code: Option<RejectionCode>,
    #[serde(default)]
    message: Option<String>,
}

impl From<CommandEnvelope> for CommandReply {
    fn from(envelope: CommandEnvelope) -> Self {
        match envelope.result {
            CommandResult::Accepted => CommandReply::Accepted,
            CommandResult::Rejected => CommandReply::Rejected {
                code: envelope.code,
                message: envelope
                    .message
                    .unwrap_or_else(|| "Request rejected by server".to_string()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsStatus {
    configured: bool,
}

#[async_trait]
impl WorkerApi for HttpWorkerApi {
    async fn worker_status(&self) -> Result<WorkerSession> {
        self.get_json(self.client.get(self.url("worker-status"))).await
    }

    async fn quota_status(&self) -> Result<QuotaState> {
        self.get_json(self.client.get(self.url("quota-status"))).await
    }

    async fn applications(&self, limit: usize) -> Result<Vec<ApplicationRecord>> {
        let request = self
            .client
            .get(self.url("applications"))
            .query(&[("limit", limit)]);
        self.get_json(request).await
    }

    async fn start_worker(&self) -> Result<CommandReply> {
        self.post_command(self.client.post(self.url("worker/start"))).await
    }

    async fn stop_worker(&self) -> Result<CommandReply> {
        self.post_command(self.client.post(self.url("worker/stop"))).await
    }

    async fn reset_account(&self) -> Result<CommandReply> {
        self.post_command(self.client.post(self.url("account/reset"))).await
    }

    async fn credentials_configured(&self) -> Result<bool> {
        let status: CredentialsStatus = self
            .get_json(self.client.get(self.url("credentials-status")))
            .await?;
        Ok(status.configured)
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<CommandReply> {
        let request = self.client.post(self.url("credentials")).json(credentials);
        self.post_command(request).await
    }
}
