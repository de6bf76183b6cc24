use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use shared::{
    domain::{Provider, SyncMode},
    protocol::{ChatHistoryResponse, ChatRequest, ChatResponse, SyncStatusResponse, UserProfile},
};

use crate::error::{ApiClientError, ApiResult};

/// Remote API consumed by the session context and both controllers.
///
/// The production implementation is [`HttpApiClient`]; tests stand up small
/// local servers behind the same trait surface.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Fetch a history page, newest first. Omitting `before_id` returns the
    /// most recent page.
    async fn fetch_history(
        &self,
        token: &str,
        limit: u32,
        before_id: Option<i64>,
    ) -> ApiResult<ChatHistoryResponse>;

    async fn send_chat(&self, token: &str, request: &ChatRequest) -> ApiResult<ChatResponse>;

    async fn start_sync(&self, token: &str, provider: Provider, mode: SyncMode) -> ApiResult<()>;

    async fn fetch_sync_status(&self, token: &str) -> ApiResult<SyncStatusResponse>;

    async fn fetch_current_user(&self, token: &str) -> ApiResult<UserProfile>;
}

#[derive(Serialize)]
struct HistoryQuery {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    before_id: Option<i64>,
}

pub struct HttpApiClient {
    http: Client,
    base_url: String,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn checked(response: Response) -> ApiResult<Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiClientError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiClientError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AssistantApi for HttpApiClient {
    async fn fetch_history(
        &self,
        token: &str,
        limit: u32,
        before_id: Option<i64>,
    ) -> ApiResult<ChatHistoryResponse> {
        let response = self
            .http
            .get(format!("{}/chat/history", self.base_url))
            .bearer_auth(token)
            .query(&HistoryQuery { limit, before_id })
            .send()
            .await?;
        Self::checked(response)
            .await?
            .json()
            .await
            .map_err(ApiClientError::Decode)
    }

    async fn send_chat(&self, token: &str, request: &ChatRequest) -> ApiResult<ChatResponse> {
        let response = self
            .http
            .post(format!("{}/chat", self.base_url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;
        Self::checked(response)
            .await?
            .json()
            .await
            .map_err(ApiClientError::Decode)
    }

    async fn start_sync(&self, token: &str, provider: Provider, mode: SyncMode) -> ApiResult<()> {
        let response = self
            .http
            .post(format!(
                "{}/integrations/sync/{}",
                self.base_url,
                provider.as_str()
            ))
            .bearer_auth(token)
            .query(&[("mode", mode.wire_value())])
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn fetch_sync_status(&self, token: &str) -> ApiResult<SyncStatusResponse> {
        let response = self
            .http
            .get(format!("{}/integrations/status", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::checked(response)
            .await?
            .json()
            .await
            .map_err(ApiClientError::Decode)
    }

    async fn fetch_current_user(&self, token: &str) -> ApiResult<UserProfile> {
        let response = self
            .http
            .get(format!("{}/auth/me", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        Self::checked(response)
            .await?
            .json()
            .await
            .map_err(ApiClientError::Decode)
    }
}
