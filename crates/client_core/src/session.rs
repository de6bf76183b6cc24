use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use shared::protocol::UserProfile;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::{api::AssistantApi, error::ApiClientError, token_store::TokenStore, ClientEvent};

#[derive(Default)]
struct SessionState {
    token: Option<String>,
    user: Option<UserProfile>,
}

/// Current identity and auth token, shared by both controllers.
///
/// Controllers only read the token and profile; every mutation goes through
/// the lifecycle operations below so that a non-empty user always implies a
/// non-empty token.
pub struct SessionContext {
    api: Arc<dyn AssistantApi>,
    token_store: Arc<dyn TokenStore>,
    inner: RwLock<SessionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionContext {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        token_store: Arc<dyn TokenStore>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            token_store,
            inner: RwLock::new(SessionState::default()),
            events,
        })
    }

    pub async fn token(&self) -> Option<String> {
        self.inner.read().await.token.clone()
    }

    pub async fn user(&self) -> Option<UserProfile> {
        self.inner.read().await.user.clone()
    }

    pub async fn is_ready(&self) -> bool {
        let guard = self.inner.read().await;
        guard.token.is_some() && guard.user.is_some()
    }

    /// Restore a persisted token, if any, and derive the user profile from
    /// it. A rejected token is treated as an expired session from a prior
    /// run and cleared; other profile-fetch failures leave the token in
    /// place so `refresh_user` can retry.
    pub async fn initialize(&self) -> Result<()> {
        let Some(token) = self
            .token_store
            .load()
            .await
            .context("failed to load persisted token")?
        else {
            return Ok(());
        };

        self.inner.write().await.token = Some(token.clone());

        match self.api.fetch_current_user(&token).await {
            Ok(user) => {
                self.set_user(user).await;
            }
            Err(ApiClientError::Unauthorized) => {
                info!("persisted token rejected by server; clearing session");
                self.clear_session().await?;
            }
            Err(err) => {
                warn!("profile fetch failed during session restore: {err}");
            }
        }
        Ok(())
    }

    /// Persist a freshly issued token and fetch the profile behind it.
    pub async fn login(&self, token: &str) -> Result<()> {
        self.token_store
            .save(token)
            .await
            .context("failed to persist token")?;
        self.inner.write().await.token = Some(token.to_string());

        match self.api.fetch_current_user(token).await {
            Ok(user) => {
                self.set_user(user).await;
                Ok(())
            }
            Err(ApiClientError::Unauthorized) => {
                self.clear_session().await?;
                Err(anyhow!("login token rejected by server"))
            }
            Err(err) => {
                warn!("profile fetch failed after login: {err}");
                Err(err.into())
            }
        }
    }

    /// Re-derive the user profile for the current token.
    ///
    /// This is the sole reconciliation point after local state may have
    /// diverged from server truth, e.g. a provider token invalidated while
    /// a sync was running. A 401 logs the session out; transient failures
    /// are logged and swallowed.
    pub async fn refresh_user(&self) -> Result<()> {
        let Some(token) = self.token().await else {
            return Ok(());
        };
        match self.api.fetch_current_user(&token).await {
            Ok(user) => {
                self.set_user(user).await;
                Ok(())
            }
            Err(ApiClientError::Unauthorized) => {
                info!("token invalidated; logging out");
                self.clear_session().await
            }
            Err(err) => {
                warn!("user profile refresh failed: {err}");
                Ok(())
            }
        }
    }

    pub async fn logout(&self) -> Result<()> {
        self.clear_session().await
    }

    async fn set_user(&self, user: UserProfile) {
        self.inner.write().await.user = Some(user.clone());
        let _ = self
            .events
            .send(ClientEvent::SessionChanged { user: Some(user) });
    }

    async fn clear_session(&self) -> Result<()> {
        {
            let mut guard = self.inner.write().await;
            guard.user = None;
            guard.token = None;
        }
        let _ = self.events.send(ClientEvent::SessionChanged { user: None });
        self.token_store
            .clear()
            .await
            .context("failed to clear persisted token")
    }
}
