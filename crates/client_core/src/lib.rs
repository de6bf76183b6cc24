use std::{sync::Arc, time::Duration};

use anyhow::Result;
use shared::{domain::Provider, protocol::UserProfile};
use tokio::sync::broadcast;

pub mod api;
pub mod error;
pub mod session;
pub mod sync;
pub mod timeline;
pub mod token_store;

pub use api::{AssistantApi, HttpApiClient};
pub use error::ApiClientError;
pub use session::SessionContext;
pub use sync::{ProviderSyncState, SyncOrchestrator};
pub use timeline::{NullViewport, TimelineController, TimelineViewport};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};

/// Page size for the initial history fetch and every older-page fetch.
pub const HISTORY_PAGE_SIZE: u32 = 20;
/// Distance from the top of the scroll area, in pixels, within which an
/// upward scroll triggers loading the next older page.
pub const SCROLL_TOP_THRESHOLD_PX: f64 = 500.0;
/// Interval between sync status polls while any provider is syncing.
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(2000);
/// Settle delay before auto-sync inspects the session's linked providers.
pub const AUTO_SYNC_DELAY: Duration = Duration::from_millis(500);
/// Consecutive poll ticks after which a still-running sync is flagged once.
pub const STUCK_SYNC_WARN_TICKS: u32 = 150;

/// Notifications published to the presentation layer.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionChanged {
        user: Option<UserProfile>,
    },
    TimelineChanged,
    SyncOverlayChanged {
        visible: bool,
        service: Option<Provider>,
    },
    SyncStateChanged {
        provider: Provider,
        syncing: bool,
    },
    /// User-facing failure notice, e.g. an explicit sync start the server
    /// refused to accept.
    Alert(String),
}

/// Composition root: the session context and both controllers sharing one
/// event channel.
pub struct ClientCore {
    pub session: Arc<SessionContext>,
    pub timeline: Arc<TimelineController>,
    pub sync: Arc<SyncOrchestrator>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientCore {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        token_store: Arc<dyn TokenStore>,
        viewport: Arc<dyn TimelineViewport>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let session = SessionContext::new(Arc::clone(&api), token_store, events.clone());
        let timeline = TimelineController::new(
            Arc::clone(&api),
            Arc::clone(&session),
            viewport,
            events.clone(),
        );
        let sync = SyncOrchestrator::new(api, Arc::clone(&session), events.clone());
        Self {
            session,
            timeline,
            sync,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Restore any persisted session; when it comes back ready, kick the
    /// initial history load and the auto-sync heuristic.
    pub async fn start(&self) -> Result<()> {
        self.session.initialize().await?;
        if self.session.is_ready().await {
            self.on_session_ready().await;
        }
        Ok(())
    }

    /// Log in with a freshly issued token and run the session-ready hooks.
    pub async fn login(&self, token: &str) -> Result<()> {
        self.session.login(token).await?;
        if self.session.is_ready().await {
            self.on_session_ready().await;
        }
        Ok(())
    }

    async fn on_session_ready(&self) {
        self.timeline.on_session_ready().await;
        self.sync.on_session_ready().await;
    }

    pub async fn shutdown(&self) {
        self.sync.shutdown().await;
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod session_tests;

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod timeline_tests;

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod sync_tests;

#[cfg(test)]
#[path = "tests/token_store_tests.rs"]
mod token_store_tests;
