use std::{sync::Arc, time::Duration};

use shared::domain::{Provider, SyncMode};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{debug, info, warn};

use crate::{
    api::AssistantApi, session::SessionContext, ClientEvent, AUTO_SYNC_DELAY,
    STUCK_SYNC_WARN_TICKS, SYNC_POLL_INTERVAL,
};

/// Tracked state of one provider's sync job. `mode` reflects the most
/// recently requested scope and is only meaningful while `syncing` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSyncState {
    pub syncing: bool,
    pub mode: SyncMode,
}

impl Default for ProviderSyncState {
    fn default() -> Self {
        Self {
            syncing: false,
            mode: SyncMode::Recent,
        }
    }
}

#[derive(Default)]
struct SyncState {
    gmail: ProviderSyncState,
    hubspot: ProviderSyncState,
    overlay_open: bool,
    overlay_dismissed: bool,
    attributed: Option<Provider>,
    auto_sync_fired: bool,
}

impl SyncState {
    fn provider(&self, provider: Provider) -> ProviderSyncState {
        match provider {
            Provider::Gmail => self.gmail,
            Provider::Hubspot => self.hubspot,
        }
    }

    fn provider_mut(&mut self, provider: Provider) -> &mut ProviderSyncState {
        match provider {
            Provider::Gmail => &mut self.gmail,
            Provider::Hubspot => &mut self.hubspot,
        }
    }

    fn any_syncing(&self) -> bool {
        self.gmail.syncing || self.hubspot.syncing
    }

    /// Overlay attribution prefers Gmail whenever both providers are
    /// active at the same time.
    fn derive_attribution(&self) -> Option<Provider> {
        if self.gmail.syncing {
            Some(Provider::Gmail)
        } else if self.hubspot.syncing {
            Some(Provider::Hubspot)
        } else {
            None
        }
    }
}

/// Starts and tracks the two provider-scoped background import jobs and
/// coalesces their progress into a single overlay.
pub struct SyncOrchestrator {
    api: Arc<dyn AssistantApi>,
    session: Arc<SessionContext>,
    inner: Mutex<SyncState>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    auto_sync_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
    poll_interval: Duration,
    auto_sync_delay: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        session: Arc<SessionContext>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Self::with_timing(api, session, events, SYNC_POLL_INTERVAL, AUTO_SYNC_DELAY)
    }

    pub(crate) fn with_timing(
        api: Arc<dyn AssistantApi>,
        session: Arc<SessionContext>,
        events: broadcast::Sender<ClientEvent>,
        poll_interval: Duration,
        auto_sync_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            session,
            inner: Mutex::new(SyncState::default()),
            poll_task: Mutex::new(None),
            auto_sync_task: Mutex::new(None),
            events,
            poll_interval,
            auto_sync_delay,
        })
    }

    pub async fn provider_state(&self, provider: Provider) -> ProviderSyncState {
        self.inner.lock().await.provider(provider)
    }

    pub async fn overlay_visible(&self) -> bool {
        self.inner.lock().await.overlay_open
    }

    /// Provider the overlay currently names, when open.
    pub async fn syncing_service(&self) -> Option<Provider> {
        self.inner.lock().await.attributed
    }

    /// Explicit, user-initiated sync start. A failure to get the request
    /// accepted reverts the provider and raises an alert.
    pub async fn start_sync(self: &Arc<Self>, provider: Provider, mode: SyncMode) {
        self.start_sync_inner(provider, mode, true).await;
    }

    async fn start_sync_inner(self: &Arc<Self>, provider: Provider, mode: SyncMode, explicit: bool) {
        let Some(token) = self.session.token().await else {
            warn!(provider = %provider, "sync start skipped: no active token");
            return;
        };

        {
            let mut guard = self.inner.lock().await;
            let state = guard.provider_mut(provider);
            state.syncing = true;
            state.mode = mode;
            let attributed = guard.derive_attribution();
            guard.attributed = attributed;
            if explicit {
                // An explicit start is a new sync, not an already-tracked
                // one; it re-arms a previously dismissed overlay.
                guard.overlay_dismissed = false;
            }
            if !guard.overlay_dismissed {
                guard.overlay_open = true;
            }
            self.emit_overlay(&guard);
        }
        let _ = self.events.send(ClientEvent::SyncStateChanged {
            provider,
            syncing: true,
        });
        self.ensure_polling().await;

        info!(provider = %provider, mode = ?mode, "requesting sync start");
        if let Err(err) = self.api.start_sync(&token, provider, mode).await {
            warn!(provider = %provider, "sync start rejected: {err}");
            {
                let mut guard = self.inner.lock().await;
                guard.provider_mut(provider).syncing = false;
                let attributed = guard.derive_attribution();
                guard.attributed = attributed;
                if !guard.any_syncing() && guard.overlay_open {
                    guard.overlay_open = false;
                }
                self.emit_overlay(&guard);
            }
            let _ = self.events.send(ClientEvent::SyncStateChanged {
                provider,
                syncing: false,
            });
            if explicit {
                let _ = self.events.send(ClientEvent::Alert(format!(
                    "Failed to start {provider} sync: {err}"
                )));
            }
        }
    }

    /// Auto-sync heuristic; runs at most once per session, after a short
    /// settle delay, and only for providers the profile reports linked.
    pub async fn on_session_ready(self: &Arc<Self>) {
        {
            let mut guard = self.inner.lock().await;
            if guard.auto_sync_fired {
                debug!("auto-sync already attempted this session");
                return;
            }
            guard.auto_sync_fired = true;
        }

        let orchestrator = Arc::clone(self);
        let delay = self.auto_sync_delay;
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            orchestrator.auto_sync().await;
        });
        *self.auto_sync_task.lock().await = Some(task);
    }

    async fn auto_sync(self: &Arc<Self>) {
        let Some(user) = self.session.user().await else {
            debug!("auto-sync skipped: session no longer ready");
            return;
        };
        let gmail = user.is_linked(Provider::Gmail);
        let hubspot = user.is_linked(Provider::Hubspot);

        if gmail && hubspot {
            info!("auto-starting recent sync for gmail and hubspot");
            tokio::join!(
                self.start_sync_inner(Provider::Gmail, SyncMode::Recent, false),
                self.start_sync_inner(Provider::Hubspot, SyncMode::Recent, false),
            );
        } else if gmail {
            info!("auto-starting recent sync for gmail");
            self.start_sync_inner(Provider::Gmail, SyncMode::Recent, false)
                .await;
        } else if hubspot {
            info!("auto-starting recent sync for hubspot");
            self.start_sync_inner(Provider::Hubspot, SyncMode::Recent, false)
                .await;
        } else {
            debug!("auto-sync found no linked providers");
        }
    }

    /// Hide the overlay without touching provider state. Tracking
    /// continues; later poll results are applied silently.
    pub async fn dismiss_overlay(&self) {
        let mut guard = self.inner.lock().await;
        if !guard.overlay_open {
            return;
        }
        guard.overlay_open = false;
        guard.overlay_dismissed = true;
        self.emit_overlay(&guard);
    }

    /// Tear down background tasks. Results of abandoned in-flight calls
    /// are discarded, not applied.
    pub async fn shutdown(&self) {
        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.auto_sync_task.lock().await.take() {
            task.abort();
        }
    }

    fn emit_overlay(&self, state: &SyncState) {
        let _ = self.events.send(ClientEvent::SyncOverlayChanged {
            visible: state.overlay_open,
            service: state.attributed,
        });
    }

    /// Start the status poll loop unless one is already running. The loop
    /// exits on its own once no provider is syncing and is restarted here
    /// whenever a provider flips back.
    async fn ensure_polling(self: &Arc<Self>) {
        let mut task_guard = self.poll_task.lock().await;
        if let Some(task) = task_guard.as_ref() {
            if !task.is_finished() {
                return;
            }
        }
        if !self.inner.lock().await.any_syncing() {
            return;
        }
        let orchestrator = Arc::clone(self);
        *task_guard = Some(tokio::spawn(async move {
            orchestrator.poll_loop().await;
        }));
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut ticks: u32 = 0;
        let mut stuck_warned = false;
        loop {
            time::sleep(self.poll_interval).await;

            let Some(token) = self.session.token().await else {
                // Without a token there is no way to observe completion;
                // the loop is restarted on the next start request.
                warn!("sync status poll stopped: no active token");
                break;
            };

            match self.api.fetch_sync_status(&token).await {
                Ok(status) => {
                    let all_idle = {
                        let mut guard = self.inner.lock().await;
                        let overlay_before = (guard.overlay_open, guard.attributed);
                        for provider in Provider::ALL {
                            let remote = status.provider(provider).syncing;
                            let state = guard.provider_mut(provider);
                            if state.syncing != remote {
                                state.syncing = remote;
                                let _ = self.events.send(ClientEvent::SyncStateChanged {
                                    provider,
                                    syncing: remote,
                                });
                            }
                        }
                        let attributed = guard.derive_attribution();
                        guard.attributed = attributed;
                        let all_idle = !guard.any_syncing();
                        if all_idle {
                            guard.overlay_open = false;
                            // All-idle is the boundary at which a dismissal
                            // stops applying.
                            guard.overlay_dismissed = false;
                        }
                        if (guard.overlay_open, guard.attributed) != overlay_before {
                            self.emit_overlay(&guard);
                        }
                        all_idle
                    };

                    if all_idle {
                        info!("all provider syncs completed; refreshing user profile");
                        if let Err(err) = self.session.refresh_user().await {
                            warn!("post-sync user refresh failed: {err}");
                        }
                        break;
                    }
                }
                Err(err) => {
                    // A failed poll must never demote a provider last seen
                    // syncing; leave every flag untouched and retry on the
                    // next tick.
                    warn!("sync status poll failed: {err}");
                }
            }

            ticks += 1;
            if ticks >= STUCK_SYNC_WARN_TICKS && !stuck_warned {
                stuck_warned = true;
                warn!(ticks, "provider sync still running after extended polling");
            }
        }
    }
}
