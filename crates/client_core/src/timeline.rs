use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{ChatEntry, ChatRole, EntryId},
    protocol::{ChatRequest, ChatTurn, HistoryMessage},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    api::AssistantApi, session::SessionContext, ClientEvent, HISTORY_PAGE_SIZE,
    SCROLL_TOP_THRESHOLD_PX,
};

/// Fallback greeting when the initial history fetch fails and the timeline
/// would otherwise be empty.
const WELCOME_MESSAGE: &str =
    "Hello! I'm your assistant. Ask me about your emails, contacts, or schedule.";

/// Presentation seam used to keep the scroll position stable across
/// timeline mutations.
///
/// `content_height` must reflect the rendered height for the current
/// timeline snapshot; the controller measures it around a front-merge and
/// shifts the offset by the difference so the anchored entry does not move.
#[async_trait]
pub trait TimelineViewport: Send + Sync {
    async fn content_height(&self) -> f64;
    async fn scroll_offset(&self) -> f64;
    async fn set_scroll_offset(&self, offset: f64);
    /// Jump to the newest entry without animation.
    async fn scroll_to_bottom(&self);
}

/// Headless default used when no renderer is attached.
pub struct NullViewport;

#[async_trait]
impl TimelineViewport for NullViewport {
    async fn content_height(&self) -> f64 {
        0.0
    }

    async fn scroll_offset(&self) -> f64 {
        0.0
    }

    async fn set_scroll_offset(&self, _offset: f64) {}

    async fn scroll_to_bottom(&self) {}
}

struct TimelineState {
    entries: Vec<ChatEntry>,
    has_more: bool,
    page_fetch_in_flight: bool,
    initial_load_started: bool,
    last_scroll_offset: f64,
}

/// Owns the ordered message sequence, backward pagination, and
/// optimistic-send reconciliation for one conversation.
pub struct TimelineController {
    api: Arc<dyn AssistantApi>,
    session: Arc<SessionContext>,
    viewport: Arc<dyn TimelineViewport>,
    inner: Mutex<TimelineState>,
    events: broadcast::Sender<ClientEvent>,
}

impl TimelineController {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        session: Arc<SessionContext>,
        viewport: Arc<dyn TimelineViewport>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            session,
            viewport,
            inner: Mutex::new(TimelineState {
                entries: Vec::new(),
                has_more: false,
                page_fetch_in_flight: false,
                initial_load_started: false,
                last_scroll_offset: 0.0,
            }),
            events,
        })
    }

    pub async fn entries(&self) -> Vec<ChatEntry> {
        self.inner.lock().await.entries.clone()
    }

    pub async fn has_more(&self) -> bool {
        self.inner.lock().await.has_more
    }

    /// Oldest server-assigned id currently loaded; pending entries never
    /// participate in pagination.
    fn oldest_confirmed_id(entries: &[ChatEntry]) -> Option<i64> {
        entries.iter().filter_map(|e| e.id.confirmed()).min()
    }

    fn sort_entries(entries: &mut [ChatEntry]) {
        entries.sort_by_key(|entry| entry.timestamp);
    }

    fn entry_from_history(message: HistoryMessage) -> ChatEntry {
        ChatEntry {
            id: EntryId::Confirmed(message.id),
            role: message.role,
            content: message.content,
            error: message.error,
            timestamp: message.timestamp,
        }
    }

    /// One-shot entry point invoked when the session becomes ready.
    pub async fn on_session_ready(&self) {
        {
            let mut guard = self.inner.lock().await;
            if guard.initial_load_started {
                return;
            }
            guard.initial_load_started = true;
        }
        self.initial_load().await;
    }

    async fn initial_load(&self) {
        let Some(token) = self.session.token().await else {
            warn!("initial history load skipped: no active token");
            return;
        };

        match self
            .api
            .fetch_history(&token, HISTORY_PAGE_SIZE, None)
            .await
        {
            Ok(page) => {
                let loaded = page.messages.len();
                {
                    let mut guard = self.inner.lock().await;
                    guard.entries = page
                        .messages
                        .into_iter()
                        .map(Self::entry_from_history)
                        .collect();
                    Self::sort_entries(&mut guard.entries);
                    guard.has_more = page.has_more;
                }
                info!(loaded, has_more = page.has_more, "initial history loaded");
                let _ = self.events.send(ClientEvent::TimelineChanged);
                self.viewport.scroll_to_bottom().await;
            }
            Err(err) => {
                warn!("initial history load failed; falling back to welcome message: {err}");
                {
                    let mut guard = self.inner.lock().await;
                    guard.entries = vec![ChatEntry {
                        id: EntryId::fresh(),
                        role: ChatRole::Assistant,
                        content: WELCOME_MESSAGE.to_string(),
                        error: false,
                        timestamp: Utc::now(),
                    }];
                    guard.has_more = false;
                }
                let _ = self.events.send(ClientEvent::TimelineChanged);
            }
        }
    }

    /// Fetch the page immediately preceding the oldest loaded entry and
    /// merge it into the front without moving the anchored entry. At most
    /// one page fetch is in flight per controller; duplicate triggers are
    /// no-ops.
    pub async fn load_older_page(&self) {
        let cursor = {
            let mut guard = self.inner.lock().await;
            if guard.page_fetch_in_flight || !guard.has_more || guard.entries.is_empty() {
                return;
            }
            let Some(cursor) = Self::oldest_confirmed_id(&guard.entries) else {
                return;
            };
            guard.page_fetch_in_flight = true;
            cursor
        };

        let Some(token) = self.session.token().await else {
            warn!("older page fetch skipped: no active token");
            self.inner.lock().await.page_fetch_in_flight = false;
            return;
        };

        match self
            .api
            .fetch_history(&token, HISTORY_PAGE_SIZE, Some(cursor))
            .await
        {
            Ok(page) if page.messages.is_empty() => {
                debug!(before_id = cursor, "no older history remains");
                let mut guard = self.inner.lock().await;
                guard.has_more = false;
                guard.page_fetch_in_flight = false;
            }
            Ok(page) => {
                let loaded = page.messages.len();
                let height_before = self.viewport.content_height().await;
                {
                    let mut guard = self.inner.lock().await;
                    guard.has_more = page.has_more;
                    let mut merged: Vec<ChatEntry> = page
                        .messages
                        .into_iter()
                        .map(Self::entry_from_history)
                        .collect();
                    merged.append(&mut guard.entries);
                    guard.entries = merged;
                    Self::sort_entries(&mut guard.entries);
                    guard.page_fetch_in_flight = false;
                }
                let _ = self.events.send(ClientEvent::TimelineChanged);
                let height_after = self.viewport.content_height().await;
                let delta = height_after - height_before;
                if delta != 0.0 {
                    let offset = self.viewport.scroll_offset().await;
                    self.viewport.set_scroll_offset(offset + delta).await;
                }
                info!(loaded, before_id = cursor, "older history page merged");
            }
            Err(err) => {
                // Retryable by the caller; state is untouched apart from
                // releasing the guard.
                warn!(before_id = cursor, "older history page fetch failed: {err}");
                self.inner.lock().await.page_fetch_in_flight = false;
            }
        }
    }

    /// Observe a scroll position reported by the view. Only upward motion
    /// that lands within the top proximity threshold triggers pagination.
    pub async fn on_scroll(self: &Arc<Self>, offset: f64) {
        let should_fetch = {
            let mut guard = self.inner.lock().await;
            let moving_up = offset < guard.last_scroll_offset;
            guard.last_scroll_offset = offset;
            moving_up
                && offset <= SCROLL_TOP_THRESHOLD_PX
                && guard.has_more
                && !guard.page_fetch_in_flight
                && !guard.entries.is_empty()
        };
        if should_fetch {
            let controller = Arc::clone(self);
            tokio::spawn(async move {
                controller.load_older_page().await;
            });
        }
    }

    /// Append the message optimistically, then reconcile with the server
    /// response. Empty content and a missing token leave the timeline
    /// untouched; transport and logical failures become errored assistant
    /// bubbles and are never propagated.
    pub async fn send_message(&self, text: &str) {
        let content = text.trim();
        if content.is_empty() {
            debug!("ignoring empty message send");
            return;
        }
        let Some(token) = self.session.token().await else {
            warn!("message send skipped: no active token");
            return;
        };

        let pending_id = EntryId::fresh();
        let history = {
            let mut guard = self.inner.lock().await;
            // Snapshot before the optimistic append; unconfirmed entries
            // are never sent to the server.
            let history: Vec<ChatTurn> = guard
                .entries
                .iter()
                .filter(|entry| !entry.id.is_pending())
                .map(|entry| ChatTurn {
                    role: entry.role,
                    content: entry.content.clone(),
                })
                .collect();
            guard.entries.push(ChatEntry {
                id: pending_id,
                role: ChatRole::User,
                content: content.to_string(),
                error: false,
                timestamp: Utc::now(),
            });
            Self::sort_entries(&mut guard.entries);
            history
        };
        let _ = self.events.send(ClientEvent::TimelineChanged);
        self.viewport.scroll_to_bottom().await;

        let request = ChatRequest {
            message: content.to_string(),
            conversation_history: history,
        };

        match self.api.send_chat(&token, &request).await {
            Ok(response) => {
                let mut guard = self.inner.lock().await;
                if let Some(entry) = guard.entries.iter_mut().find(|e| e.id == pending_id) {
                    entry.id = response
                        .message_id
                        .map(EntryId::Confirmed)
                        .unwrap_or_else(EntryId::fresh);
                }
                let assistant = match response.error {
                    Some(error_text) => ChatEntry {
                        id: EntryId::fresh(),
                        role: ChatRole::Assistant,
                        content: format!("Error: {error_text}"),
                        error: true,
                        timestamp: Utc::now(),
                    },
                    None => ChatEntry {
                        id: EntryId::fresh(),
                        role: ChatRole::Assistant,
                        content: response.response.unwrap_or_default(),
                        error: false,
                        timestamp: Utc::now(),
                    },
                };
                guard.entries.push(assistant);
                Self::sort_entries(&mut guard.entries);
            }
            Err(err) => {
                // The optimistic entry stays; the failure is surfaced as a
                // separate errored assistant bubble.
                warn!("message send failed: {err}");
                let mut guard = self.inner.lock().await;
                guard.entries.push(ChatEntry {
                    id: EntryId::fresh(),
                    role: ChatRole::Assistant,
                    content: format!("Failed to send message: {err}"),
                    error: true,
                    timestamp: Utc::now(),
                });
                Self::sort_entries(&mut guard.entries);
            }
        }
        let _ = self.events.send(ClientEvent::TimelineChanged);
        self.viewport.scroll_to_bottom().await;
    }
}
