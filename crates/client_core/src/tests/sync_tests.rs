use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use shared::{
    domain::{Provider, SyncMode},
    protocol::{SyncStatusResponse, UserProfile},
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, Mutex},
    time,
};

use crate::{
    api::{AssistantApi, HttpApiClient},
    session::SessionContext,
    sync::SyncOrchestrator,
    token_store::MemoryTokenStore,
    ClientEvent,
};

const TEST_POLL_INTERVAL: Duration = Duration::from_millis(50);
const TEST_AUTO_SYNC_DELAY: Duration = Duration::from_millis(10);

#[derive(Clone)]
struct SyncServerState {
    start_requests: Arc<Mutex<Vec<(String, String)>>>,
    fail_start_for: Arc<Mutex<Vec<String>>>,
    status: Arc<Mutex<SyncStatusResponse>>,
    fail_status: Arc<Mutex<bool>>,
    me_fetches: Arc<Mutex<u32>>,
    profile: Arc<Mutex<UserProfile>>,
}

fn profile_with(has_google: bool, has_hubspot: bool) -> UserProfile {
    UserProfile {
        id: 1,
        email: "advisor@example.com".to_string(),
        name: None,
        google_email: has_google.then(|| "advisor@gmail.com".to_string()),
        hubspot_name: has_hubspot.then(|| "Advisor Portal".to_string()),
        has_google,
        has_hubspot,
    }
}

fn syncing(gmail: bool, hubspot: bool) -> SyncStatusResponse {
    let mut status = SyncStatusResponse::default();
    status.gmail.syncing = gmail;
    status.hubspot.syncing = hubspot;
    status
}

#[derive(Deserialize)]
struct SyncStartQuery {
    mode: String,
}

async fn handle_sync_start(
    State(state): State<SyncServerState>,
    Path(provider): Path<String>,
    Query(query): Query<SyncStartQuery>,
) -> StatusCode {
    state
        .start_requests
        .lock()
        .await
        .push((provider.clone(), query.mode));
    if state.fail_start_for.lock().await.contains(&provider) {
        return StatusCode::BAD_REQUEST;
    }
    StatusCode::OK
}

async fn handle_status(
    State(state): State<SyncServerState>,
) -> Result<Json<SyncStatusResponse>, StatusCode> {
    if *state.fail_status.lock().await {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(*state.status.lock().await))
}

async fn handle_me(State(state): State<SyncServerState>) -> Json<UserProfile> {
    *state.me_fetches.lock().await += 1;
    Json(state.profile.lock().await.clone())
}

async fn spawn_sync_server(profile: UserProfile) -> Result<(String, SyncServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = SyncServerState {
        start_requests: Arc::new(Mutex::new(Vec::new())),
        fail_start_for: Arc::new(Mutex::new(Vec::new())),
        status: Arc::new(Mutex::new(SyncStatusResponse::default())),
        fail_status: Arc::new(Mutex::new(false)),
        me_fetches: Arc::new(Mutex::new(0)),
        profile: Arc::new(Mutex::new(profile)),
    };
    let app = Router::new()
        .route("/integrations/sync/:provider", post(handle_sync_start))
        .route("/integrations/status", get(handle_status))
        .route("/auth/me", get(handle_me))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

async fn setup(
    server_url: &str,
    logged_in: bool,
) -> (
    Arc<SyncOrchestrator>,
    Arc<SessionContext>,
    broadcast::Receiver<ClientEvent>,
) {
    let api: Arc<dyn AssistantApi> = Arc::new(HttpApiClient::new(server_url));
    let (events, receiver) = broadcast::channel::<ClientEvent>(256);
    let session = SessionContext::new(
        Arc::clone(&api),
        Arc::new(MemoryTokenStore::new()),
        events.clone(),
    );
    if logged_in {
        session.login("test-token").await.expect("login");
    }
    let orchestrator = SyncOrchestrator::with_timing(
        api,
        Arc::clone(&session),
        events,
        TEST_POLL_INTERVAL,
        TEST_AUTO_SYNC_DELAY,
    );
    (orchestrator, session, receiver)
}

fn drain_alerts(receiver: &mut broadcast::Receiver<ClientEvent>) -> Vec<String> {
    let mut alerts = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let ClientEvent::Alert(message) = event {
            alerts.push(message);
        }
    }
    alerts
}

#[tokio::test]
async fn explicit_start_marks_provider_and_opens_overlay() {
    let (server_url, state) = spawn_sync_server(profile_with(true, false))
        .await
        .expect("spawn server");
    *state.status.lock().await = syncing(true, false);
    let (orchestrator, _session, _rx) = setup(&server_url, true).await;
    let baseline_fetches = *state.me_fetches.lock().await;

    orchestrator.start_sync(Provider::Gmail, SyncMode::Full).await;

    let gmail = orchestrator.provider_state(Provider::Gmail).await;
    assert!(gmail.syncing);
    assert_eq!(gmail.mode, SyncMode::Full);
    assert!(orchestrator.overlay_visible().await);
    assert_eq!(orchestrator.syncing_service().await, Some(Provider::Gmail));
    assert_eq!(
        *state.start_requests.lock().await,
        vec![("gmail".to_string(), "all".to_string())]
    );

    *state.status.lock().await = syncing(false, false);
    time::timeout(Duration::from_secs(2), async {
        while orchestrator.overlay_visible().await
            || orchestrator.provider_state(Provider::Gmail).await.syncing
        {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("overlay should close once the poll reports idle");

    assert_eq!(orchestrator.syncing_service().await, None);
    // Completion refreshes the profile exactly once.
    time::sleep(TEST_POLL_INTERVAL * 4).await;
    assert_eq!(*state.me_fetches.lock().await, baseline_fetches + 1);
}

#[tokio::test]
async fn explicit_start_without_token_is_noop() {
    let (server_url, state) = spawn_sync_server(profile_with(true, true))
        .await
        .expect("spawn server");
    let (orchestrator, _session, _rx) = setup(&server_url, false).await;

    orchestrator
        .start_sync(Provider::Hubspot, SyncMode::Recent)
        .await;

    assert!(!orchestrator.provider_state(Provider::Hubspot).await.syncing);
    assert!(!orchestrator.overlay_visible().await);
    assert!(state.start_requests.lock().await.is_empty());
}

#[tokio::test]
async fn explicit_start_failure_reverts_provider_and_alerts() {
    let (server_url, state) = spawn_sync_server(profile_with(true, true))
        .await
        .expect("spawn server");
    state.fail_start_for.lock().await.push("gmail".to_string());
    let (orchestrator, _session, mut rx) = setup(&server_url, true).await;

    orchestrator.start_sync(Provider::Gmail, SyncMode::Recent).await;

    assert!(!orchestrator.provider_state(Provider::Gmail).await.syncing);
    assert!(!orchestrator.provider_state(Provider::Hubspot).await.syncing);
    assert!(!orchestrator.overlay_visible().await);
    assert_eq!(orchestrator.syncing_service().await, None);

    let alerts = drain_alerts(&mut rx);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("gmail"));
}

#[tokio::test]
async fn auto_sync_starts_both_linked_providers_in_recent_mode() {
    let (server_url, state) = spawn_sync_server(profile_with(true, true))
        .await
        .expect("spawn server");
    *state.status.lock().await = syncing(true, true);
    let (orchestrator, _session, _rx) = setup(&server_url, true).await;
    let baseline_fetches = *state.me_fetches.lock().await;

    orchestrator.on_session_ready().await;

    time::timeout(Duration::from_secs(2), async {
        while state.start_requests.lock().await.len() < 2 {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both linked providers should be auto-started");

    let mut requests = state.start_requests.lock().await.clone();
    requests.sort();
    assert_eq!(
        requests,
        vec![
            ("gmail".to_string(), "month".to_string()),
            ("hubspot".to_string(), "month".to_string()),
        ]
    );
    assert!(orchestrator.overlay_visible().await);
    // Both providers are active; the overlay names the first provider type.
    assert_eq!(orchestrator.syncing_service().await, Some(Provider::Gmail));

    *state.status.lock().await = syncing(false, false);
    time::timeout(Duration::from_secs(2), async {
        while orchestrator.overlay_visible().await {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("overlay should close once both providers go idle");

    time::sleep(TEST_POLL_INTERVAL * 4).await;
    assert_eq!(*state.me_fetches.lock().await, baseline_fetches + 1);
}

#[tokio::test]
async fn auto_sync_runs_at_most_once_per_session() {
    let (server_url, state) = spawn_sync_server(profile_with(true, false))
        .await
        .expect("spawn server");
    *state.status.lock().await = syncing(true, false);
    let (orchestrator, _session, _rx) = setup(&server_url, true).await;

    orchestrator.on_session_ready().await;
    orchestrator.on_session_ready().await;

    time::sleep(TEST_AUTO_SYNC_DELAY * 10).await;
    assert_eq!(
        *state.start_requests.lock().await,
        vec![("gmail".to_string(), "month".to_string())]
    );
}

#[tokio::test]
async fn auto_sync_failure_resets_only_affected_provider_without_alert() {
    let (server_url, state) = spawn_sync_server(profile_with(true, true))
        .await
        .expect("spawn server");
    state.fail_start_for.lock().await.push("gmail".to_string());
    *state.status.lock().await = syncing(false, true);
    let (orchestrator, _session, mut rx) = setup(&server_url, true).await;

    orchestrator.on_session_ready().await;

    time::timeout(Duration::from_secs(2), async {
        while state.start_requests.lock().await.len() < 2 {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both auto-starts should be issued");

    // Let the start responses land before inspecting the revert.
    time::sleep(Duration::from_millis(100)).await;

    assert!(!orchestrator.provider_state(Provider::Gmail).await.syncing);
    assert!(orchestrator.provider_state(Provider::Hubspot).await.syncing);
    assert!(orchestrator.overlay_visible().await);
    assert_eq!(orchestrator.syncing_service().await, Some(Provider::Hubspot));
    assert!(drain_alerts(&mut rx).is_empty());
}

#[tokio::test]
async fn poll_failure_never_demotes_a_syncing_provider() {
    let (server_url, state) = spawn_sync_server(profile_with(true, false))
        .await
        .expect("spawn server");
    *state.status.lock().await = syncing(true, false);
    let (orchestrator, _session, _rx) = setup(&server_url, true).await;

    orchestrator.start_sync(Provider::Gmail, SyncMode::Recent).await;
    *state.fail_status.lock().await = true;

    time::sleep(TEST_POLL_INTERVAL * 5).await;
    assert!(orchestrator.provider_state(Provider::Gmail).await.syncing);
    assert!(orchestrator.overlay_visible().await);

    *state.fail_status.lock().await = false;
    *state.status.lock().await = syncing(false, false);
    time::timeout(Duration::from_secs(2), async {
        while orchestrator.provider_state(Provider::Gmail).await.syncing {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recovered poll should apply idle state");
    assert!(!orchestrator.overlay_visible().await);
}

#[tokio::test]
async fn dismiss_hides_overlay_without_touching_provider_state() {
    let (server_url, state) = spawn_sync_server(profile_with(true, false))
        .await
        .expect("spawn server");
    *state.status.lock().await = syncing(true, false);
    let (orchestrator, _session, _rx) = setup(&server_url, true).await;

    orchestrator.start_sync(Provider::Gmail, SyncMode::Recent).await;
    orchestrator.dismiss_overlay().await;

    assert!(!orchestrator.overlay_visible().await);
    assert!(orchestrator.provider_state(Provider::Gmail).await.syncing);

    // Polls keep applying silently and never re-show the overlay for the
    // sync that is already tracked.
    time::sleep(TEST_POLL_INTERVAL * 4).await;
    assert!(!orchestrator.overlay_visible().await);
    assert!(orchestrator.provider_state(Provider::Gmail).await.syncing);

    *state.status.lock().await = syncing(false, false);
    time::timeout(Duration::from_secs(2), async {
        while orchestrator.provider_state(Provider::Gmail).await.syncing {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("poll should settle to idle");

    // The all-idle boundary re-arms the overlay for the next sync.
    *state.status.lock().await = syncing(true, false);
    orchestrator.start_sync(Provider::Gmail, SyncMode::Recent).await;
    assert!(orchestrator.overlay_visible().await);
}

#[tokio::test]
async fn polling_restarts_when_a_new_sync_begins() {
    let (server_url, state) = spawn_sync_server(profile_with(true, false))
        .await
        .expect("spawn server");
    *state.status.lock().await = syncing(true, false);
    let (orchestrator, _session, _rx) = setup(&server_url, true).await;
    let baseline_fetches = *state.me_fetches.lock().await;

    orchestrator.start_sync(Provider::Gmail, SyncMode::Recent).await;
    *state.status.lock().await = syncing(false, false);
    time::timeout(Duration::from_secs(2), async {
        while orchestrator.provider_state(Provider::Gmail).await.syncing {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first sync should settle");
    assert_eq!(*state.me_fetches.lock().await, baseline_fetches + 1);

    // The loop exited; a fresh start must bring it back.
    *state.status.lock().await = syncing(true, false);
    orchestrator.start_sync(Provider::Gmail, SyncMode::Full).await;
    assert!(orchestrator.overlay_visible().await);

    *state.status.lock().await = syncing(false, false);
    time::timeout(Duration::from_secs(2), async {
        while orchestrator.overlay_visible().await {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second sync should settle");
    assert_eq!(*state.me_fetches.lock().await, baseline_fetches + 2);
}

#[tokio::test]
async fn shutdown_aborts_background_tasks() {
    let (server_url, state) = spawn_sync_server(profile_with(true, false))
        .await
        .expect("spawn server");
    *state.status.lock().await = syncing(true, false);
    let (orchestrator, _session, _rx) = setup(&server_url, true).await;

    orchestrator.start_sync(Provider::Gmail, SyncMode::Recent).await;
    orchestrator.shutdown().await;

    // With the poll task gone, a later idle report is never applied.
    *state.status.lock().await = syncing(false, false);
    time::sleep(TEST_POLL_INTERVAL * 4).await;
    assert!(orchestrator.provider_state(Provider::Gmail).await.syncing);
}
