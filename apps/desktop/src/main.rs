use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use client_core::{ClientCore, ClientEvent, FileTokenStore, HttpApiClient, NullViewport};
use shared::domain::{ChatRole, Provider, SyncMode};

mod config;

#[derive(Parser, Debug)]
struct Args {
    /// Base URL of the assistant API; overrides client.toml and env.
    #[arg(long)]
    server_url: Option<String>,
    /// Token issued by the identity provider; persisted for later runs.
    #[arg(long)]
    token: Option<String>,
    /// Message to send once the timeline is loaded.
    #[arg(long)]
    send: Option<String>,
    /// Start a sync for a provider (gmail or hubspot).
    #[arg(long)]
    sync: Option<String>,
    /// Import everything instead of the recent window.
    #[arg(long)]
    full: bool,
    /// Keep running and print events until syncs settle.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let settings = config::load_settings();

    let server_url = args.server_url.unwrap_or(settings.server_url);
    let api = Arc::new(HttpApiClient::new(&server_url));
    let store = Arc::new(FileTokenStore::new(&settings.token_path));
    let core = ClientCore::new(api, store, Arc::new(NullViewport));
    let mut events = core.subscribe_events();

    match args.token.as_deref() {
        Some(token) => core.login(token).await?,
        None => core.start().await?,
    }
    if !core.session.is_ready().await {
        return Err(anyhow!(
            "no usable session at {server_url}; pass --token <jwt> to sign in"
        ));
    }
    if let Some(user) = core.session.user().await {
        println!("Signed in as {}", user.email);
    }

    for entry in core.timeline.entries().await {
        print_entry(&entry);
    }

    if let Some(text) = args.send {
        core.timeline.send_message(&text).await;
        if let Some(reply) = core.timeline.entries().await.last() {
            print_entry(reply);
        }
    }

    if let Some(provider) = args.sync.as_deref() {
        let provider = match provider {
            "gmail" => Provider::Gmail,
            "hubspot" => Provider::Hubspot,
            other => return Err(anyhow!("unknown provider '{other}'")),
        };
        let mode = if args.full {
            SyncMode::Full
        } else {
            SyncMode::Recent
        };
        core.sync.start_sync(provider, mode).await;
    }

    if args.watch {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::SyncOverlayChanged {
                    visible: true,
                    service: Some(provider),
                } => println!("Syncing {provider}..."),
                ClientEvent::SyncOverlayChanged { visible: false, .. } => {
                    println!("Sync complete.");
                    break;
                }
                ClientEvent::Alert(message) => println!("! {message}"),
                _ => {}
            }
        }
    }

    core.shutdown().await;
    Ok(())
}

fn print_entry(entry: &shared::domain::ChatEntry) {
    let speaker = match entry.role {
        ChatRole::User => "you",
        ChatRole::Assistant => "assistant",
    };
    let marker = if entry.error { " [error]" } else { "" };
    println!(
        "[{}] {speaker}{marker}: {}",
        entry.timestamp.format("%Y-%m-%d %H:%M"),
        entry.content
    );
}
