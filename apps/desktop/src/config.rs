use std::fs;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub token_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            token_path: "./data/session_token.json".into(),
        }
    }
}

/// Defaults, overlaid by `client.toml` in the working directory, overlaid
/// by `APP__*` environment variables.
pub fn load_settings() -> Settings {
    let mut settings = fs::read_to_string("client.toml")
        .ok()
        .and_then(|raw| toml::from_str::<Settings>(&raw).ok())
        .unwrap_or_default();

    if let Ok(v) = std::env::var("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("APP__TOKEN_PATH") {
        settings.token_path = v;
    }

    settings
}
