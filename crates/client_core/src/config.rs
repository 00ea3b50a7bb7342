use std::fs;

use shared::protocol::NEW_MESSAGE_EVENT;
use tracing::warn;

pub const SETTINGS_FILE: &str = "chat_client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub request_timeout_secs: u64,
    /// Capacity of the session event broadcast channel.
    pub event_buffer: usize,
    /// Push event name carrying new messages.
    pub push_event: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5001/api".into(),
            request_timeout_secs: 15,
            event_buffer: 256,
            push_event: NEW_MESSAGE_EVENT.into(),
        }
    }
}

/// Defaults, then `chat_client.toml` in the working directory, then the environment.
pub fn load_settings() -> ClientSettings {
    let file = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Some(raw) = file_contents {
        match raw.parse::<toml::Table>() {
            Ok(table) => {
                let file_cfg: std::collections::HashMap<&str, String> = table
                    .iter()
                    .map(|(key, value)| (key.as_str(), scalar_to_string(value)))
                    .collect();
                if let Some(v) = file_cfg.get("server_url") {
                    settings.server_url = v.clone();
                }
                if let Some(v) = file_cfg.get("request_timeout_secs") {
                    apply_parsed(&mut settings.request_timeout_secs, "request_timeout_secs", v);
                }
                if let Some(v) = file_cfg.get("event_buffer") {
                    apply_parsed(&mut settings.event_buffer, "event_buffer", v);
                }
                if let Some(v) = file_cfg.get("push_event") {
                    settings.push_event = v.clone();
                }
            }
            Err(err) => warn!("config: ignoring malformed {SETTINGS_FILE}: {err}"),
        }
    }

    if let Some(v) = env("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        apply_parsed(&mut settings.request_timeout_secs, "APP__REQUEST_TIMEOUT_SECS", &v);
    }
    if let Some(v) = env("APP__EVENT_BUFFER") {
        apply_parsed(&mut settings.event_buffer, "APP__EVENT_BUFFER", &v);
    }
    if let Some(v) = env("APP__PUSH_EVENT") {
        settings.push_event = v;
    }

    settings.event_buffer = settings.event_buffer.max(1);
    settings
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn apply_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("config: ignoring non-numeric value for {key}: {raw}"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
