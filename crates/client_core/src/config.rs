use std::{collections::HashMap, fs, time::Duration};

/// Per-session tunables. A composition layer builds one `Settings`
/// value (defaults, optionally overlaid from `client.toml` and
/// `APP__*` environment variables) and injects it into
/// [`crate::QuizSession`]; nothing in this crate reads globals after
/// construction.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    /// CSRF token supplied by the hosting page.
    pub auth_token: String,
    /// Bound on reconnect attempts after a live-channel loss. Once
    /// exhausted the session polls for the rest of its lifetime.
    pub max_reconnect_attempts: u32,
    /// Delay before reconnect attempt k is `base * 2^(k-1)`.
    pub reconnect_base_delay: Duration,
    /// Status-poll cadence for pending submissions in degraded mode.
    pub submission_poll_interval: Duration,
    /// Unread-badge poll cadence in degraded mode.
    pub badge_poll_interval: Duration,
    /// Capacity of the broadcast channel carrying UI events.
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            auth_token: String::new(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
            submission_poll_interval: Duration::from_secs(2),
            badge_poll_interval: Duration::from_secs(30),
            event_buffer: 1024,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("client.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_overrides(&mut settings, |key| file_cfg.get(key).cloned());
        }
    }

    apply_overrides(&mut settings, |key| {
        std::env::var(format!("APP__{}", key.to_uppercase())).ok()
    });

    settings
}

fn apply_overrides(settings: &mut Settings, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("server_url") {
        settings.server_url = v;
    }
    if let Some(v) = get("auth_token") {
        settings.auth_token = v;
    }
    if let Some(v) = get("max_reconnect_attempts") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.max_reconnect_attempts = parsed;
        }
    }
    if let Some(v) = get("reconnect_base_delay_ms") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reconnect_base_delay = Duration::from_millis(parsed);
        }
    }
    if let Some(v) = get("submission_poll_interval_ms") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.submission_poll_interval = Duration::from_millis(parsed);
        }
    }
    if let Some(v) = get("badge_poll_interval_ms") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.badge_poll_interval = Duration::from_millis(parsed);
        }
    }
    if let Some(v) = get("event_buffer") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_buffer = parsed;
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
