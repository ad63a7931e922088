use std::{collections::HashMap, fs, path::Path};

use chrono::Duration;
use serde::Deserialize;
use server_api::GameRules;
use tracing::warn;

const MAX_LOBBY_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub lobby_ttl_seconds: i64,
    pub cleanup_interval_seconds: u64,
    pub min_players: usize,
    pub max_players: usize,
    pub max_entry_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            database_url: "memory".into(),
            lobby_ttl_seconds: 24 * 60 * 60,
            cleanup_interval_seconds: 60 * 60,
            min_players: 3,
            max_players: 16,
            max_entry_bytes: 2 * 1024 * 1024,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn game_rules(&self) -> GameRules {
        GameRules {
            min_players: self.min_players,
            max_players: self.max_players,
            lobby_ttl: Duration::try_seconds(self.lobby_ttl_seconds)
                .unwrap_or_else(|| GameRules::default().lobby_ttl),
            max_entry_bytes: self.max_entry_bytes,
            ..GameRules::default()
        }
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new("server.toml"), |key| std::env::var(key).ok())
}

/// Defaults, then the flat `key = value` table in `path` if present, then
/// environment variables.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => {
                for (key, value) in file_cfg {
                    let value = match value {
                        toml::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    apply(&mut settings, &key, value);
                }
            }
            Err(error) => warn!(path = %path.display(), %error, "ignoring unreadable settings file"),
        }
    }

    let overrides = [
        ("SERVER_BIND", "bind_addr"),
        ("APP__BIND_ADDR", "bind_addr"),
        ("DATABASE_URL", "database_url"),
        ("APP__DATABASE_URL", "database_url"),
        ("APP__LOBBY_TTL_SECONDS", "lobby_ttl_seconds"),
        ("APP__CLEANUP_INTERVAL_SECONDS", "cleanup_interval_seconds"),
        ("APP__MIN_PLAYERS", "min_players"),
        ("APP__MAX_PLAYERS", "max_players"),
        ("APP__MAX_ENTRY_BYTES", "max_entry_bytes"),
        ("APP__MAX_BODY_BYTES", "max_body_bytes"),
    ];
    for (var, key) in overrides {
        if let Some(value) = env(var) {
            apply(&mut settings, key, value);
        }
    }

    settings
}

fn apply(settings: &mut Settings, key: &str, value: String) {
    match key {
        "bind_addr" | "server_bind" => settings.server_bind = value,
        "database_url" => settings.database_url = value,
        "lobby_ttl_seconds" => {
            let mut ttl = settings.lobby_ttl_seconds;
            set_parsed(&mut ttl, key, &value);
            if (1..=MAX_LOBBY_TTL_SECONDS).contains(&ttl) {
                settings.lobby_ttl_seconds = ttl;
            } else {
                warn!(key, value = %value, "ignoring lobby ttl outside 1s..=365d");
            }
        }
        "cleanup_interval_seconds" => {
            set_parsed(&mut settings.cleanup_interval_seconds, key, &value)
        }
        "min_players" => set_parsed(&mut settings.min_players, key, &value),
        "max_players" => set_parsed(&mut settings.max_players, key, &value),
        "max_entry_bytes" => set_parsed(&mut settings.max_entry_bytes, key, &value),
        "max_body_bytes" => set_parsed(&mut settings.max_body_bytes, key, &value),
        _ => warn!(key, "unknown setting"),
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value, "ignoring setting that does not parse"),
    }
}

/// `memory` (or nothing) keeps sessions in process; everything else becomes
/// a sqlite url.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() || raw_database_url.eq_ignore_ascii_case("memory") {
        return "memory".to_string();
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
