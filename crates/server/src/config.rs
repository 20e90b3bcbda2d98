use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub server_public_url: Option<String>,
    pub session_secret: String,
    pub session_ttl_seconds: i64,
    pub max_media_bytes: usize,
    /// Seeds the `admin` credential on startup when no operator exists yet.
    pub bootstrap_admin_password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/tracking.db".into(),
            server_public_url: None,
            session_secret: "dev-session-secret".into(),
            session_ttl_seconds: 8 * 3600,
            max_media_bytes: 20 * 1024 * 1024,
            bootstrap_admin_password: None,
        }
    }
}

impl Settings {
    /// Base URL used when building links to stored media.
    pub fn public_base_url(&self) -> String {
        match self.server_public_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("http://{}", self.server_bind),
        }
    }

    fn apply_file(&mut self, file_cfg: &HashMap<String, String>) {
        if let Some(v) = file_cfg.get("bind_addr") {
            self.server_bind = v.clone();
        }
        if let Some(v) = file_cfg.get("database_url") {
            self.database_url = v.clone();
        }
        if let Some(v) = file_cfg.get("server_public_url") {
            self.server_public_url = Some(v.clone());
        }
        if let Some(v) = file_cfg.get("session_secret") {
            self.session_secret = v.clone();
        }
        if let Some(v) = file_cfg.get("session_ttl_seconds") {
            parse_into(v, "session_ttl_seconds", &mut self.session_ttl_seconds);
        }
        if let Some(v) = file_cfg.get("max_media_bytes") {
            parse_into(v, "max_media_bytes", &mut self.max_media_bytes);
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("SERVER_BIND") {
            self.server_bind = v;
        }
        if let Some(v) = var("APP__BIND_ADDR") {
            self.server_bind = v;
        }

        if let Some(v) = var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = var("APP__DATABASE_URL") {
            self.database_url = v;
        }

        if let Some(v) = var("SERVER_PUBLIC_URL") {
            self.server_public_url = Some(v);
        }

        if let Some(v) = var("APP__SESSION_SECRET") {
            self.session_secret = v;
        }
        if let Some(v) = var("APP__SESSION_TTL_SECONDS") {
            parse_into(&v, "APP__SESSION_TTL_SECONDS", &mut self.session_ttl_seconds);
        }
        if let Some(v) = var("APP__MAX_MEDIA_BYTES") {
            parse_into(&v, "APP__MAX_MEDIA_BYTES", &mut self.max_media_bytes);
        }
        if let Some(v) = var("APP__ADMIN_PASSWORD") {
            self.bootstrap_admin_password = Some(v);
        }
    }
}

fn parse_into<T: std::str::FromStr>(raw: &str, key: &str, slot: &mut T) {
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value = raw, "ignoring unparsable setting"),
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => settings.apply_file(&file_cfg),
            Err(error) => warn!(%error, "server.toml is not a flat string table; ignoring it"),
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
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

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
