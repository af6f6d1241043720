//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a client can start with zero
//! configuration for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use murmur_shared::constants::{
    CHAT_REQUEST_COOLDOWN_HOURS, MAX_BLOB_SIZE, MAX_MESSAGE_LEN, TYPING_IDLE_MS,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite database file.
    /// Env: `MURMUR_DB_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Directory blobs (avatars, attachments, group icons) are written to.
    /// Env: `MURMUR_BLOB_PATH`
    /// Default: `./blobs`
    pub blob_path: PathBuf,

    /// Public URL prefix of uploaded blobs.
    /// Env: `MURMUR_BLOB_BASE_URL`
    /// Default: `file://./blobs`
    pub blob_base_url: String,

    /// How long a requester waits after a denial before asking again.
    /// Env: `MURMUR_REQUEST_COOLDOWN_HOURS`
    /// Default: 24 hours.
    pub request_cooldown: chrono::Duration,

    /// Idle window after which an unanswered "typing" clears itself.
    /// Env: `MURMUR_TYPING_IDLE_MS`
    /// Default: 3000 ms.
    pub typing_idle: Duration,

    /// Maximum message length in characters.
    /// Env: `MURMUR_MAX_MESSAGE_LEN`
    pub max_message_len: usize,

    /// Maximum attachment size in bytes.
    /// Env: `MURMUR_MAX_BLOB_SIZE`
    pub max_blob_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            blob_path: PathBuf::from("./blobs"),
            blob_base_url: "file://./blobs".to_string(),
            request_cooldown: chrono::Duration::hours(CHAT_REQUEST_COOLDOWN_HOURS),
            typing_idle: Duration::from_millis(TYPING_IDLE_MS),
            max_message_len: MAX_MESSAGE_LEN,
            max_blob_size: MAX_BLOB_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("MURMUR_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(path) = lookup("MURMUR_BLOB_PATH") {
            config.blob_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("MURMUR_BLOB_BASE_URL") {
            config.blob_base_url = url;
        }

        if let Some(hours) = parse::<i64>(&lookup, "MURMUR_REQUEST_COOLDOWN_HOURS") {
            if hours >= 0 {
                config.request_cooldown = chrono::Duration::hours(hours);
            } else {
                tracing::warn!(value = hours, "Negative MURMUR_REQUEST_COOLDOWN_HOURS, using default");
            }
        }

        if let Some(ms) = parse::<u64>(&lookup, "MURMUR_TYPING_IDLE_MS") {
            config.typing_idle = Duration::from_millis(ms);
        }

        if let Some(len) = parse::<usize>(&lookup, "MURMUR_MAX_MESSAGE_LEN") {
            config.max_message_len = len;
        }

        if let Some(size) = parse::<usize>(&lookup, "MURMUR_MAX_BLOB_SIZE") {
            config.max_blob_size = size;
        }

        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
