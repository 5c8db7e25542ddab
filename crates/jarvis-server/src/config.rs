//! Gateway configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the gateway can start with zero
//! configuration on a desktop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use jarvis_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_WAKE_THRESHOLD, DEFAULT_WAKE_WORD, MAX_UPLOAD_SIZE,
    TELEMETRY_INTERVAL_SECS,
};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `127.0.0.1:8000`
    pub http_addr: SocketAddr,

    /// SQLite file holding the settings document.
    /// Env: `DB_PATH`
    /// Default: `./db/settings.db`
    pub db_path: PathBuf,

    /// Managed directory for uploaded face images.
    /// Env: `FACES_DIR`
    /// Default: `./faces`
    pub faces_dir: PathBuf,

    /// Period of the telemetry push loop.
    /// Env: `TELEMETRY_INTERVAL_SECS`
    /// Default: 5 seconds
    pub telemetry_interval: Duration,

    /// Token a decoder hypothesis must contain to count as a wake-up.
    /// Env: `WAKE_WORD`
    /// Default: `jarvis`
    pub wake_word: String,

    /// Minimum hypothesis confidence (0..=1) for a detection.
    /// Env: `WAKE_THRESHOLD`
    /// Default: `0.5`
    pub wake_threshold: f32,

    /// Maximum size of one uploaded face image.
    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 10 MiB
    pub max_upload_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_addr: ([127, 0, 0, 1], DEFAULT_HTTP_PORT).into(),
            db_path: PathBuf::from("./db/settings.db"),
            faces_dir: PathBuf::from("./faces"),
            telemetry_interval: Duration::from_secs(TELEMETRY_INTERVAL_SECS),
            wake_word: DEFAULT_WAKE_WORD.to_string(),
            wake_threshold: DEFAULT_WAKE_THRESHOLD,
            max_upload_size: MAX_UPLOAD_SIZE,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Some(path) = var("FACES_DIR") {
            config.faces_dir = PathBuf::from(path);
        }

        if let Some(val) = var("TELEMETRY_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.telemetry_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid TELEMETRY_INTERVAL_SECS, using default"),
            }
        }

        if let Some(word) = var("WAKE_WORD") {
            let word = word.trim().to_lowercase();
            if !word.is_empty() {
                config.wake_word = word;
            }
        }

        if let Some(val) = var("WAKE_THRESHOLD") {
            match parse_threshold(&val) {
                Ok(threshold) => config.wake_threshold = threshold,
                Err(e) => tracing::warn!(error = %e, "Invalid WAKE_THRESHOLD, using default"),
            }
        }

        if let Some(val) = var("MAX_UPLOAD_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_upload_size = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_threshold(value: &str) -> Result<f32, String> {
    let threshold: f32 = value
        .trim()
        .parse()
        .map_err(|e| format!("{value:?}: {e}"))?;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(format!("{threshold} is outside 0..=1"));
    }
    Ok(threshold)
}
