//! Configuration for the Vida Plena server.
//!
//! All configuration comes from environment variables, resolved once at
//! startup. Three values are mandatory and their absence is a fatal
//! startup error rather than a per-request one:
//!
//! - `GEMINI_API_KEY` — credential for the remote generative model
//! - `PLENA_DB_PATH` — path to the SQLite database file
//! - `SESSION_SECRET` — deployment secret for the session layer
//!
//! Everything else has a sensible default.

use anyhow::{bail, Result};
use std::path::PathBuf;

/// Default HTTP port when `PORT` is not set.
const DEFAULT_PORT: u16 = 3000;

/// Default Gemini model when `GEMINI_MODEL` is not set.
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the remote generative-language service.
    pub gemini_api_key: String,
    /// Model identifier sent to the remote service.
    pub gemini_model: String,
    /// Path to the SQLite database holding users, sessions, and newsletter.
    pub db_path: PathBuf,
    /// Deployment-level session secret. Sessions are opaque server-side
    /// records, so this is entropy for the deployment rather than a
    /// signing key, but it must still be configured.
    pub session_secret: String,
    /// Port to bind.
    pub port: u16,
    /// Whether we run in production (enables the `Secure` cookie flag).
    pub production: bool,
    /// Base log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format: "json" or "pretty".
    pub log_format: String,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Fails if any required variable is missing or empty.
    pub fn from_env() -> Result<Self> {
        let gemini_api_key = required("GEMINI_API_KEY")?;
        let db_path = PathBuf::from(required("PLENA_DB_PATH")?);
        let session_secret = required("SESSION_SECRET")?;

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("PORT is not a valid port number: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        };

        let production = std::env::var("PLENA_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        Ok(Self {
            gemini_api_key,
            gemini_model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            db_path,
            session_secret,
            port,
            production,
            log_level: std::env::var("PLENA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("PLENA_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
        })
    }
}

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("required environment variable {name} is not set"),
    }
}
