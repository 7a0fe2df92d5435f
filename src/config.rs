//! Application configuration.
//!
//! Paths are fixed relative to the user's home directory; everything else
//! comes from environment variables at startup (a `.env` file is honoured
//! for local development). The LLM provider API key is mandatory: without
//! it the application cannot start.

use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Askova";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the LLM provider API key. Mandatory.
pub const API_KEY_VAR: &str = "ASKOVA_API_KEY";
/// Environment variable overriding the generation endpoint base URL.
pub const LLM_URL_VAR: &str = "ASKOVA_LLM_URL";
/// Environment variable overriding the sync server base URL.
pub const SYNC_URL_VAR: &str = "ASKOVA_SYNC_URL";
/// Environment variable overriding the local database path.
pub const DB_PATH_VAR: &str = "ASKOVA_DB_PATH";

const DEFAULT_LLM_URL: &str = "https://api.askova.app";
const DEFAULT_SYNC_URL: &str = "https://api.askova.app";

/// A configuration loading failure. Missing the API key is startup-fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Get the application data directory
/// ~/Askova/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Askova")
}

/// Default path of the local SQLite database.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("askova.db")
}

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "askova=info".to_string()
}

/// Runtime settings loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// LLM provider API key. Absence is a startup error, not a runtime one.
    pub api_key: String,
    /// Base URL of the streaming generation endpoint.
    pub llm_base_url: String,
    /// Base URL of the remote store RPC surface.
    pub sync_base_url: String,
    /// Location of the local database file.
    pub db_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// A `.env` file in the current directory is loaded first for local
    /// development; this is skipped under test to keep tests hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup(API_KEY_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar(API_KEY_VAR.to_string()))?;

        let llm_base_url = lookup(LLM_URL_VAR).unwrap_or_else(|| DEFAULT_LLM_URL.to_string());
        let sync_base_url = lookup(SYNC_URL_VAR).unwrap_or_else(|| DEFAULT_SYNC_URL.to_string());
        let db_path = lookup(DB_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        Ok(Self {
            api_key,
            llm_base_url,
            sync_base_url,
            db_path,
        })
    }
}
