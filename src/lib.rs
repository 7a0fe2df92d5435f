//! Askova — the local-first data layer of a study-quiz chat application.
//!
//! A quiz is a conversation thread; each turn is a chat message. Writes
//! land in the embedded SQLite store first (offline-first), a sync engine
//! reconciles them with the remote store opportunistically, and model
//! responses stream token by token into a placeholder message through the
//! ingestion pipeline.

pub mod config;
pub mod db;
pub mod lifecycle;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod remote;
pub mod service;
pub mod sync;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

pub use config::{Config, ConfigError};
pub use db::{DatabaseError, LocalStore, StoreChange};
pub use service::{QuizService, ServiceError, SubmitOutcome};
pub use sync::{SyncEngine, SyncError, SyncSummary};

/// Initialize tracing once at startup. RUST_LOG overrides the default
/// crate-level filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}

/// Wire the production service from configuration plus the session token
/// the auth layer obtained. Fails when the local database cannot open;
/// configuration itself must already have been loaded (and the API key
/// verified) via [`Config::from_env`].
pub fn build_service(config: &Config, session_token: &str) -> Result<QuizService, DatabaseError> {
    let store = LocalStore::open(&config.db_path)?;
    let remote: Arc<dyn remote::RemoteStore> = Arc::new(remote::http::HttpRemoteStore::new(
        &config.sync_base_url,
        session_token,
    ));
    let llm: Arc<dyn llm::GenerationClient> = Arc::new(llm::http::HttpGenerationClient::from_config(
        config,
    ));
    Ok(QuizService::new(store, remote, llm))
}
