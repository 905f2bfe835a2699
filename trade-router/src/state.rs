use crate::auth::{PlatformVerifier, SignatureVerifier};
use crate::config::Config;
use crate::db::Database;
use std::sync::Arc;
use swapbook_matching_engine::{EngineConfig, LogEntry, MatchingEngine, OrderRepository};

/// Application state - shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchingEngine>,
    /// Same repository the engine writes to; used for the audit log
    pub book: Arc<dyn OrderRepository>,
    pub verifier: Arc<dyn SignatureVerifier>,
}

impl AppState {
    pub fn new(
        book: Arc<dyn OrderRepository>,
        verifier: Arc<dyn SignatureVerifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine: Arc::new(MatchingEngine::new(book.clone(), config)),
            book,
            verifier,
        }
    }

    /// Open the SQLite book named by `config`
    pub fn open(config: &Config) -> rusqlite::Result<Self> {
        // Ensure data directory exists
        if config.db_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(path = %parent.display(), error = %e, "Could not create data directory");
                }
            }
        }

        let db = Database::new(&config.db_path)?;
        Ok(Self::new(Arc::new(db), Arc::new(PlatformVerifier), config.engine))
    }

    /// Record a rejected submission
    pub fn audit(&self, message: impl Into<String>) {
        if let Err(e) = self.book.append_log(&LogEntry::new(message)) {
            tracing::error!(error = %e, "Failed to write audit log entry");
        }
    }
}
