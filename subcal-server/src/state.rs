use std::sync::Arc;

use anyhow::Result;
use subcal_core::{CalendarMeta, SqliteStore, SubscriptionStore};
use tracing::info;

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    // Each store call opens and closes its own connection
    pub store: Arc<dyn SubscriptionStore>,
    pub meta: Arc<CalendarMeta>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let store = SqliteStore::new(config.database_path());

        // Leave an existing database alone; only bootstrap a missing one
        if !store.path().exists() {
            info!(path = %store.path().display(), "Creating empty database");
            store.init_schema()?;
        }

        Ok(Self::with_store(Arc::new(store), config.calendar_meta()))
    }

    pub fn with_store(store: Arc<dyn SubscriptionStore>, meta: CalendarMeta) -> Self {
        AppState {
            store,
            meta: Arc::new(meta),
        }
    }
}
