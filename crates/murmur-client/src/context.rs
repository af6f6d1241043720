//! Collaborators shared by every component of a client.

use std::sync::Arc;

use murmur_realtime::{Realtime, RealtimeHub};
use murmur_shared::{Clock, SystemClock, UserId};
use murmur_store::{BlobStore, Database, FsBlobStore, SqliteStore, StoreClient};

use crate::config::ClientConfig;
use crate::directory::Directory;
use crate::error::Result;
use crate::events::EventBus;
use crate::state::SharedState;

/// The external services a client talks to. Clients built from clones of the
/// same `Backend` see each other's writes.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn StoreClient>,
    pub realtime: Arc<dyn Realtime>,
    pub blobs: Arc<dyn BlobStore>,
    pub clock: Arc<dyn Clock>,
}

impl Backend {
    /// SQLite store at the configured path, echoed through an in-process hub,
    /// with blobs on the local filesystem.
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let db = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        let blobs = FsBlobStore::new(
            config.blob_path.clone(),
            &config.blob_base_url,
            config.max_blob_size,
        )
        .await?;

        Ok(Self::assemble(db, Arc::new(blobs), Arc::new(SystemClock)))
    }

    /// Wire `db` to a fresh realtime hub so every write is echoed.
    pub fn assemble(db: Database, blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        let hub = RealtimeHub::new();
        let store = SqliteStore::new(db).with_change_sink(Arc::new(hub.clone()));
        Self {
            store: Arc::new(store),
            realtime: Arc::new(hub),
            blobs,
            clock,
        }
    }
}

/// Everything a component needs, cloned into each of them.
#[derive(Clone)]
pub(crate) struct Context {
    pub me: UserId,
    pub backend: Backend,
    pub config: Arc<ClientConfig>,
    pub state: SharedState,
    pub events: EventBus,
    pub directory: Directory,
}

impl Context {
    pub fn store(&self) -> &dyn StoreClient {
        self.backend.store.as_ref()
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.backend.clock.now()
    }
}
