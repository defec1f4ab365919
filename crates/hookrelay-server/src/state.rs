//! Shared application state.

use std::sync::Arc;

use hookrelay_core::{DynCatalog, InMemoryCatalog};
use hookrelay_db_postgres::PostgresBackend;
use hookrelay_delivery::{DynDeliveryQueue, InMemoryDeliveryQueue};
use hookrelay_routing::{DestinationResolver, FanoutCoordinator, LocalResolutionCache};
use tracing::info;

use crate::config::{AppConfig, StorageBackend};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub resolver: DestinationResolver,
    pub fanout: FanoutCoordinator,
    pub queue: DynDeliveryQueue,
    /// Concrete cache handle, used to run the purge task.
    pub cache: Arc<LocalResolutionCache>,
    /// Set when running on PostgreSQL, so the pool can be closed on shutdown.
    pub postgres: Option<PostgresBackend>,
}

impl AppState {
    /// Wires resolver, cache and fan-out over the given catalog and queue.
    pub fn new(config: AppConfig, catalog: DynCatalog, queue: DynDeliveryQueue) -> Self {
        let cache = Arc::new(LocalResolutionCache::new(config.cache.ttl()));
        let resolver = DestinationResolver::new(catalog, cache.clone());
        let fanout = FanoutCoordinator::new(
            resolver.clone(),
            queue.clone(),
            config.delivery.retry_policy(),
        );

        Self {
            config: Arc::new(config),
            resolver,
            fanout,
            queue,
            cache,
            postgres: None,
        }
    }

    /// State over fresh in-memory catalog and queue.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryCatalog::new()),
            Arc::new(InMemoryDeliveryQueue::new()),
        )
    }

    /// Builds the state for the configured storage backend, connecting to
    /// PostgreSQL and applying migrations when selected.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("Using in-memory catalog and delivery queue");
                Ok(Self::in_memory(config))
            }
            StorageBackend::Postgres => {
                let pg_config = config.storage.postgres.to_postgres_config();
                let backend = PostgresBackend::connect(&pg_config).await?;
                info!("Using PostgreSQL catalog and delivery queue");

                let catalog: DynCatalog = Arc::new(backend.catalog());
                let queue: DynDeliveryQueue = Arc::new(backend.delivery_queue());
                let mut state = Self::new(config, catalog, queue);
                state.postgres = Some(backend);
                Ok(state)
            }
        }
    }

    pub fn catalog(&self) -> &DynCatalog {
        self.resolver.catalog()
    }
}
