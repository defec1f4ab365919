//! Identifier → destination resolution.

use std::collections::HashSet;
use std::sync::Arc;

use hookrelay_core::{
    CatalogResult, Destination, DestinationCatalog, Mapping, ResolvedDestination, UpsertMapping,
};

use crate::cache::ResolutionCache;

/// Resolves inbound identifiers to their active destinations, cache first.
///
/// Mapping mutations must go through the resolver: it invalidates the
/// affected cache entries after the catalog write succeeds and before
/// reporting success, so the next resolve observes the change.
#[derive(Clone)]
pub struct DestinationResolver {
    catalog: Arc<dyn DestinationCatalog>,
    cache: Arc<dyn ResolutionCache>,
}

impl DestinationResolver {
    pub fn new(catalog: Arc<dyn DestinationCatalog>, cache: Arc<dyn ResolutionCache>) -> Self {
        Self { catalog, cache }
    }

    pub fn catalog(&self) -> &Arc<dyn DestinationCatalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<dyn ResolutionCache> {
        &self.cache
    }

    /// Returns the active destinations for an identifier in delivery order.
    ///
    /// Never fails: a catalog error is logged and yields an empty list, which
    /// is not cached, so the next call queries the catalog again. Empty
    /// results are not cached either.
    pub async fn resolve(&self, phone_number_id: &str) -> Arc<Vec<ResolvedDestination>> {
        if let Some(cached) = self.cache.get(phone_number_id).await {
            tracing::debug!(phone_number_id, count = cached.len(), "Resolved destinations from cache");
            return cached;
        }

        let generation = self.cache.generation().await;

        let destinations = match self.catalog.find_active_destinations(phone_number_id).await {
            Ok(list) => dedup_by_destination(list),
            Err(e) => {
                tracing::error!(
                    phone_number_id,
                    error = %e,
                    "Failed to resolve destinations from catalog"
                );
                return Arc::new(Vec::new());
            }
        };

        if destinations.is_empty() {
            tracing::debug!(phone_number_id, "No active destinations");
            return Arc::new(destinations);
        }

        tracing::debug!(
            phone_number_id,
            count = destinations.len(),
            "Resolved destinations from catalog"
        );

        let resolved = Arc::new(destinations);
        if !self
            .cache
            .put(phone_number_id, resolved.as_ref().clone(), generation)
            .await
        {
            tracing::debug!(
                phone_number_id,
                "Skipped caching resolution invalidated during lookup"
            );
        }
        resolved
    }

    /// Creates or re-activates a mapping and invalidates its identifier.
    pub async fn upsert_mapping(&self, mapping: UpsertMapping) -> CatalogResult<Mapping> {
        let phone_number_id = mapping.phone_number_id.clone();
        let saved = self.catalog.upsert_mapping(mapping).await?;
        self.cache.invalidate(&phone_number_id).await;
        tracing::info!(
            phone_number_id = %phone_number_id,
            destination_id = saved.destination_id,
            priority = saved.priority,
            "Mapping saved, cache invalidated"
        );
        Ok(saved)
    }

    /// Deactivates a mapping and invalidates its identifier.
    ///
    /// Returns `None` if the mapping does not exist.
    pub async fn deactivate_mapping(
        &self,
        phone_number_id: &str,
        destination_id: i64,
    ) -> CatalogResult<Option<Mapping>> {
        let removed = self
            .catalog
            .deactivate_mapping(phone_number_id, destination_id)
            .await?;
        if removed.is_some() {
            self.cache.invalidate(phone_number_id).await;
            tracing::info!(
                phone_number_id,
                destination_id,
                "Mapping deactivated, cache invalidated"
            );
        }
        Ok(removed)
    }

    /// Toggles a destination. Any identifier may map to it, so the whole
    /// cache is flushed.
    pub async fn set_destination_active(&self, id: i64, active: bool) -> CatalogResult<Destination> {
        let destination = self.catalog.set_destination_active(id, active).await?;
        let flushed = self.cache.clear().await;
        tracing::info!(
            destination_id = id,
            active,
            flushed,
            "Destination updated, cache flushed"
        );
        Ok(destination)
    }

    /// Drops the cached resolution for one identifier.
    pub async fn invalidate(&self, phone_number_id: &str) -> bool {
        self.cache.invalidate(phone_number_id).await
    }

    /// Drops every cached resolution.
    pub async fn clear(&self) -> usize {
        let flushed = self.cache.clear().await;
        tracing::info!(flushed, "Resolution cache cleared");
        flushed
    }
}

/// Keeps the first (highest ranked) entry per destination.
fn dedup_by_destination(list: Vec<ResolvedDestination>) -> Vec<ResolvedDestination> {
    let mut seen = HashSet::with_capacity(list.len());
    list.into_iter()
        .filter(|d| seen.insert(d.destination_id))
        .collect()
}
