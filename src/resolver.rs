//! Metadata resolution seam
//!
//! The lookups that turn item ids into metadata and download sources live outside this
//! crate. [`MetadataResolver`] is the contract the producer consumes; [`StaticResolver`] is
//! a fixed in-memory catalog for embedders that already hold the metadata, and for tests.

use crate::Result;
use crate::types::{CollectionPage, ItemId, ResolvedItem, SourceInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// External metadata and source lookup
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Resolve metadata for `ids`; ids unknown to the source are left out
    async fn resolve_batch(&self, ids: &[ItemId]) -> Result<Vec<ResolvedItem>>;

    /// One page of a collection (playlist, album)
    async fn resolve_collection_page(
        &self,
        collection_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<CollectionPage>;

    /// Download URL, checksum and size for an item; `None` if the item has no source
    /// (taken down, region locked)
    async fn resolve_source(&self, item: &ResolvedItem) -> Result<Option<SourceInfo>>;
}

/// In-memory catalog implementing [`MetadataResolver`]
#[derive(Debug, Default)]
pub struct StaticResolver {
    items: RwLock<HashMap<ItemId, ResolvedItem>>,
    sources: RwLock<HashMap<ItemId, SourceInfo>>,
    collections: RwLock<HashMap<String, Vec<ItemId>>>,
}

impl StaticResolver {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item and, optionally, its source
    pub fn insert(&self, item: ResolvedItem, source: Option<SourceInfo>) {
        let id = item.id.clone();
        if let Some(source) = source {
            write(&self.sources).insert(id.clone(), source);
        } else {
            write(&self.sources).remove(&id);
        }
        write(&self.items).insert(id, item);
    }

    /// Define a collection as an ordered list of item ids
    pub fn insert_collection(&self, collection_id: impl Into<String>, ids: Vec<ItemId>) {
        write(&self.collections).insert(collection_id.into(), ids);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl MetadataResolver for StaticResolver {
    async fn resolve_batch(&self, ids: &[ItemId]) -> Result<Vec<ResolvedItem>> {
        let items = read(&self.items);
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn resolve_collection_page(
        &self,
        collection_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<CollectionPage> {
        let collections = read(&self.collections);
        let Some(ids) = collections.get(collection_id) else {
            return Ok(CollectionPage::default());
        };

        let items = read(&self.items);
        let end = offset.saturating_add(limit).min(ids.len());
        let page = ids
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| items.get(id).cloned())
            .collect();

        Ok(CollectionPage {
            items: page,
            has_more: end < ids.len(),
        })
    }

    async fn resolve_source(&self, item: &ResolvedItem) -> Result<Option<SourceInfo>> {
        Ok(read(&self.sources).get(&item.id).cloned())
    }
}
