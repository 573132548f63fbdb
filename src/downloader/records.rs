//! Read side: per-item progress, record browsing, queue stats.

use std::collections::HashMap;

use crate::db::{ItemRecord, RecordStore};
use crate::error::Result;
use crate::types::{ItemId, ItemProgress, QueueStats, StateBucket};

use super::TrackDownloader;

impl TrackDownloader {
    /// Progress of each id, in the order given
    ///
    /// Downloaded and skipped items report 100; ids without a record report 0.
    pub async fn progress(&self, ids: &[ItemId]) -> Result<Vec<ItemProgress>> {
        let records: HashMap<ItemId, ItemRecord> = self
            .db
            .find_many(ids)
            .await?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        Ok(ids
            .iter()
            .map(|id| match records.get(id) {
                Some(record) => ItemProgress {
                    item_id: id.clone(),
                    percent: record.progress_percent(),
                    state: Some(record.state),
                },
                None => ItemProgress {
                    item_id: id.clone(),
                    percent: 0,
                    state: None,
                },
            })
            .collect())
    }

    /// The persisted record of one item
    pub async fn record(&self, id: &ItemId) -> Result<Option<ItemRecord>> {
        self.db.find_by_id(id).await
    }

    /// Records newest first, optionally limited to one state bucket
    pub async fn records(
        &self,
        offset: u64,
        limit: u64,
        bucket: Option<StateBucket>,
    ) -> Result<Vec<ItemRecord>> {
        self.db.paginate(offset, limit, bucket).await
    }

    /// Job counts by broker status
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }
}
