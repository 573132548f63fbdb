//! Enqueueing single items, batches and collections.

use crate::error::Result;
use crate::producer::EnqueueSummary;
use crate::types::ItemId;

use super::TrackDownloader;

impl TrackDownloader {
    /// Resolve and enqueue one item
    ///
    /// Items whose metadata or download URL cannot be resolved are recorded as `Error`
    /// and reported in [`EnqueueSummary::unresolved`] instead of failing the call.
    pub async fn enqueue_one(&self, id: impl Into<ItemId>) -> Result<EnqueueSummary> {
        self.producer.enqueue_one(id.into()).await
    }

    /// Resolve and enqueue several items in one broker round-trip
    pub async fn enqueue_batch(&self, ids: Vec<ItemId>) -> Result<EnqueueSummary> {
        self.producer.enqueue_batch(ids).await
    }

    /// Walk a collection and enqueue the items not yet downloaded
    ///
    /// Items already waiting, downloading or done are skipped; cancelled, failed and
    /// timed out items are reset and enqueued again.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use trackfetch::*;
    /// # async fn example(downloader: TrackDownloader) -> Result<()> {
    /// let summary = downloader.enqueue_collection("playlist-42").await?;
    /// println!("{} new, {} skipped", summary.enqueued.len(), summary.skipped);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn enqueue_collection(&self, collection_id: &str) -> Result<EnqueueSummary> {
        self.producer.enqueue_collection(collection_id).await
    }
}
