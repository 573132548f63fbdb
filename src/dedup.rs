//! Pre-enqueue deduplication
//!
//! A [`DedupFilter`] splits a batch of candidate ids into items worth enqueuing (no record
//! yet, or a record in a retryable state) and items to skip (already downloaded, skipped,
//! or waiting/downloading in another job).

use crate::Result;
use crate::db::RecordStore;
use crate::types::{ItemId, TaskState};
use std::collections::HashSet;
use std::sync::Arc;

/// Dedup filter over one batch of candidate ids
pub struct DedupFilter {
    store: Arc<dyn RecordStore>,
    ids: Vec<ItemId>,
    /// Ids that need a download; `None` until prepared
    needed: Option<HashSet<ItemId>>,
}

impl DedupFilter {
    /// Filter for `ids`; nothing is queried until [`prepare`](Self::prepare)
    pub fn new(store: Arc<dyn RecordStore>, ids: Vec<ItemId>) -> Self {
        Self {
            store,
            ids,
            needed: None,
        }
    }

    /// Query the store and claim the needed ids
    ///
    /// New ids get a `Waiting` placeholder record; ids in a retryable state
    /// (`Cancel`, `Error`, `Timeout`) are reset to `Waiting`. Calling it again is a no-op.
    pub async fn prepare(&mut self) -> Result<()> {
        if self.needed.is_some() {
            return Ok(());
        }

        let (missing, retryable) = tokio::try_join!(
            self.store.ids_not_existing(&self.ids),
            self.store.ids_where_state_in(&self.ids, &TaskState::RETRYABLE),
        )?;

        if !missing.is_empty() {
            self.store.insert_placeholders(&missing).await?;
        }
        if !retryable.is_empty() {
            self.store.reset_to_waiting(&retryable).await?;
        }

        tracing::debug!(
            candidates = self.ids.len(),
            new = missing.len(),
            retryable = retryable.len(),
            "dedup filter prepared"
        );

        self.needed = Some(missing.into_iter().chain(retryable).collect());
        Ok(())
    }

    /// Whether `id` should not be enqueued. An unprepared filter skips nothing.
    pub fn should_skip(&self, id: &ItemId) -> bool {
        match &self.needed {
            Some(needed) => !needed.contains(id),
            None => false,
        }
    }

    /// Whether [`prepare`](Self::prepare) has completed
    pub fn is_prepared(&self) -> bool {
        self.needed.is_some()
    }

    /// Candidate ids that survive the filter, in input order
    pub fn survivors(&self) -> Vec<ItemId> {
        self.ids
            .iter()
            .filter(|id| !self.should_skip(id))
            .cloned()
            .collect()
    }
}
