//! Producer: resolves ids and collections into download jobs
//!
//! Single ids and explicit batches are resolved and submitted as they are. Collections
//! are walked page by page; each page goes through a [`DedupFilter`] and only the items
//! that still need a download are submitted. Walking stops at the first page with no
//! surviving items, so re-syncing a collection only touches its new entries.

use crate::Result;
use crate::config::Config;
use crate::db::{ItemRecord, RecordStore};
use crate::dedup::DedupFilter;
use crate::downloader::download_task::target_path;
use crate::queue::DownloadQueue;
use crate::resolver::MetadataResolver;
use crate::types::{DownloadJob, Event, ItemId, JobPayload, ResolvedItem, TaskState};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Detail recorded for items whose source has no download URL
pub const NO_DOWNLOAD_URL: &str = "unable to resolve download url";

/// Detail recorded for ids the resolver does not know
pub const NO_METADATA: &str = "unable to resolve metadata";

/// What one enqueue call did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueSummary {
    /// Items submitted to the queue, in submission order
    pub enqueued: Vec<ItemId>,
    /// Items recorded as `Error` because metadata or source could not be resolved
    pub unresolved: Vec<ItemId>,
    /// Collection items left out by the dedup filter
    pub skipped: usize,
}

impl EnqueueSummary {
    fn merge(&mut self, other: EnqueueSummary) {
        self.enqueued.extend(other.enqueued);
        self.unresolved.extend(other.unresolved);
        self.skipped += other.skipped;
    }
}

/// Turns ids and collections into queued jobs
pub struct Producer {
    resolver: Arc<dyn MetadataResolver>,
    store: Arc<dyn RecordStore>,
    queue: Arc<DownloadQueue>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
}

impl Producer {
    /// Create a producer feeding `queue`
    pub fn new(
        resolver: Arc<dyn MetadataResolver>,
        store: Arc<dyn RecordStore>,
        queue: Arc<DownloadQueue>,
        config: Arc<Config>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            resolver,
            store,
            queue,
            config,
            event_tx,
        }
    }

    /// Enqueue a single item
    pub async fn enqueue_one(&self, id: ItemId) -> Result<EnqueueSummary> {
        self.enqueue_batch(vec![id]).await
    }

    /// Resolve `ids` and submit one job per resolvable item in a single broker round-trip
    pub async fn enqueue_batch(&self, ids: Vec<ItemId>) -> Result<EnqueueSummary> {
        if ids.is_empty() {
            return Ok(EnqueueSummary::default());
        }

        let items = self.resolver.resolve_batch(&ids).await?;

        let known: HashSet<&ItemId> = items.iter().map(|item| &item.id).collect();
        let mut unknown = Vec::new();
        for id in ids.iter().filter(|id| !known.contains(id)) {
            if !unknown.contains(id) {
                unknown.push(id.clone());
            }
        }
        for id in &unknown {
            tracing::warn!(item_id = %id, "no metadata for item");
            let mut record = ItemRecord::placeholder(id.clone());
            record.set_state_with_detail(TaskState::Error, NO_METADATA);
            self.store.upsert(&record).await?;
        }

        let mut summary = self.submit(items).await?;
        summary.unresolved.extend(unknown);
        Ok(summary)
    }

    /// Walk a collection page by page, submitting the items the dedup filter lets through
    ///
    /// Pages are fetched `page_concurrency` at a time and processed in order. Walking stops
    /// at an empty page, a repeated page, a page with no surviving items, or the last page.
    pub async fn enqueue_collection(&self, collection_id: &str) -> Result<EnqueueSummary> {
        let page_size = self.config.producer.page_size;
        let window = self.config.producer.effective_page_concurrency();

        let mut summary = EnqueueSummary::default();
        let mut offset = 0usize;
        let mut last_seen: Option<ItemId> = None;
        let mut pages_read = 0usize;

        'pages: loop {
            let requests = (0..window).map(|i| {
                self.resolver.resolve_collection_page(
                    collection_id,
                    offset + i * page_size,
                    page_size,
                )
            });
            let pages = futures::future::try_join_all(requests).await?;
            offset += window * page_size;

            for page in pages {
                let Some(last) = page.items.last().map(|item| item.id.clone()) else {
                    break 'pages;
                };
                if last_seen.as_ref() == Some(&last) {
                    tracing::debug!(collection_id, "collection returned the same page twice");
                    break 'pages;
                }
                last_seen = Some(last);
                pages_read += 1;

                let ids = page.items.iter().map(|item| item.id.clone()).collect();
                let mut filter = DedupFilter::new(self.store.clone(), ids);
                filter.prepare().await?;

                let total = page.items.len();
                let survivors: Vec<ResolvedItem> = page
                    .items
                    .into_iter()
                    .filter(|item| !filter.should_skip(&item.id))
                    .collect();
                summary.skipped += total - survivors.len();

                tracing::info!(
                    collection_id,
                    page = pages_read,
                    items = total,
                    surviving = survivors.len(),
                    "collection page read"
                );

                if survivors.is_empty() {
                    break 'pages;
                }
                summary.merge(self.submit(survivors).await?);

                if !page.has_more {
                    break 'pages;
                }
            }
        }

        tracing::info!(
            collection_id,
            pages = pages_read,
            enqueued = summary.enqueued.len(),
            skipped = summary.skipped,
            unresolved = summary.unresolved.len(),
            "collection enqueued"
        );
        Ok(summary)
    }

    /// Resolve sources, write the records and bulk-submit the jobs
    async fn submit(&self, items: Vec<ResolvedItem>) -> Result<EnqueueSummary> {
        let mut summary = EnqueueSummary::default();
        if items.is_empty() {
            return Ok(summary);
        }

        let concurrency = self.config.producer.effective_page_concurrency();
        let resolver = &self.resolver;
        let resolved: Vec<_> = futures::stream::iter(items)
            .map(|item| async move {
                let source = resolver.resolve_source(&item).await;
                (item, source)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut jobs = Vec::new();
        for (item, source) in resolved {
            match source {
                Ok(Some(source)) => jobs.push(DownloadJob::new(item, source)),
                Ok(None) => {
                    tracing::warn!(item_id = %item.id, "no download url for item");
                    self.record_unresolved(&item, NO_DOWNLOAD_URL.to_string())
                        .await?;
                    summary.unresolved.push(item.id);
                }
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "source lookup failed");
                    self.record_unresolved(&item, format!("{}: {}", NO_DOWNLOAD_URL, e))
                        .await?;
                    summary.unresolved.push(item.id);
                }
            }
        }

        if jobs.is_empty() {
            return Ok(summary);
        }

        let root = &self.config.download.root_dir;
        for job in &jobs {
            self.store
                .upsert(&ItemRecord::for_job(job, &target_path(root, job)))
                .await?;
        }

        let payloads: Vec<JobPayload> = jobs.iter().cloned().map(JobPayload::from).collect();
        self.queue.add_bulk(&payloads).await?;

        for job in jobs {
            self.event_tx
                .send(Event::Queued {
                    item_id: job.item.id.clone(),
                    title: job.item.title,
                })
                .ok();
            summary.enqueued.push(job.item.id);
        }

        tracing::info!(count = summary.enqueued.len(), "jobs enqueued");
        Ok(summary)
    }

    async fn record_unresolved(&self, item: &ResolvedItem, detail: String) -> Result<()> {
        let mut record = ItemRecord::placeholder(item.id.clone());
        record.display_name = item.title.clone();
        record.cover_url = item.album.cover_url.clone();
        record.track_number = i64::from(item.track_no);
        record.album_name = item.album.name.clone();
        record.artist_names = item.artist_names();
        record.set_state_with_detail(TaskState::Error, detail);
        self.store.upsert(&record).await
    }
}
