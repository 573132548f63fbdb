//! Tests for the TrackDownloader facade.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::test_helpers::{Script, ScriptedAgent, source_for, test_config, test_item};
use super::*;
use crate::resolver::StaticResolver;
use crate::types::{ItemId, QueueStatus, StateBucket, TaskState};

const BODY: &[u8] = b"0123456789abcdefghij";

struct Harness {
    dir: TempDir,
    agent: Arc<ScriptedAgent>,
    resolver: Arc<StaticResolver>,
    downloader: TrackDownloader,
}

async fn harness(script: Script) -> Harness {
    let dir = TempDir::new().unwrap();
    let agent = ScriptedAgent::new(script);
    let resolver = Arc::new(StaticResolver::new());
    let downloader =
        TrackDownloader::with_agent(test_config(dir.path()), resolver.clone(), agent.clone())
            .await
            .unwrap();
    Harness {
        dir,
        agent,
        resolver,
        downloader,
    }
}

impl Harness {
    fn add(&self, id: &str) {
        self.resolver
            .insert(test_item(id), Some(source_for(id, BODY)));
    }

    async fn wait_for_state(&self, id: &str, state: TaskState) {
        let id = ItemId::from(id);
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let record = self.downloader.record(&id).await.unwrap();
                if record.is_some_and(|r| r.state == state) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("record did not reach the expected state");
    }
}

// -----------------------------------------------------------------------
// Construction
// -----------------------------------------------------------------------

#[tokio::test]
async fn new_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    config.download.job_timeout = Duration::ZERO;

    let result = TrackDownloader::with_agent(
        config,
        Arc::new(StaticResolver::new()),
        ScriptedAgent::new(Script::Stall),
    )
    .await;

    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn new_creates_root_and_leaves_queue_paused() {
    let h = harness(Script::Serve(BODY.to_vec())).await;
    assert!(h.dir.path().join("music").is_dir());
    assert_eq!(h.downloader.status(), QueueStatus::Initiated);
}

// -----------------------------------------------------------------------
// Downloads, progress and browsing
// -----------------------------------------------------------------------

#[tokio::test]
async fn enqueued_items_are_downloaded_once_started() {
    let h = harness(Script::Serve(BODY.to_vec())).await;
    h.add("1");
    h.add("2");

    let summary = h
        .downloader
        .enqueue_batch(vec![ItemId::from("1"), ItemId::from("2")])
        .await
        .unwrap();
    assert_eq!(summary.enqueued.len(), 2);

    h.downloader.start().await.unwrap();
    h.wait_for_state("1", TaskState::Downloaded).await;
    h.wait_for_state("2", TaskState::Downloaded).await;

    let file = h
        .dir
        .path()
        .join("music/Test Artist/Test Album/Track 1.flac");
    assert_eq!(std::fs::read(file).unwrap(), BODY);
    assert_eq!(h.agent.calls(), 2);

    h.downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn progress_reports_done_items_as_complete_and_unknown_as_zero() {
    let h = harness(Script::Serve(BODY.to_vec())).await;
    h.add("1");
    h.downloader.enqueue_one("1").await.unwrap();
    h.downloader.start().await.unwrap();
    h.wait_for_state("1", TaskState::Downloaded).await;

    let progress = h
        .downloader
        .progress(&[ItemId::from("ghost"), ItemId::from("1")])
        .await
        .unwrap();

    assert_eq!(progress[0].item_id.as_str(), "ghost");
    assert_eq!(progress[0].percent, 0);
    assert_eq!(progress[0].state, None);
    assert_eq!(progress[1].percent, 100);
    assert_eq!(progress[1].state, Some(TaskState::Downloaded));

    h.downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn records_are_filtered_by_bucket() {
    let h = harness(Script::Serve(BODY.to_vec())).await;
    h.add("1");
    h.resolver.insert(test_item("2"), None);

    h.downloader
        .enqueue_batch(vec![ItemId::from("1"), ItemId::from("2")])
        .await
        .unwrap();

    let waiting = h
        .downloader
        .records(0, 10, Some(StateBucket::Waiting))
        .await
        .unwrap();
    let failed = h
        .downloader
        .records(0, 10, Some(StateBucket::Failed))
        .await
        .unwrap();
    let all = h.downloader.records(0, 10, None).await.unwrap();

    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].id.as_str(), "1");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id.as_str(), "2");
    assert_eq!(all.len(), 2);
    assert_eq!(h.downloader.queue_stats().await.unwrap().waiting, 1);
}

// -----------------------------------------------------------------------
// Shutdown
// -----------------------------------------------------------------------

#[tokio::test]
async fn shutdown_pauses_in_flight_transfer_and_keeps_partial_file() {
    let h = harness(Script::Hang {
        body: BODY.to_vec(),
        prefix: 8,
    })
    .await;
    let mut events = h.downloader.subscribe();
    h.add("1");
    h.downloader.enqueue_one("1").await.unwrap();
    h.downloader.start().await.unwrap();
    h.wait_for_state("1", TaskState::Downloading).await;

    h.downloader.shutdown().await.unwrap();

    assert_eq!(h.downloader.status(), QueueStatus::Closed);
    assert!(h.downloader.db.is_closed());

    let file = h
        .dir
        .path()
        .join("music/Test Artist/Test Album/Track 1.flac");
    assert_eq!(std::fs::metadata(file).unwrap().len(), 8);

    let mut saw_shutdown = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::Shutdown) {
            saw_shutdown = true;
        }
    }
    assert!(saw_shutdown);
}

#[tokio::test]
async fn cancelled_item_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(StaticResolver::new());
    resolver.insert(test_item("1"), Some(source_for("1", BODY)));

    let hang = ScriptedAgent::new(Script::Hang {
        body: BODY.to_vec(),
        prefix: 8,
    });
    let first = TrackDownloader::with_agent(test_config(dir.path()), resolver.clone(), hang)
        .await
        .unwrap();
    first.enqueue_one("1").await.unwrap();
    first.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while first
            .record(&ItemId::from("1"))
            .await
            .unwrap()
            .is_none_or(|r| r.state != TaskState::Downloading)
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    first.shutdown().await.unwrap();

    // Same database and root, healthy agent
    let serve = ScriptedAgent::new(Script::Serve(BODY.to_vec()));
    let second = TrackDownloader::with_agent(test_config(dir.path()), resolver, serve.clone())
        .await
        .unwrap();
    second.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while second
            .record(&ItemId::from("1"))
            .await
            .unwrap()
            .is_none_or(|r| r.state != TaskState::Downloaded)
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let requests = serve.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].start, crate::transfer::StartFrom::Offset(8));
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_is_idempotent_and_blocks_new_work() {
    let h = harness(Script::Serve(BODY.to_vec())).await;
    h.add("1");
    h.downloader.start().await.unwrap();

    h.downloader.shutdown().await.unwrap();
    h.downloader.shutdown().await.unwrap();

    assert!(h.downloader.start().await.is_err());
    assert!(h.downloader.enqueue_one("1").await.is_err());
}
