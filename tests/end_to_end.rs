//! End-to-end tests: resolver → producer → queue → HTTP transfer → record store
//!
//! Every test runs a real `TrackDownloader` with its SQLite database in a temp directory
//! and a `wiremock` server standing in for the CDN.

mod common;

use common::{
    body_of, create_test_downloader, fast_config, serve_track, serve_track_range, source_on,
    track, wait_for_state,
};
use std::sync::Arc;
use std::time::Duration;
use trackfetch::{Event, ItemId, StateBucket, StaticResolver, TaskState, TrackDownloader};
use wiremock::MockServer;

const WAIT: Duration = Duration::from_secs(15);

// -----------------------------------------------------------------------
// Collections
// -----------------------------------------------------------------------

#[tokio::test]
async fn collection_is_downloaded_and_resync_skips_everything() {
    let server = MockServer::start().await;
    let (downloader, resolver, temp_dir) = create_test_downloader().await;

    let ids = ["101", "102", "103"];
    for (n, id) in ids.iter().enumerate() {
        let body = body_of(4_096 + n * 100);
        serve_track(&server, id, &body).await;
        resolver.insert(
            track(id, &format!("Song {}", n + 1)),
            Some(source_on(&server, id, &body)),
        );
    }
    resolver.insert_collection("mix", ids.iter().map(|id| ItemId::from(*id)).collect());

    let summary = downloader.enqueue_collection("mix").await.unwrap();
    assert_eq!(summary.enqueued.len(), 3);

    downloader.start().await.unwrap();
    for id in ids {
        wait_for_state(&downloader, id, TaskState::Downloaded, WAIT)
            .await
            .unwrap();
    }

    let first = temp_dir
        .path()
        .join("music/Integration Artist/Integration Album/Song 1.mp3");
    assert_eq!(std::fs::read(&first).unwrap(), body_of(4_096));

    let record = downloader
        .record(&ItemId::from("101"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        record.target_checksum.as_deref(),
        Some(record.source_checksum.as_str())
    );
    assert_eq!(record.download_progress, 100);

    // Everything is done: the first page has no survivors
    let resync = downloader.enqueue_collection("mix").await.unwrap();
    assert!(resync.enqueued.is_empty());
    assert_eq!(resync.skipped, 3);

    let done = downloader
        .records(0, 10, Some(StateBucket::Done))
        .await
        .unwrap();
    assert_eq!(done.len(), 3);

    downloader.shutdown().await.unwrap();
}

// -----------------------------------------------------------------------
// Resume and verification
// -----------------------------------------------------------------------

#[tokio::test]
async fn partial_file_is_resumed_with_a_byte_range() {
    let server = MockServer::start().await;
    let (downloader, resolver, temp_dir) = create_test_downloader().await;

    let body = body_of(10_000);
    serve_track(&server, "201", &body).await;
    serve_track_range(&server, "201", &body, 2_500).await;
    resolver.insert(track("201", "Half Done"), Some(source_on(&server, "201", &body)));

    let target = temp_dir
        .path()
        .join("music/Integration Artist/Integration Album/Half Done.mp3");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, &body[..2_500]).unwrap();

    downloader.enqueue_one("201").await.unwrap();
    downloader.start().await.unwrap();
    wait_for_state(&downloader, "201", TaskState::Downloaded, WAIT)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), body);
    downloader.shutdown().await.unwrap();
    // Range mock expectation (exactly one call) is verified when the server drops
}

#[tokio::test]
async fn corrupted_download_is_recorded_as_error() {
    let server = MockServer::start().await;
    let (downloader, resolver, _temp_dir) = create_test_downloader().await;
    let mut events = downloader.subscribe();

    let body = body_of(2_048);
    let mut corrupt = body.clone();
    corrupt[100] ^= 0xff;
    serve_track(&server, "301", &corrupt).await;
    resolver.insert(track("301", "Corrupt"), Some(source_on(&server, "301", &body)));

    downloader.enqueue_one("301").await.unwrap();
    downloader.start().await.unwrap();

    let error = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(Event::Failed {
                item_id, error, ..
            }) = events.recv().await
                && item_id.as_str() == "301"
            {
                return error;
            }
        }
    })
    .await
    .unwrap();
    assert!(error.contains("checksum mismatch"));

    let record = downloader
        .record(&ItemId::from("301"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, TaskState::Error);
    assert!(record.state_detail.starts_with("checksum mismatch"));

    downloader.shutdown().await.unwrap();
}

// -----------------------------------------------------------------------
// Resolution failures
// -----------------------------------------------------------------------

#[tokio::test]
async fn item_without_download_url_never_reaches_the_server() {
    let server = MockServer::start().await;
    let (downloader, resolver, _temp_dir) = create_test_downloader().await;

    resolver.insert(track("401", "Region Locked"), None);

    let summary = downloader.enqueue_one("401").await.unwrap();
    assert!(summary.enqueued.is_empty());
    assert_eq!(summary.unresolved, vec![ItemId::from("401")]);
    assert_eq!(downloader.queue_stats().await.unwrap().waiting, 0);

    let record = downloader
        .record(&ItemId::from("401"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, TaskState::Error);
    assert_eq!(record.state_detail, "unable to resolve download url");

    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    downloader.shutdown().await.unwrap();
}

// -----------------------------------------------------------------------
// Restart
// -----------------------------------------------------------------------

#[tokio::test]
async fn jobs_survive_a_restart() {
    let server = MockServer::start().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let resolver = Arc::new(StaticResolver::new());

    let body = body_of(1_024);
    serve_track(&server, "501", &body).await;
    resolver.insert(track("501", "Later"), Some(source_on(&server, "501", &body)));

    // Enqueue without ever starting, then shut down
    let first = TrackDownloader::new(fast_config(temp_dir.path()), resolver.clone())
        .await
        .unwrap();
    first.enqueue_one("501").await.unwrap();
    first.shutdown().await.unwrap();

    let second = TrackDownloader::new(fast_config(temp_dir.path()), resolver)
        .await
        .unwrap();
    assert_eq!(second.queue_stats().await.unwrap().waiting, 1);

    second.start().await.unwrap();
    wait_for_state(&second, "501", TaskState::Downloaded, WAIT)
        .await
        .unwrap();
    second.shutdown().await.unwrap();
}
