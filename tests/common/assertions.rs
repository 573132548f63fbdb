//! Custom test assertions for integration tests

use std::time::Duration;
use trackfetch::{ItemId, TaskState, TrackDownloader};

/// Poll the record of `id` until it reaches `state`
///
/// Returns the last state seen when the timeout expires first.
pub async fn wait_for_state(
    downloader: &TrackDownloader,
    id: &str,
    state: TaskState,
    timeout: Duration,
) -> Result<(), Option<TaskState>> {
    let id = ItemId::from(id);
    let mut last = None;
    let reached = tokio::time::timeout(timeout, async {
        loop {
            last = downloader
                .record(&id)
                .await
                .ok()
                .flatten()
                .map(|record| record.state);
            if last == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;

    match reached {
        Ok(()) => Ok(()),
        Err(_) => Err(last),
    }
}
