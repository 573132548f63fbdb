//! Shared test helpers: scripted transfer agent, instrumented record store, fast config,
//! temp database.

use crate::config::{Config, RetryConfig};
use crate::db::{Database, ItemRecord, RecordStore};
use crate::downloader::download_task::TaskDeps;
use crate::error::{DatabaseError, Error, Result as CrateResult, TransferError};
use crate::transfer::{StartFrom, TransferAgent, TransferEvent, TransferOutcome, TransferRequest};
use crate::types::{
    Album, Artist, DownloadJob, ItemId, ResolvedItem, SourceInfo, StateBucket, TaskState,
};
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the scripted agent does on every call
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Write the bytes of `body` past the start offset and complete
    Serve(Vec<u8>),
    /// Write the first `prefix` bytes of `body`, then block until paused
    Hang { body: Vec<u8>, prefix: usize },
    /// Fail with an HTTP status
    Status(u16),
    /// Fail with an agent-level idle timeout
    Stall,
}

/// [`TransferAgent`] that follows a [`Script`] and records every request
pub(crate) struct ScriptedAgent {
    script: Mutex<Script>,
    requests: Mutex<Vec<TransferRequest>>,
}

impl ScriptedAgent {
    pub(crate) fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn write_bytes(path: &Path, bytes: &[u8], append: bool) -> Result<(), TransferError> {
    let mut options = std::fs::OpenOptions::new();
    if append {
        options.append(true).create(true);
    } else {
        options.write(true).create(true).truncate(true);
    }
    options
        .open(path)
        .and_then(|mut file| file.write_all(bytes))
        .map_err(|source| TransferError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl TransferAgent for ScriptedAgent {
    async fn start(
        &self,
        request: TransferRequest,
        events: mpsc::UnboundedSender<TransferEvent>,
        pause: CancellationToken,
    ) -> Result<TransferOutcome, TransferError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.script.lock().unwrap().clone();

        match script {
            Script::Serve(body) => {
                let total = body.len() as u64;
                let (offset, append) = match request.start {
                    StartFrom::Beginning => (0, false),
                    StartFrom::Offset(n) => (n.min(total), true),
                };
                events.send(TransferEvent::Download { offset, total }).ok();
                write_bytes(&request.target, &body[offset as usize..], append)?;
                events
                    .send(TransferEvent::Progress {
                        received: total,
                        total,
                    })
                    .ok();
                events.send(TransferEvent::End { bytes: total }).ok();
                Ok(TransferOutcome::Completed { bytes: total })
            }
            Script::Hang { body, prefix } => {
                let total = body.len() as u64;
                events.send(TransferEvent::Download { offset: 0, total }).ok();
                write_bytes(&request.target, &body[..prefix], false)?;
                events
                    .send(TransferEvent::Progress {
                        received: prefix as u64,
                        total,
                    })
                    .ok();
                pause.cancelled().await;
                events
                    .send(TransferEvent::Pause {
                        received: prefix as u64,
                    })
                    .ok();
                Ok(TransferOutcome::Paused {
                    bytes: prefix as u64,
                })
            }
            Script::Status(status) => Err(TransferError::Status {
                url: request.url,
                status,
            }),
            Script::Stall => Err(TransferError::Timeout(Duration::from_secs(60))),
        }
    }
}

/// [`RecordStore`] over a real database that can slow down or fail record writes
pub(crate) struct TestStore {
    inner: Arc<Database>,
    delays: Mutex<Vec<(TaskState, Duration)>>,
    fail_next_terminal: AtomicBool,
}

impl TestStore {
    pub(crate) fn new(inner: Arc<Database>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            delays: Mutex::new(Vec::new()),
            fail_next_terminal: AtomicBool::new(false),
        })
    }

    /// Every upsert of a record in `state` sleeps for `delay` first
    pub(crate) fn delay_writes_of(&self, state: TaskState, delay: Duration) {
        self.delays.lock().unwrap().push((state, delay));
    }

    /// The next upsert of a terminal state fails
    pub(crate) fn fail_next_terminal_write(&self) {
        self.fail_next_terminal.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for TestStore {
    async fn find_by_id(&self, id: &ItemId) -> CrateResult<Option<ItemRecord>> {
        self.inner.find_by_id(id).await
    }

    async fn find_many(&self, ids: &[ItemId]) -> CrateResult<Vec<ItemRecord>> {
        self.inner.find_many(ids).await
    }

    async fn upsert(&self, record: &ItemRecord) -> CrateResult<()> {
        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(state, _)| *state == record.state)
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if record.state.is_terminal() && self.fail_next_terminal.swap(false, Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "database is locked".into(),
            )));
        }
        self.inner.upsert(record).await
    }

    async fn ids_where_state_in(
        &self,
        ids: &[ItemId],
        states: &[TaskState],
    ) -> CrateResult<Vec<ItemId>> {
        self.inner.ids_where_state_in(ids, states).await
    }

    async fn ids_not_existing(&self, ids: &[ItemId]) -> CrateResult<Vec<ItemId>> {
        self.inner.ids_not_existing(ids).await
    }

    async fn insert_placeholders(&self, ids: &[ItemId]) -> CrateResult<u64> {
        self.inner.insert_placeholders(ids).await
    }

    async fn reset_to_waiting(&self, ids: &[ItemId]) -> CrateResult<u64> {
        self.inner.reset_to_waiting(ids).await
    }

    async fn paginate(
        &self,
        offset: u64,
        limit: u64,
        bucket: Option<StateBucket>,
    ) -> CrateResult<Vec<ItemRecord>> {
        self.inner.paginate(offset, limit, bucket).await
    }
}

/// Config rooted in `dir` with short timers
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.download.root_dir = dir.join("music");
    config.download.job_timeout = Duration::from_secs(5);
    config.download.cancel_grace = Duration::from_secs(1);
    config.download.shutdown_grace = Duration::from_secs(5);
    config.transfer.progress_interval = Duration::from_millis(0);
    config.transfer.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.queue.concurrency = Some(2);
    config.queue.job_attempts = 2;
    config.queue.job_backoff = Duration::from_millis(10);
    config.queue.stall_interval = Duration::from_millis(200);
    config.queue.poll_interval = Duration::from_millis(10);
    config.persistence.database_path = dir.join("trackfetch.db");
    config
}

/// Task dependencies over a fresh database in `dir`
pub(crate) async fn test_deps(
    dir: &Path,
    agent: Arc<dyn TransferAgent>,
) -> (TaskDeps, Arc<Database>) {
    let config = test_config(dir);
    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
    let deps = TaskDeps {
        config: Arc::new(config),
        store: db.clone(),
        agent,
        event_tx,
    };
    (deps, db)
}

/// Resolved item `id` by "Test Artist" on "Test Album"
pub(crate) fn test_item(id: &str) -> ResolvedItem {
    ResolvedItem {
        id: ItemId::from(id),
        title: format!("Track {id}"),
        artists: vec![Artist {
            id: "artist-1".into(),
            name: "Test Artist".into(),
        }],
        album: Album {
            id: "album-1".into(),
            name: "Test Album".into(),
            cover_url: None,
        },
        track_no: 1,
        duration_ms: 180_000,
    }
}

/// Source serving `body`, with its real checksum and size
pub(crate) fn source_for(id: &str, body: &[u8]) -> SourceInfo {
    SourceInfo {
        url: format!("https://cdn.example/{id}.flac?token=abc"),
        checksum: format!("{:x}", md5::compute(body)),
        size: body.len() as u64,
    }
}

/// Job for item `id` whose source serves `body`
pub(crate) fn job_for(id: &str, body: &[u8]) -> DownloadJob {
    DownloadJob::new(test_item(id), source_for(id, body))
}
