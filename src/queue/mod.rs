//! Durable job queue and worker pool lifecycle
//!
//! [`DownloadQueue`] moves through `Build → Initiated → Started → Closing → Closed`;
//! `stop()` and `start()` toggle between `Started` and `Initiated`. Every transition is
//! idempotent.
//!
//! Split into focused submodules:
//! - [`consumer`] - Job handler and the per-job timeout race
//! - [`worker`] - Worker pool: leasing, rate limiting, lease renewal, ack/fail
//! - [`stall`] - Stalled-job scheduler

mod consumer;
mod stall;
mod worker;


use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use crate::context::{Context, ContextEvent};
use crate::db::{JobBroker, JobOptions};
use crate::downloader::download_task::TaskDeps;
use crate::error::{Error, Result};
use crate::types::{Event, JobId, JobPayload, QueueStats, QueueStatus};

use consumer::Consumer;
use stall::StallScheduler;
use worker::{PoolSettings, WorkerPool};

/// Sub-resources wired by `init()`
struct Resources {
    stall: StallScheduler,
    pool: WorkerPool,
}

/// Job queue with its stall scheduler and worker pool
pub struct DownloadQueue {
    ctx: Context,
    broker: Arc<dyn JobBroker>,
    deps: TaskDeps,
    status: watch::Sender<QueueStatus>,
    /// Held for the whole of every lifecycle operation
    resources: Mutex<Option<Resources>>,
}

impl DownloadQueue {
    /// Build a queue whose context hangs below `parent`; nothing runs until `init()`
    pub fn new(parent: &Context, broker: Arc<dyn JobBroker>, deps: TaskDeps) -> Self {
        let ctx = parent.child(format!("queue:{}", deps.config.queue.name));
        let (status, _) = watch::channel(QueueStatus::Build);
        Self {
            ctx,
            broker,
            deps,
            status,
            resources: Mutex::new(None),
        }
    }

    /// Current lifecycle status
    pub fn status(&self) -> QueueStatus {
        *self.status.borrow()
    }

    fn set_status(&self, status: QueueStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::info!(queue = %self.deps.config.queue.name, from = ?previous, to = ?status, "queue status changed");
            self.deps
                .event_tx
                .send(Event::QueueStatusChanged { status })
                .ok();
        }
    }

    /// Wire the stall scheduler and the worker pool; workers stay paused
    pub async fn init(&self) -> Result<()> {
        let mut resources = self.resources.lock().await;
        self.init_locked(&mut resources)
    }

    fn init_locked(&self, resources: &mut Option<Resources>) -> Result<()> {
        match self.status() {
            QueueStatus::Build => {}
            QueueStatus::Initiated | QueueStatus::Started => return Ok(()),
            current @ (QueueStatus::Closing | QueueStatus::Closed) => {
                return Err(Error::QueueState {
                    operation: "init",
                    current,
                });
            }
        }

        let config = &self.deps.config;
        let consumer = Consumer::new(
            self.ctx.child("consumer"),
            self.deps.clone(),
            self.status.subscribe(),
        );

        let stall = StallScheduler::spawn(
            self.broker.clone(),
            config.queue.name.clone(),
            config.queue.stall_interval,
            self.ctx.child("stall"),
        );

        let pool = WorkerPool::spawn(
            PoolSettings {
                queue: config.queue.name.clone(),
                concurrency: config.queue.effective_concurrency(),
                lease: config.lease_duration(),
                poll_interval: config.queue.poll_interval,
            },
            self.broker.clone(),
            consumer,
            self.status.subscribe(),
            self.deps.event_tx.clone(),
            self.ctx.child("workers"),
        );

        *resources = Some(Resources { stall, pool });
        self.set_status(QueueStatus::Initiated);
        Ok(())
    }

    /// Let workers pull jobs (runs `init()` first if needed)
    pub async fn start(&self) -> Result<()> {
        let mut resources = self.resources.lock().await;
        match self.status() {
            QueueStatus::Started => Ok(()),
            QueueStatus::Build => {
                self.init_locked(&mut resources)?;
                self.set_status(QueueStatus::Started);
                Ok(())
            }
            QueueStatus::Initiated => {
                self.set_status(QueueStatus::Started);
                Ok(())
            }
            current @ (QueueStatus::Closing | QueueStatus::Closed) => Err(Error::QueueState {
                operation: "start",
                current,
            }),
        }
    }

    /// Pause workers; jobs already running are not interrupted
    pub async fn stop(&self) -> Result<()> {
        let _resources = self.resources.lock().await;
        if self.status() == QueueStatus::Started {
            self.set_status(QueueStatus::Initiated);
        }
        Ok(())
    }

    /// Cascade done through the queue context, then tear down the stall scheduler and the
    /// worker pool in parallel. On a failed teardown the status goes back to what it was.
    pub async fn close(&self) -> Result<()> {
        let mut resources = self.resources.lock().await;
        let previous = self.status();
        if matches!(previous, QueueStatus::Closing | QueueStatus::Closed) {
            return Ok(());
        }

        self.set_status(QueueStatus::Closing);
        self.ctx.emit(ContextEvent::Done);

        let Some(Resources { stall, pool }) = resources.take() else {
            self.set_status(QueueStatus::Closed);
            return Ok(());
        };

        // In-flight tasks get one grace period to pause and one to report
        let grace = self.deps.config.download.cancel_grace * 2;
        let (stall_result, pool_result) = futures::join!(stall.shutdown(), pool.shutdown(grace));

        if let Err(e) = stall_result.and(pool_result) {
            tracing::error!(
                queue = %self.deps.config.queue.name,
                error = %e,
                "queue teardown failed, restoring previous status"
            );
            self.set_status(previous);
            return Err(e);
        }

        self.set_status(QueueStatus::Closed);
        Ok(())
    }

    /// Submit jobs in one broker round-trip with the configured retry policy
    pub async fn add_bulk(&self, payloads: &[JobPayload]) -> Result<Vec<JobId>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let current = self.status();
        if matches!(current, QueueStatus::Closing | QueueStatus::Closed) {
            return Err(Error::QueueState {
                operation: "enqueue",
                current,
            });
        }

        let config = &self.deps.config.queue;
        self.broker
            .enqueue_bulk(
                &config.name,
                payloads,
                JobOptions {
                    attempts: config.job_attempts,
                    backoff: config.job_backoff,
                },
            )
            .await
    }

    /// Job counts by broker status
    pub async fn stats(&self) -> Result<QueueStats> {
        self.broker.stats(&self.deps.config.queue.name).await
    }
}
