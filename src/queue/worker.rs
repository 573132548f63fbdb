//! Worker pool: leases jobs from the broker and runs them through the consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::JoinSet;

use crate::context::Context;
use crate::db::{FailureOutcome, JobBroker, LeasedJob};
use crate::error::{Error, Result};
use crate::rate_limiter::RateLimiter;
use crate::types::{Event, QueueStatus};

use super::consumer::Consumer;

/// Worker pool sizing and broker timings
#[derive(Clone, Debug)]
pub(crate) struct PoolSettings {
    /// Queue name at the broker
    pub queue: String,
    /// Jobs handled at once
    pub concurrency: usize,
    /// Lease taken (and renewed) per job
    pub lease: Duration,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
}

/// Running worker pool
pub(crate) struct WorkerPool {
    dispatcher: tokio::task::JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn the dispatcher; it leases jobs only while the queue status is `Started` and
    /// stops leasing once `ctx` goes done
    pub(crate) fn spawn(
        settings: PoolSettings,
        broker: Arc<dyn JobBroker>,
        consumer: Consumer,
        status: watch::Receiver<QueueStatus>,
        event_tx: broadcast::Sender<Event>,
        ctx: Context,
    ) -> Self {
        let dispatcher = tokio::spawn(dispatch(
            settings, broker, consumer, status, event_tx, ctx,
        ));
        Self { dispatcher }
    }

    /// Wait up to `grace` for in-flight jobs to finish (the pool's context must be done)
    pub(crate) async fn shutdown(self, grace: Duration) -> Result<()> {
        let abort = self.dispatcher.abort_handle();
        match tokio::time::timeout(grace, self.dispatcher).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Other(format!("worker pool failed: {}", e))),
            Err(_) => {
                abort.abort();
                Err(Error::TimedOut(grace))
            }
        }
    }
}

async fn dispatch(
    settings: PoolSettings,
    broker: Arc<dyn JobBroker>,
    consumer: Consumer,
    mut status: watch::Receiver<QueueStatus>,
    event_tx: broadcast::Sender<Event>,
    ctx: Context,
) {
    let semaphore = Arc::new(Semaphore::new(settings.concurrency));
    let limiter = RateLimiter::per_second(settings.concurrency);
    let mut workers = JoinSet::new();

    tracing::info!(
        queue = %settings.queue,
        concurrency = settings.concurrency,
        "worker pool running"
    );

    loop {
        reap(&mut workers);

        // Paused: wait for a status change
        if *status.borrow_and_update() != QueueStatus::Started {
            tokio::select! {
                _ = ctx.done() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        let permit = tokio::select! {
            _ = ctx.done() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let leased = match broker.lease_next(&settings.queue, settings.lease).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                drop(permit);
                idle(&ctx, settings.poll_interval).await;
                continue;
            }
            Err(e) => {
                tracing::error!(queue = %settings.queue, error = %e, "failed to lease job");
                drop(permit);
                idle(&ctx, settings.poll_interval).await;
                continue;
            }
        };

        // Caps job starts at `concurrency` per second
        tokio::select! {
            _ = ctx.done() => {
                release(broker.as_ref(), &leased).await;
                break;
            }
            _ = limiter.acquire() => {}
        }

        // Stopped while waiting on the limiter
        if *status.borrow() != QueueStatus::Started {
            release(broker.as_ref(), &leased).await;
            drop(permit);
            continue;
        }

        let broker = broker.clone();
        let consumer = consumer.clone();
        let event_tx = event_tx.clone();
        let lease = settings.lease;
        workers.spawn(async move {
            let _permit = permit;
            run_job(leased, broker, consumer, event_tx, lease).await;
        });
    }

    tracing::debug!(
        queue = %settings.queue,
        in_flight = workers.len(),
        "worker pool draining"
    );
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "job worker panicked");
        }
    }
    tracing::info!(queue = %settings.queue, "worker pool stopped");
}

fn reap(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.try_join_next() {
        if let Err(e) = joined {
            tracing::error!(error = %e, "job worker panicked");
        }
    }
}

async fn idle(ctx: &Context, interval: Duration) {
    tokio::select! {
        _ = ctx.done() => {}
        _ = tokio::time::sleep(interval) => {}
    }
}

/// Hand a job leased during stop or shutdown back without running it
async fn release(broker: &dyn JobBroker, job: &LeasedJob) {
    match broker.release(job.id).await {
        Ok(_) => tracing::debug!(job_id = job.id, "released leased job unrun"),
        Err(e) => tracing::warn!(job_id = job.id, error = %e, "failed to release leased job"),
    }
}

/// Run one leased job, renewing its lease until the handler returns
async fn run_job(
    job: LeasedJob,
    broker: Arc<dyn JobBroker>,
    consumer: Consumer,
    event_tx: broadcast::Sender<Event>,
    lease: Duration,
) {
    let job_id = job.id;
    let item_id = job.payload.job().item.id.clone();

    tracing::debug!(
        job_id,
        item_id = %item_id,
        attempt = job.attempt,
        max_attempts = job.max_attempts,
        "job started"
    );

    let handler = consumer.handle(job.payload, job.attempt);
    tokio::pin!(handler);

    let mut renewal = tokio::time::interval(lease / 2);
    renewal.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the lease was just taken
    renewal.tick().await;

    let result = loop {
        tokio::select! {
            result = &mut handler => break result,
            _ = renewal.tick() => match broker.renew_lease(job_id, lease).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(job_id, item_id = %item_id, "lease lost, job may be redelivered"),
                Err(e) => tracing::warn!(job_id, error = %e, "failed to renew lease"),
            },
        }
    };

    match result {
        Ok(state) => {
            if let Err(e) = broker.complete(job_id).await {
                tracing::error!(job_id, error = %e, "failed to mark job completed");
            }
            tracing::info!(job_id, item_id = %item_id, state = %state, "job completed");
        }
        Err(e) => {
            let unrecoverable = e.is_unrecoverable();
            let reason = e.to_string();
            match broker.fail(job_id, &reason, unrecoverable).await {
                Ok(outcome) => {
                    let will_retry = matches!(outcome, FailureOutcome::Retrying(_));
                    tracing::warn!(
                        job_id,
                        item_id = %item_id,
                        error = %reason,
                        will_retry,
                        "job failed"
                    );
                    event_tx
                        .send(Event::Failed {
                            item_id,
                            error: reason,
                            will_retry,
                        })
                        .ok();
                }
                Err(db_err) => {
                    tracing::error!(job_id, error = %db_err, "failed to record job failure");
                }
            }
        }
    }
}
