//! Durable job queue on the `jobs` table.
//!
//! Status flow: `waiting → active → completed | failed`, with `active → waiting` on a
//! retryable failure or an expired lease. Times are unix milliseconds.

use crate::error::DatabaseError;
use crate::retry::backoff_delay;
use crate::types::{JobId, JobPayload, QueueStats};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::{FromRow, QueryBuilder};
use sqlx::sqlite::Sqlite;
use std::time::Duration;

use super::{Database, FailureOutcome, JobBroker, JobOptions, LeasedJob};

/// Reason recorded when a job's lease ran out too often
const STALLED_REASON: &str = "job stalled more than allowable limit";

/// 7 bind variables per job row
const MAX_JOBS_PER_INSERT: usize = 140;

#[derive(Debug, FromRow)]
struct LeasedRow {
    id: i64,
    payload: String,
    attempts: i64,
    max_attempts: i64,
}

#[derive(Debug, FromRow)]
struct AttemptRow {
    attempts: i64,
    max_attempts: i64,
    backoff_ms: i64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("Failed to {}: {}", what, e)))
}

impl Database {
    /// Mark a job failed without redelivery
    async fn bury(&self, id: JobId, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', lease_until = NULL, last_error = ?, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("bury job", e))?;
        Ok(())
    }
}

#[async_trait]
impl JobBroker for Database {
    async fn enqueue_bulk(
        &self,
        queue: &str,
        payloads: &[JobPayload],
        options: JobOptions,
    ) -> Result<Vec<JobId>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let encoded = payloads
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let now = now_millis();
        let backoff_ms = millis(options.backoff);
        let mut ids = Vec::with_capacity(encoded.len());

        // One transaction for the whole batch: either every job is queued or none is
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin enqueue transaction", e))?;

        for chunk in encoded.chunks(MAX_JOBS_PER_INSERT) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO jobs (queue, payload, status, max_attempts, backoff_ms, run_at, created_at) ",
            );
            builder.push_values(chunk, |mut b, payload| {
                b.push_bind(queue)
                    .push_bind(payload)
                    .push_bind("waiting")
                    .push_bind(i64::from(options.attempts))
                    .push_bind(backoff_ms)
                    .push_bind(now)
                    .push_bind(now);
            });
            builder.push(" RETURNING id");

            let chunk_ids: Vec<i64> = builder
                .build_query_scalar()
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| query_failed("enqueue jobs", e))?;
            ids.extend(chunk_ids);
        }

        tx.commit()
            .await
            .map_err(|e| query_failed("commit enqueue transaction", e))?;

        tracing::debug!(queue, count = ids.len(), "jobs enqueued");
        Ok(ids)
    }

    async fn lease_next(&self, queue: &str, lease: Duration) -> Result<Option<LeasedJob>> {
        loop {
            let now = now_millis();
            let row = sqlx::query_as::<_, LeasedRow>(
                r#"
                UPDATE jobs
                SET status = 'active', attempts = attempts + 1, lease_until = ?
                WHERE id = (
                    SELECT id FROM jobs
                    WHERE queue = ? AND status = 'waiting' AND run_at <= ?
                    ORDER BY run_at ASC, id ASC
                    LIMIT 1
                )
                RETURNING id, payload, attempts, max_attempts
                "#,
            )
            .bind(now + millis(lease))
            .bind(queue)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("lease job", e))?;

            let Some(row) = row else {
                return Ok(None);
            };

            match serde_json::from_str::<JobPayload>(&row.payload) {
                Ok(payload) => {
                    return Ok(Some(LeasedJob {
                        id: row.id,
                        payload,
                        attempt: u32::try_from(row.attempts).unwrap_or(u32::MAX),
                        max_attempts: u32::try_from(row.max_attempts).unwrap_or(u32::MAX),
                    }));
                }
                Err(e) => {
                    // A payload this build cannot read would be redelivered forever
                    tracing::error!(job_id = row.id, error = %e, "undecodable job payload");
                    let reason = DatabaseError::CorruptRow(format!("job {}: {}", row.id, e));
                    self.bury(row.id, &reason.to_string()).await?;
                }
            }
        }
    }

    async fn renew_lease(&self, id: JobId, lease: Duration) -> Result<bool> {
        let result =
            sqlx::query("UPDATE jobs SET lease_until = ? WHERE id = ? AND status = 'active'")
                .bind(now_millis() + millis(lease))
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| query_failed("renew lease", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'waiting', attempts = MAX(attempts - 1, 0), lease_until = NULL
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("release job", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: JobId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', lease_until = NULL, last_error = NULL, finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("complete job", e))?;

        Ok(())
    }

    async fn fail(&self, id: JobId, reason: &str, unrecoverable: bool) -> Result<FailureOutcome> {
        let row = sqlx::query_as::<_, AttemptRow>(
            "SELECT attempts, max_attempts, backoff_ms FROM jobs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("get job attempts", e))?
        .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;

        if unrecoverable || row.attempts >= row.max_attempts {
            self.bury(id, reason).await?;
            return Ok(FailureOutcome::Dead);
        }

        let base = Duration::from_millis(u64::try_from(row.backoff_ms).unwrap_or(0));
        let delay = backoff_delay(base, u32::try_from(row.attempts).unwrap_or(u32::MAX));

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'waiting', lease_until = NULL, last_error = ?, run_at = ?
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(now_millis() + millis(delay))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("reschedule job", e))?;

        Ok(FailureOutcome::Retrying(delay))
    }

    async fn requeue_stalled(&self, queue: &str) -> Result<u64> {
        let now = now_millis();

        let buried = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', lease_until = NULL, last_error = ?, finished_at = ?
            WHERE queue = ? AND status = 'active' AND lease_until < ?
              AND attempts >= max_attempts
            "#,
        )
        .bind(STALLED_REASON)
        .bind(now)
        .bind(queue)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("fail stalled jobs", e))?;

        if buried.rows_affected() > 0 {
            tracing::warn!(queue, count = buried.rows_affected(), "stalled jobs out of attempts");
        }

        let requeued = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'waiting', lease_until = NULL, run_at = ?, last_error = 'lease expired'
            WHERE queue = ? AND status = 'active' AND lease_until < ?
            "#,
        )
        .bind(now)
        .bind(queue)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("requeue stalled jobs", e))?;

        Ok(requeued.rows_affected())
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs WHERE queue = ? GROUP BY status")
                .bind(queue)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_failed("count jobs", e))?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match status.as_str() {
                "waiting" => stats.waiting = count,
                "active" => stats.active = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}
