//! Item record queries.

use crate::error::DatabaseError;
use crate::types::{ItemId, StateBucket, TaskState};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::QueryBuilder;
use sqlx::sqlite::Sqlite;

use super::{Database, ItemRecord, MAX_IDS_PER_STATEMENT, RecordStore};

const RECORD_COLUMNS: &str = "id, display_name, cover_url, track_number, album_name, \
     artist_names, source_url, source_checksum, source_size, target_path, target_checksum, \
     target_size, state, state_detail, download_progress, uploaded, created_at";

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("Failed to {}: {}", what, e)))
}

fn push_id_list<'a>(builder: &mut QueryBuilder<'a, Sqlite>, ids: &'a [ItemId]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
}

fn push_state_list<'a>(builder: &mut QueryBuilder<'a, Sqlite>, states: &'a [TaskState]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for state in states {
        separated.push_bind(state);
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl RecordStore for Database {
    async fn find_by_id(&self, id: &ItemId) -> Result<Option<ItemRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?");
        sqlx::query_as::<_, ItemRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("get record", e))
    }

    async fn find_many(&self, ids: &[ItemId]) -> Result<Vec<ItemRecord>> {
        let mut records = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE id IN "
            ));
            push_id_list(&mut builder, chunk);

            let rows = builder
                .build_query_as::<ItemRecord>()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_failed("get records", e))?;
            records.extend(rows);
        }

        Ok(records)
    }

    async fn upsert(&self, record: &ItemRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO records (
                id, display_name, cover_url, track_number, album_name,
                artist_names, source_url, source_checksum, source_size, target_path,
                target_checksum, target_size, state, state_detail, download_progress,
                uploaded, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                cover_url = excluded.cover_url,
                track_number = excluded.track_number,
                album_name = excluded.album_name,
                artist_names = excluded.artist_names,
                source_url = excluded.source_url,
                source_checksum = excluded.source_checksum,
                source_size = excluded.source_size,
                target_path = excluded.target_path,
                target_checksum = excluded.target_checksum,
                target_size = excluded.target_size,
                state = excluded.state,
                state_detail = excluded.state_detail,
                download_progress = excluded.download_progress
            "#,
        )
        .bind(&record.id)
        .bind(&record.display_name)
        .bind(&record.cover_url)
        .bind(record.track_number)
        .bind(&record.album_name)
        .bind(&record.artist_names)
        .bind(&record.source_url)
        .bind(&record.source_checksum)
        .bind(record.source_size)
        .bind(&record.target_path)
        .bind(&record.target_checksum)
        .bind(record.target_size)
        .bind(record.state)
        .bind(&record.state_detail)
        .bind(record.download_progress)
        .bind(record.uploaded)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("upsert record", e))?;

        Ok(())
    }

    async fn ids_where_state_in(
        &self,
        ids: &[ItemId],
        states: &[TaskState],
    ) -> Result<Vec<ItemId>> {
        if ids.is_empty() || states.is_empty() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM records WHERE id IN ");
            push_id_list(&mut builder, chunk);
            builder.push(" AND state IN ");
            push_state_list(&mut builder, states);

            let rows: Vec<ItemId> = builder
                .build_query_scalar()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_failed("query record states", e))?;
            found.extend(rows);
        }

        Ok(found)
    }

    async fn ids_not_existing(&self, ids: &[ItemId]) -> Result<Vec<ItemId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut existing = std::collections::HashSet::new();
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM records WHERE id IN ");
            push_id_list(&mut builder, chunk);

            let rows: Vec<ItemId> = builder
                .build_query_scalar()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| query_failed("query existing records", e))?;
            existing.extend(rows);
        }

        // Keep input order and drop duplicate ids in the input
        let mut seen = std::collections::HashSet::new();
        Ok(ids
            .iter()
            .filter(|id| !existing.contains(*id) && seen.insert(*id))
            .cloned()
            .collect())
    }

    async fn insert_placeholders(&self, ids: &[ItemId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let waiting = TaskState::Waiting;
        let detail = waiting.description();
        let mut inserted = 0;

        // 4 bind variables per row
        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT / 4) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO records (id, state, state_detail, created_at) ",
            );
            builder.push_values(chunk, |mut b, id| {
                b.push_bind(id)
                    .push_bind(waiting)
                    .push_bind(detail)
                    .push_bind(now);
            });
            builder.push(" ON CONFLICT(id) DO NOTHING");

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| query_failed("insert placeholder records", e))?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn reset_to_waiting(&self, ids: &[ItemId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let waiting = TaskState::Waiting;
        let mut updated = 0;

        for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE records SET state = ");
            builder.push_bind(waiting);
            builder.push(", state_detail = ");
            builder.push_bind(waiting.description());
            builder.push(", download_progress = 0 WHERE id IN ");
            push_id_list(&mut builder, chunk);

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| query_failed("reset records", e))?;
            updated += result.rows_affected();
        }

        Ok(updated)
    }

    async fn paginate(
        &self,
        offset: u64,
        limit: u64,
        bucket: Option<StateBucket>,
    ) -> Result<Vec<ItemRecord>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {RECORD_COLUMNS} FROM records"));
        if let Some(bucket) = bucket {
            builder.push(" WHERE state IN ");
            push_state_list(&mut builder, bucket.states());
        }
        builder.push(" ORDER BY created_at DESC, rowid DESC LIMIT ");
        builder.push_bind(limit as i64);
        builder.push(" OFFSET ");
        builder.push_bind(offset as i64);

        builder
            .build_query_as::<ItemRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("paginate records", e))
    }
}
