//! Serialized writes of one task's record.
//!
//! The task and the job timeout both want to write the record's final state. Every write
//! goes through one [`TaskRecord`] under an async lock; the first terminal write closes it
//! and everything after that (late progress, a losing terminal write) is dropped.

use crate::Result;
use crate::db::{ItemRecord, RecordStore};
use std::sync::Arc;
use tokio::sync::Mutex;

struct Slot {
    record: ItemRecord,
    finished: bool,
}

/// Shared handle to the in-flight record of one download task
#[derive(Clone)]
pub struct TaskRecord {
    store: Arc<dyn RecordStore>,
    slot: Arc<Mutex<Slot>>,
}

impl TaskRecord {
    pub(crate) fn new(store: Arc<dyn RecordStore>, record: ItemRecord) -> Self {
        Self {
            store,
            slot: Arc::new(Mutex::new(Slot {
                record,
                finished: false,
            })),
        }
    }

    /// Apply `change` and persist it, unless a terminal state was already written.
    /// Returns whether the write happened.
    pub async fn update<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut ItemRecord),
    {
        let mut slot = self.slot.lock().await;
        if slot.finished {
            return Ok(false);
        }
        change(&mut slot.record);
        self.store.upsert(&slot.record).await?;
        Ok(true)
    }

    /// Apply `change`, persist it and close the record. Only the first caller writes.
    ///
    /// The record stays open when the write fails, so a later terminal write can still
    /// land.
    pub async fn finish<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut ItemRecord),
    {
        let mut slot = self.slot.lock().await;
        if slot.finished {
            return Ok(false);
        }
        change(&mut slot.record);
        self.store.upsert(&slot.record).await?;
        slot.finished = true;
        Ok(true)
    }

    /// Whether a terminal state was written
    pub async fn is_finished(&self) -> bool {
        self.slot.lock().await.finished
    }

    /// Copy of the record as last written (or about to be)
    pub async fn snapshot(&self) -> ItemRecord {
        self.slot.lock().await.record.clone()
    }
}
