//! In-memory commit log
//!
//! Keeps every record in a vector behind one async mutex. Nothing is
//! persisted; it backs the simpler API surface that has no segment files.

use tokio::sync::Mutex;

use super::log::Record;
use crate::common::{Error, Result};

#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Mutex<Vec<Record>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Appends `record` and returns the offset it was stored at.
    pub async fn append(&self, mut record: Record) -> Result<u64> {
        let mut records = self.records.lock().await;
        let offset = records.len() as u64;
        record.offset = offset;
        records.push(record);
        Ok(offset)
    }

    pub async fn read(&self, offset: u64) -> Result<Record> {
        let records = self.records.lock().await;
        usize::try_from(offset)
            .ok()
            .and_then(|i| records.get(i))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("offset {}", offset)))
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Copy of every record currently held.
    pub async fn records(&self) -> Vec<Record> {
        self.records.lock().await.clone()
    }
}
