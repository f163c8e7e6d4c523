//! Append-only execution journal
//!
//! The journal is the crash-recovery surface of the send pipeline: the
//! intent to broadcast under a nonce is persisted before the broadcast, so
//! a restarted deployment can observe the reservation even when the
//! transaction itself was lost on the way to the node.

use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Typed journal entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalRecord {
    /// Written immediately before a broadcast; observing this record after
    /// a crash means the nonce is reserved
    TransactionPrepareSend {
        future_id: String,
        interaction_id: u64,
        nonce: u64,
        recorded_at: DateTime<Utc>,
    },
}

/// Append-only sink for journal records.
///
/// Durability contract: `record` returns only after the entry is persisted
/// sufficiently that a post-crash replay will see it.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn record(&self, record: JournalRecord) -> DeployerResult<()>;
}

/// JSON-lines journal on disk
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    pub async fn open(path: impl AsRef<Path>) -> DeployerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| DeployerError::Journal(format!("open {:?}: {}", path, e)))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Read back every record, in write order
    pub async fn replay(&self) -> DeployerResult<Vec<JournalRecord>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| DeployerError::Journal(format!("read {:?}: {}", self.path, e)))?;

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| DeployerError::Journal(format!("corrupt record: {}", e)))
            })
            .collect()
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn record(&self, record: JournalRecord) -> DeployerResult<()> {
        let mut line = serde_json::to_string(&record)
            .map_err(|e| DeployerError::Journal(format!("serialize record: {}", e)))?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| DeployerError::Journal(format!("append: {}", e)))?;
        file.sync_data()
            .await
            .map_err(|e| DeployerError::Journal(format!("sync: {}", e)))?;

        debug!("Journaled {:?}", record);
        Ok(())
    }
}

/// In-memory journal for embedders that persist elsewhere, and for tests
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn record(&self, record: JournalRecord) -> DeployerResult<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}
