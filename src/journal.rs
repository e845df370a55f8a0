//! Write-ahead journal (spec §4.9).
//!
//! An append-only JSON-lines intent log: every mutation is logged here
//! before it becomes visible in the document store or its indexes.
//! Recovery replays the log from the start; `clear()` truncates it and is
//! only ever called by a caller-confirmed checkpoint (spec §11.5), never
//! by the facade mid-session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::error::Result;

/// One logged intent: an operation tag plus its associated data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub operation: String,
    pub data: serde_json::Value,
}

pub struct Journal {
    path: PathBuf,
    file: Arc<Mutex<tokio::fs::File>>,
}

impl Journal {
    pub async fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Append one intent record, ahead of the mutation it describes
    /// becoming visible.
    pub async fn log_operation(&self, operation: &str, data: serde_json::Value) -> Result<()> {
        let entry = JournalEntry {
            operation: operation.to_string(),
            data,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Replay every logged intent in append order.
    pub async fn recover(&self) -> Result<Vec<JournalEntry>> {
        let file = tokio::fs::File::open(&self.path).await?;
        let mut reader = BufReader::new(file).lines();
        let mut out = Vec::new();
        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    /// Truncate the journal. Only safe once every logged transaction has
    /// been durably reflected in the snapshot files.
    pub async fn clear(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        *file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .read(true)
            .open(&self.path)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn log_and_recover_round_trip() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path().join("journal.log")).await.unwrap();
        journal
            .log_operation("insert", json!({"id": 1}))
            .await
            .unwrap();
        journal
            .log_operation("delete", json!({"id": 1}))
            .await
            .unwrap();
        let entries = journal.recover().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "insert");
        assert_eq!(entries[1].operation, "delete");
    }

    #[tokio::test]
    async fn clear_empties_the_log() {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path().join("journal.log")).await.unwrap();
        journal
            .log_operation("insert", json!({"id": 1}))
            .await
            .unwrap();
        journal.clear().await.unwrap();
        let entries = journal.recover().await.unwrap();
        assert!(entries.is_empty());
    }
}
