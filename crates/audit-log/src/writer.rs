//! Pluggable batch writers for the audit sink.

use crate::AuditError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use warden_core::DecisionRecord;

/// Destination for closed audit chunks. The set of backends is open
/// (files, object stores, test capture), so this is a vtable seam.
///
/// Writers must be idempotent-tolerant: the sink guarantees at-least-once
/// delivery and downstream consumers dedup on `request_id`.
#[async_trait]
pub trait AuditWriter: Send + Sync {
    /// Durably append one batch. An error triggers the sink's retry path.
    async fn write(&self, batch: &[DecisionRecord]) -> Result<(), AuditError>;
}

/// Append-only JSONL store partitioned by UTC hour.
///
/// One file per partition (`decisions-YYYYMMDDHH.jsonl`), one JSON object
/// per line. Compression and retention of older partitions belong to the
/// downstream store, not here.
pub struct JsonlPartitionWriter {
    dir: PathBuf,
}

impl JsonlPartitionWriter {
    /// Create or reuse the partition directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, AuditError> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf() })
    }

    fn partition_path(&self, record: &DecisionRecord) -> PathBuf {
        let partition = record.evaluated_at.format("%Y%m%d%H");
        self.dir.join(format!("decisions-{partition}.jsonl"))
    }
}

#[async_trait]
impl AuditWriter for JsonlPartitionWriter {
    async fn write(&self, batch: &[DecisionRecord]) -> Result<(), AuditError> {
        // Batches are small and local-disk appends are fast; group
        // consecutive records per partition to keep one open handle at a
        // time.
        let mut open: Option<(PathBuf, std::fs::File)> = None;
        for record in batch {
            let path = self.partition_path(record);
            let reuse = open.as_ref().is_some_and(|(p, _)| *p == path);
            if !reuse {
                if let Some((_, mut file)) = open.take() {
                    file.flush()?;
                }
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                open = Some((path, file));
            }
            let (_, file) = open.as_mut().expect("handle opened above");
            let line = serde_json::to_string(record)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        if let Some((_, mut file)) = open {
            file.flush()?;
        }
        Ok(())
    }
}

/// In-memory capture writer for tests and local debugging.
#[derive(Default)]
pub struct VecWriter {
    records: Mutex<Vec<DecisionRecord>>,
}

impl VecWriter {
    /// Empty capture writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    #[must_use]
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().clone()
    }

    /// Number of records written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AuditWriter for VecWriter {
    async fn write(&self, batch: &[DecisionRecord]) -> Result<(), AuditError> {
        self.records.lock().extend_from_slice(batch);
        Ok(())
    }
}
