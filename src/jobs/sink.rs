//! Append-only destinations for per-row verification results.

use crate::core::error::{AppError, Result};
use crate::core::models::{JobId, VerificationOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// One verified row as written to a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub row_index: usize,
    /// Address after extraction and normalization.
    pub email: String,
    pub original_fields: BTreeMap<String, String>,
    #[serde(flatten)]
    pub outcome: VerificationOutcome,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn append(&self, record: ResultRecord) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryResultSink {
    records: Mutex<Vec<ResultRecord>>,
}

impl InMemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records for `job_id`, in append order.
    pub fn records(&self, job_id: JobId) -> Vec<ResultRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn append(&self, record: ResultRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Writes one JSON object per line. Each record is written and flushed on the
/// blocking pool as it arrives.
pub struct JsonLinesSink {
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl JsonLinesSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn append(&self, record: ResultRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut writer = writer.lock();
            writeln!(writer, "{}", line)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::Task(e.to_string()))?
    }
}
