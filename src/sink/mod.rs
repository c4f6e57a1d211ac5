//! Append-only destinations for extracted records.
//!
//! Appends are launched in the background and never awaited by the code that
//! produced the record; a failing sink only shows up in the logs.

mod sheets;
mod sqlite;

pub use sheets::SheetsSink;
pub use sqlite::{RecordStore, StoredRecord};

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::document::{COLUMNS, LogisticsDocumentResult};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("auth error: {0}")]
    Auth(String),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One row as handed to every sink.
#[derive(Debug, Clone)]
pub struct SinkRow {
    pub timestamp: String,
    pub file_name: Option<String>,
    pub record: LogisticsDocumentResult,
}

impl SinkRow {
    pub fn new(record: LogisticsDocumentResult, file_name: Option<String>) -> Self {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Self {
            timestamp,
            file_name,
            record,
        }
    }

    /// `timestamp`, `file_name`, then the record columns.
    pub fn header() -> Vec<&'static str> {
        let mut header = vec!["timestamp", "file_name"];
        header.extend(COLUMNS);
        header
    }

    pub fn values(&self) -> Vec<Value> {
        let mut values = vec![
            Value::String(self.timestamp.clone()),
            Value::String(self.file_name.clone().unwrap_or_default()),
        ];
        values.extend(self.record.to_row());
        values
    }
}

#[async_trait]
pub trait DocumentSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn append(&self, row: &SinkRow) -> Result<(), SinkError>;
}

/// Launches appends to every configured sink without waiting for them.
#[derive(Clone, Default)]
pub struct Persistence {
    sinks: Arc<Vec<Arc<dyn DocumentSink>>>,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Persistence {
    pub fn new(sinks: Vec<Arc<dyn DocumentSink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
            tasks: Arc::default(),
        }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Spawn one append per sink and return immediately. Must be called from
    /// within a tokio runtime.
    pub fn launch(&self, record: LogisticsDocumentResult, file_name: Option<String>) {
        if self.sinks.is_empty() {
            return;
        }
        let row = Arc::new(SinkRow::new(record, file_name));

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        while tasks.try_join_next().is_some() {}

        for sink in self.sinks.iter() {
            let sink = Arc::clone(sink);
            let row = Arc::clone(&row);
            tasks.spawn(async move {
                match sink.append(&row).await {
                    Ok(()) => debug!(sink = sink.name(), "Row appended"),
                    Err(e) => warn!(sink = sink.name(), error = %e, "Append failed"),
                }
            });
        }
    }

    /// Wait for appends still in flight. Only for process shutdown.
    pub async fn drain(&self) {
        let mut pending = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *tasks)
        };
        while pending.join_next().await.is_some() {}
    }
}
