use super::sink::EventSink;
use crate::core::{Record, Result, Value};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Append-only JSON-lines store: one `<table>.jsonl` file per table.
///
/// Rows get a uuid v4 `id`. Every column is accepted, so schema probes always
/// succeed.
pub struct JsonlSink {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    /// Opens the sink, creating `root` if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        table_path(&self.root, table)
    }

    /// Reads every row of `table`. A table that was never written is empty.
    pub async fn read_rows(&self, table: &str) -> Result<Vec<Record>> {
        read_rows(&self.root, table).await
    }
}

pub fn table_path(root: &Path, table: &str) -> PathBuf {
    root.join(format!("{}.jsonl", table))
}

/// Reads a table written by [`JsonlSink`] without opening a sink.
pub async fn read_rows(root: &Path, table: &str) -> Result<Vec<Record>> {
    let raw = match fs::read_to_string(table_path(root, table)).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut rows = Vec::new();
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)?;
        rows.push(
            object
                .iter()
                .map(|(key, value)| (key.clone(), Value::from_json(value)))
                .collect(),
        );
    }
    Ok(rows)
}

#[async_trait]
impl EventSink for JsonlSink {
    async fn insert(&self, table: &str, mut record: Record) -> Result<Value> {
        let id = Value::Text(Uuid::new_v4().to_string());
        record.insert("id".to_string(), id.clone());

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.table_path(table))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(id)
    }

    async fn has_column(&self, _table: &str, _column: &str) -> Result<bool> {
        Ok(true)
    }
}
