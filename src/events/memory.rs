use super::EventRow;
use super::sink::EventSink;
use crate::config::TableNames;
use crate::core::{Record, Result, Schema, SentryError, Value};
use crate::monitor::{QueryRecord, TransactionSummary};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

struct MemoryTable {
    schema: Schema,
    rows: Vec<Record>,
    next_id: i64,
}

/// Schema-checked in-memory event store.
///
/// Rows are validated against the table schema; the `id` column is assigned
/// by the sink. Useful in tests and for embedding a short-lived dashboard.
pub struct MemorySink {
    tables: RwLock<HashMap<String, MemoryTable>>,
    fail_writes: AtomicBool,
    ready: AtomicBool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
            ready: AtomicBool::new(true),
        }
    }

    /// Creates the four standard tables. `query_completed_at` controls whether
    /// the query detail table carries the denormalized `completed_at` column.
    pub fn for_tables(tables: &TableNames, query_completed_at: bool) -> Self {
        Self::new()
            .with_table(&tables.retry_events, EventRow::schema())
            .with_table(&tables.query_exceptions, EventRow::schema())
            .with_table(&tables.transactions, TransactionSummary::schema())
            .with_table(
                &tables.transaction_queries,
                QueryRecord::schema(query_completed_at),
            )
    }

    pub fn with_table(self, name: &str, schema: Schema) -> Self {
        self.create_table(name, schema);
        self
    }

    pub fn create_table(&self, name: &str, schema: Schema) {
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(
                name.to_string(),
                MemoryTable {
                    schema,
                    rows: Vec::new(),
                    next_id: 1,
                },
            );
        }
    }

    /// Makes every subsequent insert fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.rows.len()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn insert(&self, table: &str, mut record: Record) -> Result<Value> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SentryError::SinkError(format!(
                "write to '{}' rejected",
                table
            )));
        }

        let mut tables = self.tables.write()?;
        let target = tables
            .get_mut(table)
            .ok_or_else(|| SentryError::TableNotFound(table.to_string()))?;

        let id = Value::Integer(target.next_id);
        record.insert("id".to_string(), id.clone());
        target.schema.validate_record(table, &record)?;

        target.next_id += 1;
        target.rows.push(record);
        Ok(id)
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let tables = self.tables.read()?;
        let target = tables
            .get(table)
            .ok_or_else(|| SentryError::TableNotFound(table.to_string()))?;
        Ok(target.schema.has_column(column))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
