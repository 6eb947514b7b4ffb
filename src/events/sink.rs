use crate::core::{Record, Result, Value};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{Level, event};

/// Append-only store for event rows.
///
/// Implementations report failures through `Result`; txsentry's writers
/// discard those failures so the monitored work is never affected.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Appends `record` to `table` and returns the generated row id.
    async fn insert(&self, table: &str, record: Record) -> Result<Value>;

    async fn insert_batch(&self, table: &str, records: Vec<Record>) -> Result<()> {
        for record in records {
            self.insert(table, record).await?;
        }
        Ok(())
    }

    /// Schema probe used for optional columns.
    async fn has_column(&self, table: &str, column: &str) -> Result<bool>;

    /// `false` while the backing store is not reachable yet.
    fn is_ready(&self) -> bool {
        true
    }
}

#[async_trait]
impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    async fn insert(&self, table: &str, record: Record) -> Result<Value> {
        (**self).insert(table, record).await
    }

    async fn insert_batch(&self, table: &str, records: Vec<Record>) -> Result<()> {
        (**self).insert_batch(table, records).await
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        (**self).has_column(table, column).await
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Drops an observability failure after noting it at debug level.
pub(crate) fn best_effort<T>(result: Result<T>, operation: &'static str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            event!(Level::DEBUG, error = %err, operation, "observability write discarded");
            None
        }
    }
}
