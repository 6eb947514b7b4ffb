use super::tracker::TransactionTracker;
use crate::core::Value;
use crate::driver::{DatabaseError, TransactionRunner};
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps a driver's [`TransactionRunner`] and reports each transaction
/// boundary to a [`TransactionTracker`].
///
/// A failed `begin` opens no frame. A failed `commit` closes the frame as
/// rolled back since the driver abandons the transaction.
pub struct MonitoredRunner<R> {
    inner: R,
    tracker: Arc<TransactionTracker>,
}

impl<R: TransactionRunner> MonitoredRunner<R> {
    pub fn new(inner: R, tracker: Arc<TransactionTracker>) -> Self {
        Self { inner, tracker }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.tracker
    }

    /// Query hook for the driver: call after each executed statement.
    pub async fn record_query(&self, connection: &str, sql: &str, bindings: &[Value], elapsed_ms: u64) {
        self.tracker
            .on_query_executed(connection, sql, bindings, elapsed_ms)
            .await;
    }
}

#[async_trait]
impl<R: TransactionRunner> TransactionRunner for MonitoredRunner<R> {
    async fn begin(&self, connection: &str) -> Result<(), DatabaseError> {
        self.inner.begin(connection).await?;
        self.tracker.on_begin(connection).await;
        Ok(())
    }

    async fn commit(&self, connection: &str) -> Result<(), DatabaseError> {
        match self.inner.commit(connection).await {
            Ok(()) => {
                self.tracker.on_commit(connection).await;
                Ok(())
            }
            Err(err) => {
                self.tracker.on_rollback(connection).await;
                Err(err)
            }
        }
    }

    async fn rollback(&self, connection: &str) -> Result<(), DatabaseError> {
        let result = self.inner.rollback(connection).await;
        self.tracker.on_rollback(connection).await;
        result
    }
}
