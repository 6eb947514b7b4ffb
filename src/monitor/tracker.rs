use super::frame::{QueryRecord, TransactionFrame, TransactionStatus};
use super::recorder::SlowTransactionRecorder;
use crate::context::ContextSlot;
use crate::core::Value;
use crate::sql;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Level, event};

/// Per-connection stacks of open transaction frames.
///
/// Queries are attributed to the root frame only. When the root frame closes
/// it is handed to the recorder after the stacks lock is released.
pub struct TransactionTracker {
    stacks: Mutex<HashMap<String, Vec<TransactionFrame>>>,
    slot: ContextSlot,
    recorder: Option<Arc<SlowTransactionRecorder>>,
}

impl TransactionTracker {
    pub fn new(slot: ContextSlot) -> Self {
        Self {
            stacks: Mutex::new(HashMap::new()),
            slot,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<SlowTransactionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn context_slot(&self) -> &ContextSlot {
        &self.slot
    }

    pub async fn on_begin(&self, connection: &str) {
        let mut stacks = self.stacks.lock().await;
        let stack = stacks.entry(connection.to_string()).or_default();
        let frame = if stack.is_empty() {
            TransactionFrame::root(connection, self.slot.label(), self.slot.caller())
        } else {
            TransactionFrame::nested(connection)
        };
        stack.push(frame);
    }

    pub async fn on_query_executed(
        &self,
        connection: &str,
        sql_text: &str,
        bindings: &[Value],
        elapsed_ms: u64,
    ) {
        let mut stacks = self.stacks.lock().await;
        let Some(root) = stacks.get_mut(connection).and_then(|stack| stack.first_mut()) else {
            return;
        };
        root.record_query(sql::reconstruct_or_raw(sql_text, bindings), elapsed_ms);
    }

    pub async fn on_commit(&self, connection: &str) {
        self.close(connection, TransactionStatus::Committed).await;
    }

    pub async fn on_rollback(&self, connection: &str) {
        self.close(connection, TransactionStatus::RolledBack).await;
    }

    /// Open nesting depth on `connection`.
    pub async fn depth(&self, connection: &str) -> usize {
        self.stacks
            .lock()
            .await
            .get(connection)
            .map_or(0, Vec::len)
    }

    /// Queries accumulated so far by the open root transaction on `connection`.
    pub async fn pending_queries(&self, connection: &str) -> Vec<QueryRecord> {
        self.stacks
            .lock()
            .await
            .get(connection)
            .and_then(|stack| stack.first())
            .map(|root| root.queries.clone())
            .unwrap_or_default()
    }

    async fn close(&self, connection: &str, status: TransactionStatus) {
        let drained = {
            let mut stacks = self.stacks.lock().await;
            let Some(stack) = stacks.get_mut(connection) else {
                event!(Level::DEBUG, connection, "transaction close without open frame ignored");
                return;
            };
            let frame = stack.pop();
            if stack.is_empty() {
                stacks.remove(connection);
                frame
            } else {
                None
            }
        };

        if let (Some(root), Some(recorder)) = (drained, &self.recorder) {
            recorder.finalize(root, status).await;
        }
    }
}
