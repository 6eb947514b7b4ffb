use super::frame::{TransactionFrame, TransactionStatus, TransactionSummary};
use crate::config::{MonitorPolicy, TableNames};
use crate::core::Record;
use crate::events::sink::best_effort;
use crate::events::{EventLevel, EventSink, StructuredLogger, TracingLogger};
use lru::LruCache;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{Instrument, info_span};

const COMPLETED_AT_COLUMN: &str = "completed_at";
const PROBE_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(16).unwrap();

/// Evaluates closed root transactions against the configured thresholds and
/// persists a summary plus slow-query detail rows.
///
/// Nothing here reports failure to the caller: sink errors are dropped after a
/// debug trace, and the log line is emitted whether or not the write happened.
pub struct SlowTransactionRecorder {
    sink: Arc<dyn EventSink>,
    tables: TableNames,
    policy: MonitorPolicy,
    logger: Arc<dyn StructuredLogger>,
    // detail table name -> carries `completed_at`
    column_probe: Mutex<LruCache<String, bool>>,
}

impl SlowTransactionRecorder {
    pub fn new(sink: Arc<dyn EventSink>, tables: TableNames, policy: MonitorPolicy) -> Self {
        Self {
            sink,
            tables,
            policy,
            logger: Arc::new(TracingLogger),
            column_probe: Mutex::new(LruCache::new(PROBE_CACHE_CAPACITY)),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn StructuredLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn policy(&self) -> &MonitorPolicy {
        &self.policy
    }

    pub async fn finalize(&self, frame: TransactionFrame, status: TransactionStatus) {
        if !self.policy.enabled {
            return;
        }

        let elapsed_ms = frame.elapsed_ms();
        let summary = TransactionSummary::from_frame(
            &frame,
            status,
            elapsed_ms,
            self.policy.slow_query_threshold_ms,
        );
        let span = info_span!(
            "monitor.transaction.finalize",
            connection = %summary.connection,
            status = %status,
            elapsed_ms
        );

        async {
            if elapsed_ms >= self.policy.transaction_threshold_ms && self.sink.is_ready() {
                self.persist(&frame, &summary).await;
            }
            if self.policy.logging_enabled {
                self.log(&frame, &summary);
            }
        }
        .instrument(span)
        .await
    }

    async fn persist(&self, frame: &TransactionFrame, summary: &TransactionSummary) {
        let inserted = self
            .sink
            .insert(&self.tables.transactions, summary.to_record())
            .await;
        let Some(transaction_id) = best_effort(inserted, "transaction_summary") else {
            return;
        };
        if summary.slow_query_count == 0 {
            return;
        }

        let completed_at = self
            .detail_has_completed_at()
            .await
            .then_some(summary.completed_at);
        let threshold = self.policy.slow_query_threshold_ms;
        let details: Vec<Record> = frame
            .queries
            .iter()
            .filter(|query| query.is_slow(threshold))
            .map(|query| query.to_record(&transaction_id, completed_at))
            .collect();

        best_effort(
            self.sink
                .insert_batch(&self.tables.transaction_queries, details)
                .await,
            "slow_query_details",
        );
    }

    /// Probes the detail table once and caches the answer. A failed probe is
    /// not cached.
    async fn detail_has_completed_at(&self) -> bool {
        let table = &self.tables.transaction_queries;
        let cached = self
            .column_probe
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(table).copied());
        if let Some(present) = cached {
            return present;
        }

        let probed = self.sink.has_column(table, COMPLETED_AT_COLUMN).await;
        match best_effort(probed, "completed_at_probe") {
            Some(present) => {
                if let Ok(mut cache) = self.column_probe.lock() {
                    cache.put(table.clone(), present);
                }
                present
            }
            None => false,
        }
    }

    fn log(&self, frame: &TransactionFrame, summary: &TransactionSummary) {
        let level = match summary.status {
            TransactionStatus::Committed => EventLevel::Warning,
            TransactionStatus::RolledBack => EventLevel::Error,
        };

        let mut payload = json!({
            "label": summary.label,
            "connection": summary.connection,
            "status": summary.status.as_str(),
            "elapsed_ms": summary.elapsed_ms,
            "query_count": summary.query_count,
            "slow_query_count": summary.slow_query_count,
            "method": summary.caller.method,
            "url": summary.caller.url,
            "route_name": summary.caller.route_name,
            "user_id": summary.caller.user_id,
        });
        if summary.status == TransactionStatus::RolledBack {
            payload["last_query"] = json!(frame.last_query().map(|query| query.sql.as_str()));
        }

        let message = format!(
            "Transaction {} on '{}' after {} ms ({} queries, {} slow)",
            summary.status,
            summary.connection,
            summary.elapsed_ms,
            summary.query_count,
            summary.slow_query_count
        );
        self.logger.log(level, &message, &payload);
    }
}
