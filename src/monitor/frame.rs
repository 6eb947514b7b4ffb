use crate::context::CallerContext;
use crate::core::{Column, DataType, Record, Schema, Value};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Committed,
    RolledBack,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One statement executed inside a root transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub sql: String,
    pub time_ms: u64,
    /// 1-based execution order within the root transaction.
    pub order: u32,
    pub connection: String,
}

impl QueryRecord {
    /// A zero threshold marks every query slow.
    pub fn is_slow(&self, threshold_ms: u64) -> bool {
        threshold_ms == 0 || self.time_ms > threshold_ms
    }

    pub fn to_record(&self, transaction_id: &Value, completed_at: Option<DateTime<Utc>>) -> Record {
        let mut record = Record::new();
        record.insert("transaction_id".into(), transaction_id.clone());
        record.insert("connection".into(), Value::from(self.connection.as_str()));
        record.insert("sql".into(), Value::from(self.sql.as_str()));
        record.insert("time_ms".into(), Value::from(self.time_ms));
        record.insert("query_order".into(), Value::from(self.order));
        if let Some(completed_at) = completed_at {
            record.insert("completed_at".into(), Value::from(completed_at));
        }
        record
    }

    /// Detail table layout. `completed_at` is an optional denormalized copy of
    /// the parent summary's completion time.
    pub fn schema(with_completed_at: bool) -> Schema {
        let mut columns = vec![
            Column::new("id", DataType::Integer).not_null(),
            Column::new("transaction_id", DataType::Integer).not_null(),
            Column::new("connection", DataType::Text).not_null(),
            Column::new("sql", DataType::Text).not_null(),
            Column::new("time_ms", DataType::Integer).not_null(),
            Column::new("query_order", DataType::Integer).not_null(),
        ];
        if with_completed_at {
            columns.push(Column::new("completed_at", DataType::Timestamp));
        }
        Schema::new(columns)
    }
}

/// One nesting level of an open transaction on a connection.
///
/// Only the root frame (depth 0) carries a label, caller and queries.
#[derive(Debug, Clone)]
pub struct TransactionFrame {
    pub connection: String,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
    pub root: bool,
    pub label: Option<String>,
    pub caller: Option<CallerContext>,
    pub queries: Vec<QueryRecord>,
}

impl TransactionFrame {
    pub fn root(connection: &str, label: Option<String>, caller: Option<CallerContext>) -> Self {
        Self {
            connection: connection.to_string(),
            started: Instant::now(),
            started_at: Utc::now(),
            root: true,
            label,
            caller,
            queries: Vec::new(),
        }
    }

    pub fn nested(connection: &str) -> Self {
        Self {
            connection: connection.to_string(),
            started: Instant::now(),
            started_at: Utc::now(),
            root: false,
            label: None,
            caller: None,
            queries: Vec::new(),
        }
    }

    pub fn record_query(&mut self, sql: String, time_ms: u64) {
        let order = self.queries.len() as u32 + 1;
        self.queries.push(QueryRecord {
            sql,
            time_ms,
            order,
            connection: self.connection.clone(),
        });
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis().min(u64::MAX as u128) as u64
    }

    pub fn last_query(&self) -> Option<&QueryRecord> {
        self.queries.last()
    }
}

/// Persisted once per closed root transaction that passed the duration gate.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSummary {
    pub label: Option<String>,
    pub connection: String,
    pub status: TransactionStatus,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub query_count: usize,
    pub slow_query_count: usize,
    pub caller: CallerContext,
}

impl TransactionSummary {
    pub fn from_frame(
        frame: &TransactionFrame,
        status: TransactionStatus,
        elapsed_ms: u64,
        slow_query_threshold_ms: u64,
    ) -> Self {
        Self {
            label: frame.label.clone(),
            connection: frame.connection.clone(),
            status,
            elapsed_ms,
            started_at: frame.started_at,
            completed_at: Utc::now(),
            query_count: frame.queries.len(),
            slow_query_count: frame
                .queries
                .iter()
                .filter(|query| query.is_slow(slow_query_threshold_ms))
                .count(),
            caller: frame.caller.clone().unwrap_or_default(),
        }
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("label".into(), Value::from(self.label.clone()));
        record.insert("connection".into(), Value::from(self.connection.as_str()));
        record.insert("status".into(), Value::from(self.status.as_str()));
        record.insert("elapsed_ms".into(), Value::from(self.elapsed_ms));
        record.insert("started_at".into(), Value::from(self.started_at));
        record.insert("completed_at".into(), Value::from(self.completed_at));
        record.insert("query_count".into(), Value::from(self.query_count as u64));
        record.insert("slow_query_count".into(), Value::from(self.slow_query_count as u64));
        record.insert("method".into(), Value::from(self.caller.method.clone()));
        record.insert("url".into(), Value::from(self.caller.url.clone()));
        record.insert("route_name".into(), Value::from(self.caller.route_name.clone()));
        record.insert("user_id".into(), Value::from(self.caller.user_id.clone()));
        record
    }

    pub fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer).not_null(),
            Column::new("label", DataType::Text),
            Column::new("connection", DataType::Text).not_null(),
            Column::new("status", DataType::Text).not_null(),
            Column::new("elapsed_ms", DataType::Integer).not_null(),
            Column::new("started_at", DataType::Timestamp).not_null(),
            Column::new("completed_at", DataType::Timestamp).not_null(),
            Column::new("query_count", DataType::Integer).not_null(),
            Column::new("slow_query_count", DataType::Integer).not_null(),
            Column::new("method", DataType::Text),
            Column::new("url", DataType::Text),
            Column::new("route_name", DataType::Text),
            Column::new("user_id", DataType::Text),
        ])
    }
}
