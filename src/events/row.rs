use super::hashing::digest;
use crate::core::{Column, DataType, Record, Schema, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to a persisted event and to structured log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry status tag carried by a retry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStatus {
    Attempt,
    Success,
    Failure,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attempt => "attempt",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical destination of an event row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTable {
    RetryEvents,
    QueryExceptions,
}

/// Context keys promoted to typed columns. Anything else lands in `context`.
pub const WELL_KNOWN_KEYS: [&str; 14] = [
    "status",
    "message",
    "attempt",
    "max_retries",
    "label",
    "exception_class",
    "sql_state",
    "driver_code",
    "connection",
    "raw_sql",
    "method",
    "url",
    "route_name",
    "user_id",
];

/// Fixed persisted shape shared by retry events and query exceptions.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub occurred_at: DateTime<Utc>,
    pub status: Option<String>,
    pub level: EventLevel,
    pub message: Option<String>,
    pub attempt: Option<i64>,
    pub max_retries: Option<i64>,
    pub label: Option<String>,
    pub exception_class: Option<String>,
    pub sql_state: Option<String>,
    pub driver_code: Option<i64>,
    pub connection: Option<String>,
    pub raw_sql: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub route_name: Option<String>,
    pub user_id: Option<String>,
    /// JSON object holding every non well-known context key.
    pub context: Option<String>,
    pub route_hash: Option<String>,
    pub query_hash: Option<String>,
    pub event_hash: Option<String>,
}

impl EventRow {
    pub(crate) fn with_hashes(mut self) -> Self {
        self.route_hash = digest(&[
            Value::from(self.method.clone()),
            Value::from(self.route_name.clone()),
            Value::from(self.url.clone()),
        ]);
        self.query_hash = digest(&[Value::from(self.raw_sql.clone())]);
        self.event_hash = digest(&[
            Value::from(self.status.clone()),
            Value::from(self.level.as_str()),
            Value::from(self.attempt),
            Value::from(self.max_retries),
            Value::from(self.label.clone()),
            Value::from(self.exception_class.clone()),
            Value::from(self.sql_state.clone()),
            Value::from(self.driver_code),
            Value::from(self.connection.clone()),
            Value::from(self.raw_sql.clone()),
            Value::from(self.method.clone()),
            Value::from(self.url.clone()),
            Value::from(self.route_name.clone()),
            Value::from(self.user_id.clone()),
        ]);
        self
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        record.insert("occurred_at".into(), Value::from(self.occurred_at));
        record.insert("status".into(), Value::from(self.status.clone()));
        record.insert("level".into(), Value::from(self.level.as_str()));
        record.insert("message".into(), Value::from(self.message.clone()));
        record.insert("attempt".into(), Value::from(self.attempt));
        record.insert("max_retries".into(), Value::from(self.max_retries));
        record.insert("label".into(), Value::from(self.label.clone()));
        record.insert("exception_class".into(), Value::from(self.exception_class.clone()));
        record.insert("sql_state".into(), Value::from(self.sql_state.clone()));
        record.insert("driver_code".into(), Value::from(self.driver_code));
        record.insert("connection".into(), Value::from(self.connection.clone()));
        record.insert("raw_sql".into(), Value::from(self.raw_sql.clone()));
        record.insert("method".into(), Value::from(self.method.clone()));
        record.insert("url".into(), Value::from(self.url.clone()));
        record.insert("route_name".into(), Value::from(self.route_name.clone()));
        record.insert("user_id".into(), Value::from(self.user_id.clone()));
        record.insert("context".into(), Value::from(self.context.clone()));
        record.insert("route_hash".into(), Value::from(self.route_hash.clone()));
        record.insert("query_hash".into(), Value::from(self.query_hash.clone()));
        record.insert("event_hash".into(), Value::from(self.event_hash.clone()));
        record
    }

    /// Table layout expected by [`EventRow::to_record`], plus the generated id.
    pub fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Integer).not_null(),
            Column::new("occurred_at", DataType::Timestamp).not_null(),
            Column::new("status", DataType::Text),
            Column::new("level", DataType::Text).not_null(),
            Column::new("message", DataType::Text),
            Column::new("attempt", DataType::Integer),
            Column::new("max_retries", DataType::Integer),
            Column::new("label", DataType::Text),
            Column::new("exception_class", DataType::Text),
            Column::new("sql_state", DataType::Text),
            Column::new("driver_code", DataType::Integer),
            Column::new("connection", DataType::Text),
            Column::new("raw_sql", DataType::Text),
            Column::new("method", DataType::Text),
            Column::new("url", DataType::Text),
            Column::new("route_name", DataType::Text),
            Column::new("user_id", DataType::Text),
            Column::new("context", DataType::Text),
            Column::new("route_hash", DataType::Text),
            Column::new("query_hash", DataType::Text),
            Column::new("event_hash", DataType::Text),
        ])
    }
}
