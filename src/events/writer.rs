use super::row::{EventLevel, EventRow, EventTable};
use super::sink::{EventSink, best_effort};
use crate::config::TableNames;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Normalizes free-form event context into [`EventRow`]s and appends them to
/// the configured table.
///
/// Writes never fail from the caller's point of view.
#[derive(Clone)]
pub struct EventWriter {
    sink: Arc<dyn EventSink>,
    tables: TableNames,
}

impl EventWriter {
    pub fn new(sink: Arc<dyn EventSink>, tables: TableNames) -> Self {
        Self { sink, tables }
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn table_name(&self, table: EventTable) -> &str {
        match table {
            EventTable::RetryEvents => &self.tables.retry_events,
            EventTable::QueryExceptions => &self.tables.query_exceptions,
        }
    }

    pub async fn write(&self, context: Map<String, JsonValue>, table: EventTable, level: EventLevel) {
        if !self.sink.is_ready() {
            return;
        }
        let row = normalize(context, level, Utc::now());
        let table = self.table_name(table);
        best_effort(self.sink.insert(table, row.to_record()).await, "event_write");
    }
}

/// Moves well-known keys into typed columns and derives the grouping hashes.
pub fn normalize(
    mut context: Map<String, JsonValue>,
    level: EventLevel,
    occurred_at: DateTime<Utc>,
) -> EventRow {
    let row = EventRow {
        occurred_at,
        status: take_string(&mut context, "status"),
        level,
        message: take_string(&mut context, "message"),
        attempt: take_i64(&mut context, "attempt"),
        max_retries: take_i64(&mut context, "max_retries"),
        label: take_string(&mut context, "label"),
        exception_class: take_string(&mut context, "exception_class"),
        sql_state: take_string(&mut context, "sql_state"),
        driver_code: take_i64(&mut context, "driver_code"),
        connection: take_string(&mut context, "connection"),
        raw_sql: take_string(&mut context, "raw_sql"),
        method: take_string(&mut context, "method"),
        url: take_string(&mut context, "url"),
        route_name: take_string(&mut context, "route_name"),
        user_id: take_string(&mut context, "user_id"),
        context: if context.is_empty() {
            None
        } else {
            serde_json::to_string(&context).ok()
        },
        route_hash: None,
        query_hash: None,
        event_hash: None,
    };
    row.with_hashes()
}

fn take_string(context: &mut Map<String, JsonValue>, key: &str) -> Option<String> {
    match context.remove(key)? {
        JsonValue::Null => None,
        JsonValue::String(s) if s.is_empty() => None,
        JsonValue::String(s) => Some(s),
        JsonValue::Bool(b) => Some(if b { "1" } else { "0" }.to_string()),
        other => Some(other.to_string()),
    }
}

fn take_i64(context: &mut Map<String, JsonValue>, key: &str) -> Option<i64> {
    match context.remove(key)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
