use super::row::{EventLevel, EventTable};
use super::writer::EventWriter;
use crate::context::{CallerContext, capture_stack};
use crate::driver::DatabaseError;
use crate::retry::classifier::normalized_sql_state;
use crate::sql;
use serde_json::{Map, Value as JsonValue, json};
use std::cell::Cell;
use std::sync::RwLock;

tokio::task_local! {
    static REPORTING: Cell<bool>;
}

/// Persists unhandled query exceptions.
///
/// Reporting is skipped while no writer is bound (early bootstrap) and is not
/// re-entered from inside its own write: if the sink itself fails a query that
/// is reported back here on the same task, that second report is dropped.
pub struct ExceptionReporter {
    writer: RwLock<Option<EventWriter>>,
    level: EventLevel,
    trace_depth: usize,
}

impl ExceptionReporter {
    pub fn new(level: EventLevel, trace_depth: usize) -> Self {
        Self {
            writer: RwLock::new(None),
            level,
            trace_depth,
        }
    }

    pub fn bind(&self, writer: EventWriter) {
        if let Ok(mut slot) = self.writer.write() {
            *slot = Some(writer);
        }
    }

    pub fn unbind(&self) {
        if let Ok(mut slot) = self.writer.write() {
            *slot = None;
        }
    }

    pub fn is_bound(&self) -> bool {
        self.writer.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Reports `err`. Returns `true` when a write was attempted.
    pub async fn report(&self, err: &DatabaseError, caller: Option<&CallerContext>) -> bool {
        if REPORTING.try_with(Cell::get).unwrap_or(false) {
            return false;
        }

        let Some(writer) = self.writer.read().ok().and_then(|slot| slot.clone()) else {
            return false;
        };
        if !writer.sink().is_ready() {
            return false;
        }

        let context = exception_context(err, caller, self.trace_depth);
        REPORTING
            .scope(
                Cell::new(true),
                writer.write(context, EventTable::QueryExceptions, self.level),
            )
            .await;
        true
    }
}

fn exception_context(
    err: &DatabaseError,
    caller: Option<&CallerContext>,
    trace_depth: usize,
) -> Map<String, JsonValue> {
    let raw_sql = err.sql().map(|text| sql::reconstruct_or_raw(text, err.bindings()));
    let caller = caller.cloned().unwrap_or_default();

    let mut context = Map::new();
    context.insert("message".into(), json!(err.message()));
    context.insert("exception_class".into(), json!(err.class_name()));
    context.insert("sql_state".into(), json!(normalized_sql_state(err)));
    context.insert("driver_code".into(), json!(err.driver_code()));
    context.insert("connection".into(), json!(err.connection()));
    context.insert("raw_sql".into(), json!(raw_sql));
    context.insert("method".into(), json!(caller.method));
    context.insert("url".into(), json!(caller.url));
    context.insert("route_name".into(), json!(caller.route_name));
    context.insert("user_id".into(), json!(caller.user_id));
    context.insert("trace".into(), json!(capture_stack(trace_depth)));
    context
}
