use super::classifier::normalized_sql_state;
use crate::context::{CallerContext, capture_stack};
use crate::driver::{DatabaseError, TransientFailure};
use crate::events::RetryStatus;
use crate::sql;
use serde_json::{Map, Value as JsonValue, json};

/// Diagnostics captured for one failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttemptContext {
    pub attempt: u32,
    pub max_retries: u32,
    pub label: Option<String>,
    pub status: RetryStatus,
    pub failure: Option<TransientFailure>,
    pub exception_class: String,
    pub message: String,
    pub sql_state: Option<String>,
    pub driver_code: Option<i64>,
    pub connection: Option<String>,
    pub raw_sql: Option<String>,
    pub caller: CallerContext,
    pub trace: Vec<String>,
}

/// Where and under which limits an attempt ran.
#[derive(Debug, Clone)]
pub struct AttemptScope<'a> {
    pub attempt: u32,
    pub max_retries: u32,
    pub label: Option<String>,
    pub connection: &'a str,
    pub caller: Option<CallerContext>,
    pub trace_depth: usize,
}

impl RetryAttemptContext {
    pub fn capture(err: &DatabaseError, failure: Option<TransientFailure>, scope: AttemptScope<'_>) -> Self {
        Self {
            attempt: scope.attempt,
            max_retries: scope.max_retries,
            label: scope.label,
            status: RetryStatus::Attempt,
            failure,
            exception_class: err.class_name().to_string(),
            message: err.message().to_string(),
            sql_state: normalized_sql_state(err),
            driver_code: err.driver_code(),
            connection: err
                .connection()
                .map(str::to_string)
                .or_else(|| Some(scope.connection.to_string())),
            raw_sql: err.sql().map(|text| sql::reconstruct_or_raw(text, err.bindings())),
            caller: scope.caller.unwrap_or_default(),
            trace: capture_stack(scope.trace_depth),
        }
    }

    /// Final status tag; the only change a context sees after capture.
    pub fn tagged(mut self, status: RetryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn into_event_context(self) -> Map<String, JsonValue> {
        let mut context = Map::new();
        context.insert("status".into(), json!(self.status.as_str()));
        context.insert("message".into(), json!(self.message));
        context.insert("attempt".into(), json!(self.attempt));
        context.insert("max_retries".into(), json!(self.max_retries));
        context.insert("label".into(), json!(self.label));
        context.insert("exception_class".into(), json!(self.exception_class));
        context.insert("sql_state".into(), json!(self.sql_state));
        context.insert("driver_code".into(), json!(self.driver_code));
        context.insert("connection".into(), json!(self.connection));
        context.insert("raw_sql".into(), json!(self.raw_sql));
        context.insert("method".into(), json!(self.caller.method));
        context.insert("url".into(), json!(self.caller.url));
        context.insert("route_name".into(), json!(self.caller.route_name));
        context.insert("user_id".into(), json!(self.caller.user_id));
        context.insert(
            "transient_failure".into(),
            json!(self.failure.map(|failure| failure.to_string())),
        );
        context.insert("trace".into(), json!(self.trace));
        context
    }
}
