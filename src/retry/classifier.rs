use crate::config::RetryPolicy;
use crate::driver::{DatabaseError, DatabaseErrorKind, TransientFailure};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SQLSTATE_MARKER: Regex = Regex::new(r"SQLSTATE\[([0-9A-Za-z]{5})\]").unwrap();
}

const DEADLOCK_DRIVER_CODE: i64 = 1213;
const DEADLOCK_SQL_STATE: &str = "40P01";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable(TransientFailure),
    Fatal,
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Upper-cased five character SQL state, or `None` for anything else.
pub fn normalize_sql_state(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 5 && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(trimmed.to_ascii_uppercase())
    } else {
        None
    }
}

/// SQL state of `err`, falling back to a `SQLSTATE[xxxxx]` marker in the
/// driver message.
pub fn normalized_sql_state(err: &DatabaseError) -> Option<String> {
    err.raw_sql_state()
        .and_then(normalize_sql_state)
        .or_else(|| {
            SQLSTATE_MARKER
                .captures(err.message())
                .and_then(|caps| caps.get(1))
                .and_then(|state| normalize_sql_state(state.as_str()))
        })
}

/// Decides whether `err` is worth another attempt.
///
/// Fails closed: anything not positively matched is fatal.
pub fn classify(err: &DatabaseError, policy: &RetryPolicy) -> Classification {
    if matches!(err.kind(), DatabaseErrorKind::RetriesExhausted { .. }) {
        return Classification::Fatal;
    }

    if let Some(state) = normalized_sql_state(err) {
        let listed = policy
            .retryable_sql_states
            .iter()
            .filter_map(|candidate| normalize_sql_state(candidate))
            .any(|candidate| candidate == state);
        if listed {
            let failure = if state == DEADLOCK_SQL_STATE {
                TransientFailure::Deadlock
            } else {
                TransientFailure::SerializationFailure
            };
            return Classification::Retryable(failure);
        }
    }

    if let Some(code) = err.driver_code() {
        if policy.retryable_driver_codes.contains(&code) {
            let failure = if code == DEADLOCK_DRIVER_CODE {
                TransientFailure::Deadlock
            } else {
                TransientFailure::CustomTransient(code)
            };
            return Classification::Retryable(failure);
        }
    }

    if let Some(tag) = err.transient() {
        if policy.retryable_failures.contains(&tag) {
            return Classification::Retryable(tag);
        }
    }

    Classification::Fatal
}
