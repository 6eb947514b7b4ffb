use crate::core::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transient failure categories a driver adapter can attach to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientFailure {
    Deadlock,
    SerializationFailure,
    CustomTransient(i64),
}

impl fmt::Display for TransientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deadlock => write!(f, "deadlock"),
            Self::SerializationFailure => write!(f, "serialization_failure"),
            Self::CustomTransient(code) => write!(f, "custom_transient({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    Query,
    Connection,
    Transaction,
    /// Raised only when the retry loop ends without an outcome.
    RetriesExhausted { max_retries: u32 },
}

impl DatabaseErrorKind {
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Query => "QueryError",
            Self::Connection => "ConnectionError",
            Self::Transaction => "TransactionError",
            Self::RetriesExhausted { .. } => "RetriesExhaustedError",
        }
    }
}

/// A failure raised by the database driver while running a unit of work.
///
/// Every diagnostic field is optional: classification treats an absent field
/// as non-matching.
///
/// # Examples
///
/// ```
/// use txsentry::DatabaseError;
///
/// let err = DatabaseError::query("Deadlock found when trying to get lock")
///     .with_sql_state("40001")
///     .with_driver_code(1213)
///     .on_connection("mysql");
///
/// assert_eq!(err.driver_code(), Some(1213));
/// assert_eq!(err.connection(), Some("mysql"));
/// ```
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct DatabaseError {
    kind: DatabaseErrorKind,
    message: String,
    sql_state: Option<String>,
    driver_code: Option<i64>,
    transient: Option<TransientFailure>,
    connection: Option<String>,
    sql: Option<String>,
    bindings: Vec<Value>,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sql_state: None,
            driver_code: None,
            transient: None,
            connection: None,
            sql: None,
            bindings: Vec::new(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Query, message)
    }

    pub fn connection_failure(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Connection, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Transaction, message)
    }

    pub fn retries_exhausted(max_retries: u32) -> Self {
        Self::new(
            DatabaseErrorKind::RetriesExhausted { max_retries },
            format!("Transaction failed after {} retries", max_retries),
        )
    }

    pub fn with_sql_state(mut self, state: impl Into<String>) -> Self {
        self.sql_state = Some(state.into());
        self
    }

    pub fn with_driver_code(mut self, code: i64) -> Self {
        self.driver_code = Some(code);
        self
    }

    pub fn tagged(mut self, failure: TransientFailure) -> Self {
        self.transient = Some(failure);
        self
    }

    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn with_sql(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.sql = Some(sql.into());
        self.bindings = bindings;
        self
    }

    pub fn kind(&self) -> DatabaseErrorKind {
        self.kind
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The SQL state exactly as the driver reported it.
    pub fn raw_sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }

    pub fn driver_code(&self) -> Option<i64> {
        self.driver_code
    }

    pub fn transient(&self) -> Option<TransientFailure> {
        self.transient
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    pub fn bindings(&self) -> &[Value] {
        &self.bindings
    }
}
