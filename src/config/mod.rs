// ============================================================================
// Configuration
// ============================================================================
//
// Read-only settings consumed by the retry engine, the transaction monitor and
// the event writer. Every section deserializes with defaults so a partial JSON
// document is a valid configuration.
//
// ============================================================================

pub mod toggle;

pub use toggle::RetryToggle;

use crate::core::{Result, SentryError};
use crate::driver::TransientFailure;
use crate::events::EventLevel;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Retry engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Config-level default for the retry toggle.
    pub enabled: bool,
    /// Maximum number of attempts per orchestrator call.
    pub max_retries: u32,
    /// Base delay in seconds fed to the exponential backoff.
    pub base_delay_secs: u64,
    pub retryable_sql_states: Vec<String>,
    pub retryable_driver_codes: Vec<i64>,
    /// Adapter-tagged failure categories that are retried regardless of codes.
    pub retryable_failures: Vec<TransientFailure>,
    /// Number of stack frames kept in a retry event.
    pub trace_depth: usize,
    /// Marker file written by `txsentry retry enable|disable`. When present it
    /// overrides `enabled`.
    pub marker_path: Option<PathBuf>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_secs: 2,
            retryable_sql_states: vec!["40001".to_string()],
            retryable_driver_codes: vec![1213],
            retryable_failures: Vec::new(),
            trace_depth: 10,
            marker_path: None,
        }
    }
}

/// Transaction monitor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorPolicy {
    pub enabled: bool,
    /// Root transactions at or above this duration get a summary row.
    /// Zero logs every transaction.
    pub transaction_threshold_ms: u64,
    /// Queries strictly above this duration are slow. Zero marks every query slow.
    pub slow_query_threshold_ms: u64,
    /// Emit a leveled log line for every closed root transaction.
    pub logging_enabled: bool,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            transaction_threshold_ms: 0,
            slow_query_threshold_ms: 0,
            logging_enabled: true,
        }
    }
}

/// Target table for each logical event stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub retry_events: String,
    pub query_exceptions: String,
    pub transactions: String,
    pub transaction_queries: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            retry_events: "db_retry_events".to_string(),
            query_exceptions: "db_query_exceptions".to_string(),
            transactions: "db_transaction_logs".to_string(),
            transaction_queries: "db_transaction_queries".to_string(),
        }
    }
}

/// Log level recorded for each terminal retry status.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutcomeLevels {
    pub success: EventLevel,
    pub failure: EventLevel,
}

impl Default for OutcomeLevels {
    fn default() -> Self {
        Self {
            success: EventLevel::Warning,
            failure: EventLevel::Error,
        }
    }
}

/// Complete txsentry configuration.
///
/// # Examples
///
/// ```
/// use txsentry::SentryConfig;
///
/// let config = SentryConfig::default()
///     .max_retries(5)
///     .base_delay_secs(1)
///     .transaction_threshold_ms(250);
///
/// assert_eq!(config.retry.max_retries, 5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    pub retry: RetryPolicy,
    pub monitor: MonitorPolicy,
    pub tables: TableNames,
    pub levels: OutcomeLevels,
}

impl SentryConfig {
    /// Parse a JSON document. Missing sections and fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate().map_err(SentryError::ConfigError)?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SentryError::ConfigError(format!(
                "Failed to read config '{}': {}",
                path.display(),
                err
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Set the maximum attempts per orchestrator call
    pub fn max_retries(mut self, max: u32) -> Self {
        self.retry.max_retries = max;
        self
    }

    /// Set the base backoff delay in seconds
    pub fn base_delay_secs(mut self, secs: u64) -> Self {
        self.retry.base_delay_secs = secs;
        self
    }

    pub fn retryable_sql_state(mut self, state: &str) -> Self {
        self.retry.retryable_sql_states.push(state.to_string());
        self
    }

    pub fn retryable_driver_code(mut self, code: i64) -> Self {
        self.retry.retryable_driver_codes.push(code);
        self
    }

    pub fn retryable_failure(mut self, failure: TransientFailure) -> Self {
        self.retry.retryable_failures.push(failure);
        self
    }

    pub fn retry_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.retry.marker_path = Some(path.into());
        self
    }

    pub fn retries_enabled(mut self, enabled: bool) -> Self {
        self.retry.enabled = enabled;
        self
    }

    /// Set the root transaction duration threshold
    pub fn transaction_threshold_ms(mut self, ms: u64) -> Self {
        self.monitor.transaction_threshold_ms = ms;
        self
    }

    /// Set the slow query threshold
    pub fn slow_query_threshold_ms(mut self, ms: u64) -> Self {
        self.monitor.slow_query_threshold_ms = ms;
        self
    }

    pub fn transaction_logging(mut self, enabled: bool) -> Self {
        self.monitor.logging_enabled = enabled;
        self
    }

    pub fn tables(mut self, tables: TableNames) -> Self {
        self.tables = tables;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        let tables = [
            &self.tables.retry_events,
            &self.tables.query_exceptions,
            &self.tables.transactions,
            &self.tables.transaction_queries,
        ];
        if tables.iter().any(|name| name.trim().is_empty()) {
            return Err("table names cannot be empty".to_string());
        }
        for (idx, name) in tables.iter().enumerate() {
            if tables[idx + 1..].contains(name) {
                return Err(format!("table '{}' is configured twice", name));
            }
        }

        for state in &self.retry.retryable_sql_states {
            let trimmed = state.trim();
            if trimmed.len() != 5 || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(format!("'{}' is not a five character SQL state", state));
            }
        }

        Ok(())
    }
}
