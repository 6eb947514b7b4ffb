use super::EventLevel;
use serde_json::Value as JsonValue;
use tracing::{Level, event};

/// Leveled structured log destination.
pub trait StructuredLogger: Send + Sync {
    fn log(&self, level: EventLevel, message: &str, context: &JsonValue);
}

/// Routes structured log lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl StructuredLogger for TracingLogger {
    fn log(&self, level: EventLevel, message: &str, context: &JsonValue) {
        match level {
            EventLevel::Debug => event!(Level::DEBUG, context = %context, "{}", message),
            EventLevel::Info | EventLevel::Notice => {
                event!(Level::INFO, context = %context, "{}", message)
            }
            EventLevel::Warning => event!(Level::WARN, context = %context, "{}", message),
            EventLevel::Error | EventLevel::Critical => {
                event!(Level::ERROR, context = %context, "{}", message)
            }
        }
    }
}
