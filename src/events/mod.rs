// ============================================================================
// Event Persistence
// ============================================================================
//
// Shared write path for retry events and unhandled query exceptions, plus
// the shipped sinks and a read-side grouping helper.
//
// ============================================================================

pub mod hashing;
pub mod jsonl;
pub mod logger;
pub mod memory;
pub mod reporter;
pub mod row;
pub mod sink;
pub mod summary;
pub mod writer;

pub use jsonl::JsonlSink;
pub use logger::{StructuredLogger, TracingLogger};
pub use memory::MemorySink;
pub use reporter::ExceptionReporter;
pub use row::{EventLevel, EventRow, EventTable, RetryStatus, WELL_KNOWN_KEYS};
pub use sink::EventSink;
pub use summary::{HashGroup, summarize_by_hash};
pub use writer::EventWriter;
