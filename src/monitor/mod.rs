// ============================================================================
// Transaction Monitor
// ============================================================================
//
// Tracks nested transactions per connection, attributes executed queries to
// the root transaction and, when the root closes, persists a duration summary
// with slow-query detail rows.
//
// ============================================================================

pub mod frame;
pub mod recorder;
pub mod runner;
pub mod tracker;

pub use frame::{QueryRecord, TransactionFrame, TransactionStatus, TransactionSummary};
pub use recorder::SlowTransactionRecorder;
pub use runner::MonitoredRunner;
pub use tracker::TransactionTracker;
