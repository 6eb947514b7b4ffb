// ============================================================================
// Retry Engine
// ============================================================================
//
// Classifies driver failures, computes jittered exponential backoff and drives
// the attempt loop. One retry event row is written per call that hit at least
// one transient failure.
//
// ============================================================================

pub mod backoff;
pub mod classifier;
pub mod context;
pub mod orchestrator;

pub use backoff::BackoffPolicy;
pub use classifier::{Classification, classify};
pub use context::{AttemptScope, RetryAttemptContext};
pub use orchestrator::{
    DEFAULT_CONNECTION, RetryOptions, RetryOutcome, RetryRunner, Sleeper, TokioSleeper,
};
