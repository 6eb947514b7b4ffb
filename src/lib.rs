// ============================================================================
// txsentry Library
// ============================================================================

pub mod config;
pub mod context;
pub mod core;
pub mod driver;
pub mod events;
pub mod monitor;
pub mod retry;
pub mod sql;

// Re-export main types for convenience
pub use config::{MonitorPolicy, OutcomeLevels, RetryPolicy, RetryToggle, SentryConfig, TableNames};
pub use context::{CallerContext, ContextSlot};
pub use crate::core::{Record, Result, SentryError, Value};
pub use driver::{DatabaseError, DatabaseErrorKind, TransactionRunner, TransientFailure};
pub use events::{
    EventLevel, EventSink, EventWriter, ExceptionReporter, JsonlSink, MemorySink, StructuredLogger,
    TracingLogger,
};
pub use monitor::{MonitoredRunner, SlowTransactionRecorder, TransactionStatus, TransactionTracker};
pub use retry::{BackoffPolicy, RetryOptions, RetryOutcome, RetryRunner, Sleeper, TokioSleeper};

use std::future::Future;
use std::sync::Arc;

/// Driver runner as seen by the retry engine: every boundary is reported to
/// the transaction tracker.
pub type SharedMonitoredRunner = Arc<MonitoredRunner<Arc<dyn TransactionRunner>>>;

// ============================================================================
// Facade
// ============================================================================

/// Retry engine, transaction monitor and exception reporter wired to one
/// driver and one event sink.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use txsentry::{
///     DatabaseError, MemorySink, RetryOptions, SentryConfig, TransactionRunner, TxSentry,
/// };
///
/// # async fn demo(driver: Arc<dyn TransactionRunner>) -> txsentry::Result<()> {
/// let config = SentryConfig::default().slow_query_threshold_ms(100);
/// let sink = Arc::new(MemorySink::for_tables(&config.tables, true));
/// let sentry = TxSentry::builder(driver, sink).config(config).build().await?;
///
/// let rows = sentry
///     .run(RetryOptions::new().label("checkout"), || async {
///         Ok::<_, DatabaseError>(3)
///     })
///     .await;
/// assert_eq!(rows.ok(), Some(3));
/// # Ok(())
/// # }
/// ```
pub struct TxSentry {
    config: SentryConfig,
    slot: ContextSlot,
    writer: EventWriter,
    tracker: Arc<TransactionTracker>,
    runner: SharedMonitoredRunner,
    retry: RetryRunner,
    reporter: ExceptionReporter,
}

impl TxSentry {
    pub fn builder(driver: Arc<dyn TransactionRunner>, sink: Arc<dyn EventSink>) -> TxSentryBuilder {
        TxSentryBuilder {
            driver,
            sink,
            config: SentryConfig::default(),
            logger: Arc::new(TracingLogger),
            sleeper: Arc::new(TokioSleeper),
            backoff: None,
            toggle: None,
            slot: ContextSlot::new(),
        }
    }

    /// Runs `work` in a transaction with automatic retries.
    pub async fn run<F, Fut, T>(&self, options: RetryOptions, work: F) -> std::result::Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, DatabaseError>>,
    {
        self.retry.run(options, work).await
    }

    pub async fn run_with_outcome<F, Fut, T>(&self, options: RetryOptions, work: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, DatabaseError>>,
    {
        self.retry.run_with_outcome(options, work).await
    }

    /// Driver query hook.
    pub async fn record_query(&self, connection: &str, sql: &str, bindings: &[Value], elapsed_ms: u64) {
        self.runner.record_query(connection, sql, bindings, elapsed_ms).await;
    }

    /// Persists an unhandled query exception with the current caller context.
    pub async fn report_exception(&self, err: &DatabaseError) -> bool {
        let caller = self.slot.caller();
        self.reporter.report(err, caller.as_ref()).await
    }

    /// Runs `fut` on behalf of `caller`. Retry rows, transaction summaries and
    /// exception reports produced inside are attributed to it, and concurrent
    /// requests never see each other's caller.
    pub async fn with_caller<F: Future>(&self, caller: CallerContext, fut: F) -> F::Output {
        self.slot.scope_caller(caller, fut).await
    }

    /// Sets the caller for the current scope, or the process default when
    /// called outside [`TxSentry::with_caller`].
    pub fn set_caller(&self, caller: CallerContext) {
        self.slot.set_caller(caller);
    }

    pub fn clear_caller(&self) {
        self.slot.clear_caller();
    }

    pub fn context(&self) -> &ContextSlot {
        &self.slot
    }

    /// Transaction runner to use for work outside the retry engine so that
    /// it is still monitored.
    pub fn runner(&self) -> SharedMonitoredRunner {
        self.runner.clone()
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.tracker
    }

    pub fn writer(&self) -> &EventWriter {
        &self.writer
    }

    pub fn reporter(&self) -> &ExceptionReporter {
        &self.reporter
    }

    pub fn retry_toggle(&self) -> RetryToggle {
        self.retry.toggle()
    }

    pub fn config(&self) -> &SentryConfig {
        &self.config
    }
}

pub struct TxSentryBuilder {
    driver: Arc<dyn TransactionRunner>,
    sink: Arc<dyn EventSink>,
    config: SentryConfig,
    logger: Arc<dyn StructuredLogger>,
    sleeper: Arc<dyn Sleeper>,
    backoff: Option<BackoffPolicy>,
    toggle: Option<RetryToggle>,
    slot: ContextSlot,
}

impl TxSentryBuilder {
    pub fn config(mut self, config: SentryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn StructuredLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Overrides the toggle resolved from `retry.enabled` and `retry.marker_path`.
    pub fn retry_toggle(mut self, toggle: RetryToggle) -> Self {
        self.toggle = Some(toggle);
        self
    }

    pub fn context_slot(mut self, slot: ContextSlot) -> Self {
        self.slot = slot;
        self
    }

    /// Validates the configuration, resolves the retry toggle (reading the
    /// persisted marker when one is configured) and wires every component.
    pub async fn build(self) -> Result<TxSentry> {
        self.config.validate().map_err(SentryError::ConfigError)?;

        let writer = EventWriter::new(self.sink.clone(), self.config.tables.clone());

        let recorder = SlowTransactionRecorder::new(
            self.sink.clone(),
            self.config.tables.clone(),
            self.config.monitor.clone(),
        )
        .with_logger(self.logger);
        let tracker = Arc::new(TransactionTracker::new(self.slot.clone()).with_recorder(Arc::new(recorder)));
        let runner: SharedMonitoredRunner = Arc::new(MonitoredRunner::new(self.driver, tracker.clone()));

        let toggle = match self.toggle {
            Some(toggle) => toggle,
            None => RetryToggle::resolve(&self.config.retry).await?,
        };
        let retry = RetryRunner::new(runner.clone(), &self.config)
            .with_writer(writer.clone())
            .with_sleeper(self.sleeper)
            .with_backoff(self.backoff.unwrap_or_default())
            .with_toggle(toggle)
            .with_context_slot(self.slot.clone());

        let reporter = ExceptionReporter::new(self.config.levels.failure, self.config.retry.trace_depth);
        reporter.bind(writer.clone());

        Ok(TxSentry {
            config: self.config,
            slot: self.slot,
            writer,
            tracker,
            runner,
            retry,
            reporter,
        })
    }
}
