use super::backoff::BackoffPolicy;
use super::classifier::{Classification, classify};
use super::context::{AttemptScope, RetryAttemptContext};
use crate::config::{OutcomeLevels, RetryPolicy, RetryToggle, SentryConfig};
use crate::context::ContextSlot;
use crate::driver::{DatabaseError, TransactionRunner};
use crate::events::{EventTable, EventWriter, RetryStatus};
use async_trait::async_trait;
use log::warn;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONNECTION: &str = "default";

/// Suspends the retry loop between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Per-call overrides. Unset limits come from [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryOptions {
    pub max_retries: Option<u32>,
    pub base_delay_secs: Option<u64>,
    pub label: Option<String>,
    pub connection: Option<String>,
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn base_delay_secs(mut self, secs: u64) -> Self {
        self.base_delay_secs = Some(secs);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }
}

/// Terminal state of one retry loop.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, DatabaseError>,
    /// Number of times the unit of work was started.
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, DatabaseError> {
        self.result
    }
}

/// Runs units of work inside transactions, retrying transient contention
/// failures with exponential backoff.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use txsentry::{DatabaseError, RetryOptions, RetryRunner, SentryConfig, TransactionRunner};
///
/// # async fn demo(driver: Arc<dyn TransactionRunner>) -> Result<(), DatabaseError> {
/// let retry = RetryRunner::new(driver, &SentryConfig::default());
/// let total = retry
///     .run(RetryOptions::new().label("checkout"), || async { Ok::<_, DatabaseError>(42) })
///     .await?;
/// assert_eq!(total, 42);
/// # Ok(())
/// # }
/// ```
pub struct RetryRunner {
    runner: Arc<dyn TransactionRunner>,
    writer: Option<EventWriter>,
    policy: RetryPolicy,
    levels: OutcomeLevels,
    toggle: RetryToggle,
    backoff: BackoffPolicy,
    sleeper: Arc<dyn Sleeper>,
    slot: ContextSlot,
    default_connection: String,
}

impl RetryRunner {
    pub fn new(runner: Arc<dyn TransactionRunner>, config: &SentryConfig) -> Self {
        Self {
            runner,
            writer: None,
            policy: config.retry.clone(),
            levels: config.levels.clone(),
            toggle: RetryToggle::new(config.retry.enabled),
            backoff: BackoffPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            slot: ContextSlot::new(),
            default_connection: DEFAULT_CONNECTION.to_string(),
        }
    }

    pub fn with_writer(mut self, writer: EventWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_toggle(mut self, toggle: RetryToggle) -> Self {
        self.toggle = toggle;
        self
    }

    pub fn with_context_slot(mut self, slot: ContextSlot) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_default_connection(mut self, connection: impl Into<String>) -> Self {
        self.default_connection = connection.into();
        self
    }

    pub fn toggle(&self) -> RetryToggle {
        self.toggle
    }

    pub fn context_slot(&self) -> &ContextSlot {
        &self.slot
    }

    /// Runs `work` and returns its value, or the error that ended the loop.
    pub async fn run<F, Fut, T>(&self, options: RetryOptions, work: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        self.run_with_outcome(options, work).await.result
    }

    /// Like [`RetryRunner::run`], also reporting how many attempts were made.
    ///
    /// The label applies to this invocation only: the loop runs inside its
    /// own context scope, so overlapping calls never see each other's label.
    pub async fn run_with_outcome<F, Fut, T>(&self, options: RetryOptions, work: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        let label = options.label.clone();
        self.slot
            .scope_label(label, self.run_loop(options, work))
            .await
    }

    async fn run_loop<F, Fut, T>(&self, options: RetryOptions, mut work: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        let connection = options
            .connection
            .clone()
            .unwrap_or_else(|| self.default_connection.clone());

        if !self.toggle.is_enabled() {
            let result = self.attempt(&connection, &mut work).await;
            return RetryOutcome { result, attempts: 1 };
        }

        let max_retries = options.max_retries.unwrap_or(self.policy.max_retries).max(1);
        let base_delay = options
            .base_delay_secs
            .unwrap_or(self.policy.base_delay_secs)
            .max(1);

        let mut last_failed: Option<RetryAttemptContext> = None;
        let mut attempt = 0u32;

        while attempt < max_retries {
            attempt += 1;

            let err = match self.attempt(&connection, &mut work).await {
                Ok(value) => {
                    if let Some(context) = last_failed.take() {
                        self.persist(context.tagged(RetryStatus::Success)).await;
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            let scope = AttemptScope {
                attempt,
                max_retries,
                label: self.slot.label(),
                connection: &connection,
                caller: self.slot.caller(),
                trace_depth: self.policy.trace_depth,
            };

            let failure = match classify(&err, &self.policy) {
                Classification::Retryable(failure) => failure,
                Classification::Fatal => {
                    // a fatal error after earlier retries still closes the loop's event
                    if last_failed.is_some() {
                        let context = RetryAttemptContext::capture(&err, None, scope);
                        self.persist(context.tagged(RetryStatus::Failure)).await;
                    }
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }
            };

            let context = RetryAttemptContext::capture(&err, Some(failure), scope);
            if attempt >= max_retries {
                self.persist(context.tagged(RetryStatus::Failure)).await;
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            let delay = self.backoff.next_delay(base_delay, attempt);
            warn!(
                "transaction retry on {} (attempt {} of {}, connection '{}'): {} (backoff={}s)",
                failure, attempt, max_retries, connection, err, delay
            );
            last_failed = Some(context);
            self.sleeper.sleep(Duration::from_secs(delay)).await;
        }

        RetryOutcome {
            result: Err(DatabaseError::retries_exhausted(max_retries)),
            attempts: attempt,
        }
    }

    async fn attempt<F, Fut, T>(&self, connection: &str, work: &mut F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        self.runner.begin(connection).await?;
        match work().await {
            Ok(value) => {
                self.runner.commit(connection).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.runner.rollback(connection).await {
                    warn!(
                        "rollback after failed attempt on '{}' failed: {}",
                        connection, rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn persist(&self, context: RetryAttemptContext) {
        let Some(writer) = &self.writer else {
            return;
        };
        let level = match context.status {
            RetryStatus::Success => self.levels.success,
            RetryStatus::Attempt | RetryStatus::Failure => self.levels.failure,
        };
        writer
            .write(context.into_event_context(), EventTable::RetryEvents, level)
            .await;
    }
}
