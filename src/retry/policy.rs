//! The retry policy.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;

use super::events::{EventBatch, EventDispatcher, RetryEvent, RetryEventKind};
use super::options::{RetryContext, RetryOptions};
use crate::clock::{default_clock, Clock, SharedClock};
use crate::context::{ContextTracker, PolicyContext};
use crate::error::{PolicyError, PolicyResult, RetryExhausted};
use crate::jitter::JitterCalculator;
use crate::policy::{Operation, Policy};
use crate::sync::lock;

/// Callback invoked before each backoff sleep with the failed attempt number,
/// its error and the upcoming delay.
pub type OnRetry = Arc<dyn Fn(u32, &PolicyError, Duration) + Send + Sync>;

/// Re-runs a failed operation with backoff between attempts.
///
/// `RetryPolicy::new(count, options)` makes at most `count + 1` attempts.
/// When the attempt budget runs out the result is
/// [`PolicyError::RetryExhausted`] carrying the last error. When the retry
/// predicate rejects an error, that error is returned unchanged.
///
/// # Examples
///
/// ```rust
/// use breakwater::prelude::*;
/// use breakwater::MockClock;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let clock = MockClock::new();
/// let policy = RetryPolicy::new(3, RetryOptions::exponential(Duration::from_millis(100)))
///     .with_clock(clock.clone());
///
/// let calls = AtomicU32::new(0);
/// let result = policy
///     .execute(|| {
///         let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
///         async move {
///             if n < 3 {
///                 Err(PolicyError::from("transient"))
///             } else {
///                 Ok(n)
///             }
///         }
///     })
///     .await;
///
/// assert_eq!(result.unwrap(), 3);
/// assert_eq!(
///     clock.sleeps(),
///     vec![Duration::from_millis(100), Duration::from_millis(200)]
/// );
/// # });
/// ```
pub struct RetryPolicy {
    name: String,
    count: u32,
    options: RetryOptions,
    clock: SharedClock,
    jitter: Mutex<JitterCalculator>,
    on_retry: Vec<OnRetry>,
    operation_id: Option<String>,
    events: EventDispatcher,
    context: ContextTracker,
}

impl RetryPolicy {
    /// Retry up to `count` times after the first attempt.
    pub fn new(count: u32, options: RetryOptions) -> Self {
        let jitter = JitterCalculator::new(options.jitter());
        let events = EventDispatcher::new(options.events.clone(), options.event_options());
        Self {
            name: "retry".to_string(),
            count,
            options,
            clock: default_clock(),
            jitter: Mutex::new(jitter),
            on_retry: Vec::new(),
            operation_id: None,
            events,
            context: ContextTracker::default(),
        }
    }

    /// Use `clock` for sleeps and timestamps.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Name used in errors, events and logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Correlation id copied into every event.
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Replace the random source of the jitter calculator.
    pub fn with_random<F>(self, random: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        let jitter = JitterCalculator::new(self.options.jitter()).with_random(random);
        Self {
            jitter: Mutex::new(jitter),
            ..self
        }
    }

    /// Register a callback run before each backoff sleep.
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &PolicyError, Duration) + Send + Sync + 'static,
    {
        self.on_retry.push(Arc::new(callback));
        self
    }

    /// Retries allowed after the first attempt.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Attempts allowed in total.
    pub fn max_attempts(&self) -> u32 {
        self.count.saturating_add(1)
    }

    /// The configuration.
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// The correlation id, if set.
    pub fn operation_id(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    /// Backoff delay after failed attempt `attempt`, capped, before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.options.delay_for_attempt(attempt)
    }

    /// Clear the decorrelated jitter state.
    pub fn reset(&self) {
        lock(&self.jitter).reset();
    }

    /// Execution counters.
    pub fn context(&self) -> PolicyContext {
        self.context.snapshot()
    }

    /// Clear execution counters, keeping metadata.
    pub fn reset_context(&self) {
        self.context.reset();
    }

    /// Attach an annotation to the execution context.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.context.set_metadata(key.into(), value.into());
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.options.delay_for_attempt(attempt);
        let max = self.options.max_delay().unwrap_or(Duration::MAX);
        lock(&self.jitter).calculate(base, max)
    }

    fn emit(&self, events: &mut EventBatch<'_>, kind: RetryEventKind) {
        if !self.events.is_active() {
            return;
        }
        events.emit(RetryEvent {
            timestamp: self.clock.system_time(),
            policy: self.name.clone(),
            operation_id: self.operation_id.clone(),
            kind,
        });
    }

    async fn permits_retry(&self, error: &PolicyError, attempt: u32, elapsed: Duration) -> bool {
        if let Some(should_retry) = &self.options.should_retry {
            let context = RetryContext {
                attempt,
                max_attempts: self.max_attempts(),
                error: error.clone(),
                elapsed,
            };
            return should_retry(context).await;
        }
        match &self.options.handle {
            Some(handle) => handle(error),
            None => true,
        }
    }

    fn finish<T>(&self, events: &mut EventBatch<'_>, result: PolicyResult<T>) -> PolicyResult<T> {
        self.context.record(&result, self.clock.system_time());
        events.flush();
        result
    }

    async fn run<'a, T>(&'a self, operation: Operation<'a, T>) -> PolicyResult<T> {
        let start = self.clock.now();
        let elapsed = |now: Instant| now.saturating_duration_since(start);
        self.reset();
        let mut events = self.events.batch();

        self.emit(&mut events, RetryEventKind::Started {
            max_attempts: self.max_attempts(),
            backoff: self.options.backoff(),
            delay: self.options.delay(),
            max_delay: self.options.max_delay(),
            jitter: self.options.jitter(),
        });

        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            self.emit(&mut events, RetryEventKind::Attempt {
                attempt,
                elapsed: elapsed(self.clock.now()),
            });

            let error = match operation().await {
                Ok(value) => {
                    self.emit(&mut events, RetryEventKind::Succeeded {
                        attempt,
                        total_attempts: attempt,
                        total_elapsed: elapsed(self.clock.now()),
                    });
                    #[cfg(feature = "tracing")]
                    if attempt > 1 {
                        tracing::debug!(policy = %self.name, attempt, "succeeded after retry");
                    }
                    return self.finish(&mut events, Ok(value));
                }
                Err(error) => error,
            };

            let spent = elapsed(self.clock.now());
            let has_budget = attempt <= self.count;
            let will_retry = has_budget && self.permits_retry(&error, attempt, spent).await;

            self.emit(&mut events, RetryEventKind::Failed {
                attempt,
                error: error.clone(),
                elapsed: spent,
                will_retry,
            });

            if !will_retry {
                if has_budget {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(policy = %self.name, attempt, error = %error, "error not retryable");
                    return self.finish(&mut events, Err(error));
                }

                self.emit(&mut events, RetryEventKind::Exhausted {
                    total_attempts: attempt,
                    last_error: error.clone(),
                    total_elapsed: spent,
                });
                #[cfg(feature = "tracing")]
                tracing::warn!(policy = %self.name, attempts = attempt, error = %error, "retries exhausted");
                let exhausted = RetryExhausted::new(self.name.clone(), attempt, error, spent);
                return self.finish(&mut events, Err(PolicyError::RetryExhausted(exhausted)));
            }

            let delay = self.next_delay(attempt);
            self.emit(&mut events, RetryEventKind::Backoff {
                attempt,
                delay,
                next_attempt_at: self.clock.system_time() + delay,
            });
            for callback in &self.on_retry {
                callback(attempt, &error, delay);
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(policy = %self.name, attempt, ?delay, error = %error, "retrying");

            self.clock.sleep(delay).await;
        }
    }
}

impl<T: Send + 'static> Policy<T> for RetryPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_operation<'a>(&'a self, operation: Operation<'a, T>) -> BoxFuture<'a, PolicyResult<T>> {
        self.run(operation).boxed()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("count", &self.count)
            .field("options", &self.options)
            .field("operation_id", &self.operation_id)
            .field("on_retry", &self.on_retry.len())
            .finish_non_exhaustive()
    }
}
