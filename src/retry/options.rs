//! Retry configuration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::events::{EventOptions, RetryEvent, RetryEventHandlers};
use crate::error::{ConfigError, PolicyError};
use crate::jitter::JitterStrategy;

/// The backoff strategy for retry delays.
///
/// Attempts are numbered from 1; `n` below is the number of the attempt that
/// just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Backoff {
    /// Fixed delay between attempts.
    #[default]
    Constant,
    /// Delay increases linearly: base * n.
    Linear,
    /// Delay doubles: base * 2^(n-1).
    Exponential,
    /// Delay follows the Fibonacci sequence: base * fib(n).
    Fibonacci,
}

impl Backoff {
    /// Uncapped delay after failed attempt `attempt`.
    ///
    /// ```rust
    /// use breakwater::Backoff;
    /// use std::time::Duration;
    ///
    /// let base = Duration::from_millis(100);
    /// assert_eq!(Backoff::Exponential.delay(base, 1), Duration::from_millis(100));
    /// assert_eq!(Backoff::Exponential.delay(base, 4), Duration::from_millis(800));
    /// assert_eq!(Backoff::Linear.delay(base, 3), Duration::from_millis(300));
    /// ```
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let n = attempt.max(1);
        match self {
            Backoff::Constant => base,
            Backoff::Linear => base.saturating_mul(n),
            Backoff::Exponential => base.saturating_mul(2u32.saturating_pow(n - 1)),
            Backoff::Fibonacci => base.saturating_mul(fibonacci(n)),
        }
    }
}

/// Calculate the nth Fibonacci number.
fn fibonacci(n: u32) -> u32 {
    if n == 0 {
        return 0;
    }
    let mut a = 0u32;
    let mut b = 1u32;
    for _ in 1..n {
        if b == u32::MAX {
            break;
        }
        let temp = a.saturating_add(b);
        a = b;
        b = temp;
    }
    b
}

/// What a `should_retry` predicate gets to look at.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Number of the attempt that just failed (1-indexed).
    pub attempt: u32,
    /// Attempts the policy allows in total.
    pub max_attempts: u32,
    /// Error of the failed attempt.
    pub error: PolicyError,
    /// Time since the first attempt started.
    pub elapsed: Duration,
}

/// Synchronous error filter.
pub type HandlePredicate = Arc<dyn Fn(&PolicyError) -> bool + Send + Sync>;

/// Possibly asynchronous retry decision.
pub type ShouldRetry = Arc<dyn Fn(RetryContext) -> BoxFuture<'static, bool> + Send + Sync>;

/// Immutable retry configuration.
///
/// # Examples
///
/// ```rust
/// use breakwater::{Backoff, RetryOptions, PolicyError};
/// use std::time::Duration;
///
/// let options = RetryOptions::exponential(Duration::from_millis(100))
///     .with_max_delay(Duration::from_millis(500))
///     .with_full_jitter()
///     .handle(|error: &PolicyError| error.is_timeout());
///
/// assert_eq!(options.backoff(), Backoff::Exponential);
/// assert_eq!(options.delay_for_attempt(2), Duration::from_millis(200));
/// assert_eq!(options.delay_for_attempt(5), Duration::from_millis(500)); // capped
/// ```
#[derive(Clone)]
pub struct RetryOptions {
    backoff: Backoff,
    delay: Duration,
    max_delay: Option<Duration>,
    jitter: JitterStrategy,
    pub(crate) handle: Option<HandlePredicate>,
    pub(crate) should_retry: Option<ShouldRetry>,
    pub(crate) events: RetryEventHandlers,
    event_options: EventOptions,
}

impl RetryOptions {
    /// Constant backoff with the given base delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            backoff: Backoff::Constant,
            delay,
            max_delay: None,
            jitter: JitterStrategy::None,
            handle: None,
            should_retry: None,
            events: RetryEventHandlers::default(),
            event_options: EventOptions::default(),
        }
    }

    /// Create options with constant delay between retries.
    pub fn constant(delay: Duration) -> Self {
        Self::new(delay)
    }

    /// Create options with linearly increasing delay.
    pub fn linear(base: Duration) -> Self {
        Self::new(base).with_backoff(Backoff::Linear)
    }

    /// Create options with exponentially increasing delay.
    pub fn exponential(base: Duration) -> Self {
        Self::new(base).with_backoff(Backoff::Exponential)
    }

    /// Create options with Fibonacci-based delay.
    pub fn fibonacci(base: Duration) -> Self {
        Self::new(base).with_backoff(Backoff::Fibonacci)
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the maximum delay cap.
    ///
    /// Delays will never exceed this value, regardless of the backoff strategy.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Set the jitter strategy.
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Use full jitter (AWS recommended).
    pub fn with_full_jitter(self) -> Self {
        self.with_jitter(JitterStrategy::Full)
    }

    /// Use equal jitter.
    pub fn with_equal_jitter(self) -> Self {
        self.with_jitter(JitterStrategy::Equal)
    }

    /// Use decorrelated jitter (AWS style).
    pub fn with_decorrelated_jitter(self) -> Self {
        self.with_jitter(JitterStrategy::Decorrelated)
    }

    /// Only retry errors for which `predicate` returns true.
    pub fn handle<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&PolicyError) -> bool + Send + Sync + 'static,
    {
        self.handle = Some(Arc::new(predicate));
        self
    }

    /// Decide retries from the full [`RetryContext`].
    ///
    /// Takes precedence over [`RetryOptions::handle`] when both are set.
    pub fn should_retry<P>(self, predicate: P) -> Self
    where
        P: Fn(&RetryContext) -> bool + Send + Sync + 'static,
    {
        self.should_retry_async(move |context| futures::future::ready(predicate(&context)))
    }

    /// Asynchronous variant of [`RetryOptions::should_retry`].
    pub fn should_retry_async<P, Fut>(mut self, predicate: P) -> Self
    where
        P: Fn(RetryContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.should_retry = Some(Arc::new(move |context| predicate(context).boxed()));
        self
    }

    /// Replace the lifecycle event handlers.
    pub fn with_events(mut self, events: RetryEventHandlers) -> Self {
        self.events = events;
        self
    }

    /// Shorthand for a catch-all event handler.
    pub fn on_event<H>(mut self, handler: H) -> Self
    where
        H: Fn(&RetryEvent) + Send + Sync + 'static,
    {
        self.events = self.events.on_event(handler);
        self
    }

    /// Configure event batching.
    pub fn with_event_options(mut self, event_options: EventOptions) -> Self {
        self.event_options = event_options;
        self
    }

    /// Get the backoff strategy.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Get the base delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Get the maximum delay cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Get the jitter strategy.
    pub fn jitter(&self) -> JitterStrategy {
        self.jitter
    }

    /// Get the event batching options.
    pub fn event_options(&self) -> EventOptions {
        self.event_options
    }

    /// Delay after failed attempt `attempt` (1-indexed), capped, before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay(self.delay, attempt);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Check the options for inconsistencies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(max) = self.max_delay {
            if max < self.delay {
                return Err(ConfigError::new(format!(
                    "max_delay {:?} is smaller than the base delay {:?}",
                    max, self.delay
                )));
            }
        }
        if self.event_options.buffered && self.event_options.buffer_size == 0 {
            return Err(ConfigError::new(
                "buffer_size must be greater than 0 when events are buffered",
            ));
        }
        Ok(())
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("backoff", &self.backoff)
            .field("delay", &self.delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("handle", &self.handle.is_some())
            .field("should_retry", &self.should_retry.is_some())
            .field("events", &self.events)
            .field("event_options", &self.event_options)
            .finish()
    }
}
