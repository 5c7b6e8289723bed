//! Error types shared by every policy.
//!
//! Every layer of a pipeline speaks the same error type, [`PolicyError`], so an
//! outer policy can inspect what an inner one produced without any wrapping or
//! unwrapping at the boundary. Each variant carries a small, immutable detail
//! struct describing why the layer gave up.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Result type returned by every policy.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Error produced by a policy execution.
///
/// Errors are cheap to clone: operation errors are held behind an `Arc` and the
/// policy-specific variants only carry plain data. A clone never shares mutable
/// state with the original.
///
/// # Examples
///
/// ```rust
/// use breakwater::PolicyError;
///
/// let err = PolicyError::from("connection refused");
/// assert!(err.is_operation());
/// assert_eq!(err.to_string(), "operation failed: connection refused");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PolicyError {
    /// The wrapped operation returned an error.
    Operation(Arc<dyn StdError + Send + Sync + 'static>),
    /// The wrapped operation panicked.
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
    /// A retry policy ran out of attempts.
    RetryExhausted(RetryExhausted),
    /// A circuit breaker rejected the call.
    CircuitOpen(CircuitOpen),
    /// A timeout policy expired before the operation settled.
    Timeout(TimeoutError),
    /// A bulkhead rejected the call because both slots and queue were full.
    BulkheadRejected(BulkheadRejected),
    /// A bulkhead caller waited in the queue longer than allowed.
    BulkheadQueueTimeout(BulkheadQueueTimeout),
    /// Every hedged attempt failed.
    HedgeFailed(HedgeFailed),
}

impl PolicyError {
    /// Wrap an arbitrary error as an operation failure.
    pub fn operation<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Operation(Arc::new(error))
    }

    /// Build an operation failure from a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Operation(Arc::new(Message(message.into())))
    }

    pub(crate) fn panicked(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "operation panicked".to_string()
        };
        Self::Panicked { message }
    }

    /// Returns true if the wrapped operation itself failed.
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// Returns true if the operation panicked.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }

    /// Returns true if a retry policy gave up.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted(_))
    }

    /// Returns true if a circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Returns true if a timeout expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if a bulkhead refused or timed out the call.
    pub fn is_bulkhead(&self) -> bool {
        matches!(
            self,
            Self::BulkheadRejected(_) | Self::BulkheadQueueTimeout(_)
        )
    }

    /// Returns true if every hedged attempt failed.
    pub fn is_hedge_failed(&self) -> bool {
        matches!(self, Self::HedgeFailed(_))
    }

    /// Follow retry exhaustion down to the error of the last attempt.
    ///
    /// ```rust
    /// use breakwater::{PolicyError, RetryExhausted};
    /// use std::time::Duration;
    ///
    /// let inner = PolicyError::from("boom");
    /// let err = PolicyError::RetryExhausted(RetryExhausted::new(
    ///     "retry",
    ///     3,
    ///     inner,
    ///     Duration::from_millis(30),
    /// ));
    /// assert!(err.root_cause().is_operation());
    /// ```
    pub fn root_cause(&self) -> &PolicyError {
        let mut current = self;
        while let Self::RetryExhausted(exhausted) = current {
            current = exhausted.error();
        }
        current
    }
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(e) => write!(f, "operation failed: {}", e),
            Self::Panicked { message } => write!(f, "operation panicked: {}", message),
            Self::RetryExhausted(e) => write!(f, "{}", e),
            Self::CircuitOpen(e) => write!(f, "{}", e),
            Self::Timeout(e) => write!(f, "{}", e),
            Self::BulkheadRejected(e) => write!(f, "{}", e),
            Self::BulkheadQueueTimeout(e) => write!(f, "{}", e),
            Self::HedgeFailed(e) => write!(f, "{}", e),
        }
    }
}

impl StdError for PolicyError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Operation(e) => Some(e.as_ref() as &(dyn StdError + 'static)),
            Self::RetryExhausted(e) => Some(e.error()),
            Self::HedgeFailed(e) => e
                .errors
                .last()
                .map(|err| err as &(dyn StdError + 'static)),
            _ => None,
        }
    }
}

impl From<String> for PolicyError {
    fn from(message: String) -> Self {
        Self::message(message)
    }
}

impl From<&str> for PolicyError {
    fn from(message: &str) -> Self {
        Self::message(message)
    }
}

impl From<std::io::Error> for PolicyError {
    fn from(error: std::io::Error) -> Self {
        Self::operation(error)
    }
}

impl From<Box<dyn StdError + Send + Sync + 'static>> for PolicyError {
    fn from(error: Box<dyn StdError + Send + Sync + 'static>) -> Self {
        Self::Operation(Arc::from(error))
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

/// Error returned when all retry attempts are exhausted.
///
/// Contains the error of the final attempt along with metadata about the
/// retry sequence.
#[derive(Debug, Clone)]
pub struct RetryExhausted {
    /// Name of the retry policy that gave up.
    pub policy: String,
    /// Total number of attempts made (initial + retries).
    pub attempts: u32,
    /// The error from the final attempt.
    pub last_error: Box<PolicyError>,
    /// Total time spent retrying.
    pub total_duration: Duration,
}

impl RetryExhausted {
    /// Create a new RetryExhausted error.
    pub fn new(
        policy: impl Into<String>,
        attempts: u32,
        last_error: PolicyError,
        total_duration: Duration,
    ) -> Self {
        Self {
            policy: policy.into(),
            attempts,
            last_error: Box::new(last_error),
            total_duration,
        }
    }

    /// Get a reference to the final error.
    pub fn error(&self) -> &PolicyError {
        &self.last_error
    }

    /// Extract the final error, discarding metadata.
    pub fn into_error(self) -> PolicyError {
        *self.last_error
    }
}

impl fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retry policy '{}' exhausted after {} attempts ({:?}): {}",
            self.policy, self.attempts, self.total_duration, self.last_error
        )
    }
}

/// Details of a call rejected by an open circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Name of the circuit breaker.
    pub policy: String,
    /// Wall-clock time the circuit opened.
    pub opened_at: SystemTime,
    /// Consecutive failures recorded when the circuit opened.
    pub failure_count: u32,
    /// Time left before the circuit lets a probe through.
    pub retry_after: Duration,
}

impl fmt::Display for CircuitOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circuit '{}' is open after {} failures, retry after {:?}",
            self.policy, self.failure_count, self.retry_after
        )
    }
}

/// Error returned when an operation does not settle within its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError {
    /// The timeout that was exceeded.
    pub timeout: Duration,
    /// Time actually elapsed when the timeout fired.
    pub elapsed: Duration,
}

impl TimeoutError {
    /// Create a timeout error.
    pub fn new(timeout: Duration, elapsed: Duration) -> Self {
        Self { timeout, elapsed }
    }
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation timed out after {:?} (limit {:?})",
            self.elapsed, self.timeout
        )
    }
}

/// Snapshot of a bulkhead that refused a call outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadRejected {
    /// Executions running when the call was rejected.
    pub active: usize,
    /// Callers waiting when the call was rejected.
    pub queued: usize,
    /// Concurrency limit at the time.
    pub max_concurrent: usize,
    /// Queue limit at the time.
    pub max_queue: usize,
}

impl fmt::Display for BulkheadRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bulkhead full: {}/{} active, {}/{} queued",
            self.active, self.max_concurrent, self.queued, self.max_queue
        )
    }
}

/// Snapshot of a bulkhead whose queue wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadQueueTimeout {
    /// Time spent waiting in the queue.
    pub waited: Duration,
    /// Configured queue timeout.
    pub queue_timeout: Duration,
    /// Executions running when the wait expired.
    pub active: usize,
    /// Callers still waiting when the wait expired.
    pub queued: usize,
}

impl fmt::Display for BulkheadQueueTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timed out after {:?} waiting for a bulkhead slot (limit {:?}, {} active, {} queued)",
            self.waited, self.queue_timeout, self.active, self.queued
        )
    }
}

/// Every attempt launched by a hedge policy failed.
#[derive(Debug, Clone)]
pub struct HedgeFailed {
    /// Attempts launched, primary included.
    pub attempts: u32,
    /// Errors of every attempt, in the order they settled.
    pub errors: Vec<PolicyError>,
}

impl fmt::Display for HedgeFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} hedged attempts failed", self.attempts)?;
        if let Some(last) = self.errors.last() {
            write!(f, ", last error: {}", last)?;
        }
        Ok(())
    }
}

/// Error raised when a pipeline cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeError {
    /// `compose` was called without any policies.
    Empty,
}

impl fmt::Display for ComposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "compose requires at least one policy"),
        }
    }
}

impl StdError for ComposeError {}

/// Invalid policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// What is wrong with the configuration.
    pub message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.message)
    }
}

impl StdError for ConfigError {}
