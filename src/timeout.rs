//! Per-call deadline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, Either};
use futures::FutureExt;

use crate::clock::{default_clock, Clock, SharedClock};
use crate::context::{ContextTracker, PolicyContext};
use crate::error::{PolicyError, PolicyResult, TimeoutError};
use crate::policy::{Operation, Policy};

/// Fails an operation that does not settle within `timeout`.
///
/// The operation future is dropped when the deadline fires, so nothing it
/// would have done after that point happens.
///
/// # Examples
///
/// ```rust
/// use breakwater::prelude::*;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = TimeoutPolicy::new(Duration::from_millis(10));
///
/// let result = policy
///     .execute(|| async {
///         tokio::time::sleep(Duration::from_secs(5)).await;
///         Ok::<_, PolicyError>("late")
///     })
///     .await;
///
/// match result {
///     Err(PolicyError::Timeout(error)) => assert_eq!(error.timeout, Duration::from_millis(10)),
///     other => panic!("unexpected {:?}", other),
/// }
/// # });
/// ```
pub struct TimeoutPolicy {
    name: String,
    timeout: Duration,
    clock: SharedClock,
    context: ContextTracker,
}

impl TimeoutPolicy {
    /// Create a timeout policy.
    pub fn new(timeout: Duration) -> Self {
        Self {
            name: "timeout".to_string(),
            timeout,
            clock: default_clock(),
            context: ContextTracker::default(),
        }
    }

    /// Use `clock` for the deadline.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
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

    async fn run<'a, T>(&'a self, operation: Operation<'a, T>) -> PolicyResult<T> {
        let start = self.clock.now();
        let deadline = self.clock.sleep(self.timeout);

        let result = match future::select(operation(), deadline).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => {
                let elapsed = self.clock.now().saturating_duration_since(start);
                #[cfg(feature = "tracing")]
                tracing::debug!(policy = %self.name, timeout = ?self.timeout, "operation timed out");
                Err(PolicyError::Timeout(TimeoutError::new(self.timeout, elapsed)))
            }
        };

        self.context.record(&result, self.clock.system_time());
        result
    }
}

impl<T: Send + 'static> Policy<T> for TimeoutPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_operation<'a>(&'a self, operation: Operation<'a, T>) -> BoxFuture<'a, PolicyResult<T>> {
        self.run(operation).boxed()
    }
}

impl fmt::Debug for TimeoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
