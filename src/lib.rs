//! # Breakwater
//!
//! > *"A breakwater doesn't stop the sea, it decides how much of it reaches the harbour"*
//!
//! Composable fault-tolerance policies for async Rust.
//!
//! ## Philosophy
//!
//! Every policy has the same shape: it takes an operation and returns the
//! operation's `Result`. Failures are values, never panics, so policies nest
//! freely and an outer layer sees exactly what an inner layer produced.
//!
//! - **Retry**: re-run failures with constant, linear, exponential or Fibonacci backoff
//! - **Circuit breaker**: fail fast while a dependency is unhealthy
//! - **Timeout**: bound how long a single call may take
//! - **Bulkhead**: cap concurrency, queue the overflow, reject the rest
//! - **Hedge**: race a delayed second copy against a slow first one
//!
//! ## Quick Example
//!
//! ```rust
//! use breakwater::prelude::*;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = breakwater::compose!(
//!     RetryPolicy::new(3, RetryOptions::exponential(Duration::from_millis(1))),
//!     CircuitBreakerPolicy::new(CircuitBreakerOptions::new(5, Duration::from_secs(30))),
//!     TimeoutPolicy::new(Duration::from_secs(1)),
//! );
//!
//! let calls = AtomicU32::new(0);
//! let result = policy
//!     .execute(|| {
//!         let n = calls.fetch_add(1, Ordering::SeqCst);
//!         async move {
//!             if n == 0 {
//!                 Err(PolicyError::from("flaky"))
//!             } else {
//!                 Ok("response")
//!             }
//!         }
//!     })
//!     .await;
//!
//! assert_eq!(result.unwrap(), "response");
//! assert_eq!(calls.load(Ordering::SeqCst), 2);
//! # });
//! ```
//!
//! ## Features
//!
//! - `tracing` (default): log retries, circuit transitions and rejections
//! - `serde`: `Serialize`/`Deserialize` for options, metrics and enums

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod context;
pub mod error;
pub mod hedge;
pub mod jitter;
pub mod policies;
pub mod policy;
pub mod retry;
mod sync;
pub mod testing;
pub mod timeout;

// Re-exports
pub use bulkhead::{BulkheadMetrics, BulkheadOptions, BulkheadPolicy};
pub use circuit_breaker::{CircuitBreakerMetrics, CircuitBreakerOptions, CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, MockClock, SharedClock, TokioClock};
pub use context::PolicyContext;
pub use error::{
    BulkheadQueueTimeout, BulkheadRejected, CircuitOpen, ComposeError, ConfigError, HedgeFailed, PolicyError,
    PolicyResult, RetryExhausted, TimeoutError,
};
pub use hedge::{HedgeDelay, HedgeMetrics, HedgeOptions, HedgePolicy};
pub use jitter::{JitterCalculator, JitterStrategy};
pub use policy::{compose, operation_from, wrap, Operation, Pipeline, Policy, PolicyExt, SharedPolicy, Wrap};
pub use retry::{
    Backoff, EventOptions, RetryContext, RetryEvent, RetryEventHandlers, RetryEventKind, RetryOptions, RetryPolicy,
};
pub use timeout::TimeoutPolicy;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bulkhead::{BulkheadOptions, BulkheadPolicy};
    pub use crate::circuit_breaker::{CircuitBreakerOptions, CircuitBreakerPolicy, CircuitState};
    pub use crate::error::{PolicyError, PolicyResult};
    pub use crate::hedge::{HedgeDelay, HedgeOptions, HedgePolicy};
    pub use crate::jitter::JitterStrategy;
    pub use crate::policy::{compose, wrap, Policy, PolicyExt, SharedPolicy};
    pub use crate::retry::{Backoff, RetryOptions, RetryPolicy};
    pub use crate::timeout::TimeoutPolicy;
}
