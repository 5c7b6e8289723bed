//! Retry with configurable backoff, jitter and lifecycle events.
//!
//! A [`RetryPolicy`] is built from a retry count and immutable
//! [`RetryOptions`]:
//!
//! - **Backoff**: constant, linear, exponential or Fibonacci growth of a base delay
//! - **Cap**: an optional maximum delay applied before jitter
//! - **Jitter**: see [`JitterStrategy`](crate::JitterStrategy)
//! - **Filtering**: `handle` for a plain error predicate, `should_retry` for a
//!   decision over the full [`RetryContext`]
//!
//! # Quick Start
//!
//! ```rust
//! use breakwater::prelude::*;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new(
//!     2,
//!     RetryOptions::exponential(Duration::from_millis(1)).with_max_delay(Duration::from_millis(5)),
//! );
//!
//! let result = policy.execute(|| async { Ok::<_, PolicyError>(42) }).await;
//! assert_eq!(result.unwrap(), 42);
//! # });
//! ```
//!
//! # Events
//!
//! Every `execute()` emits a sequence of [`RetryEvent`]s to the handlers in
//! [`RetryEventHandlers`]. With [`EventOptions::buffered`] the events are
//! delivered in batches, and whatever is left is flushed when `execute()`
//! returns.

mod events;
mod options;
mod policy;

pub use events::{EventOptions, RetryEvent, RetryEventHandler, RetryEventHandlers, RetryEventKind};
pub use options::{Backoff, HandlePredicate, RetryContext, RetryOptions, ShouldRetry};
pub use policy::{OnRetry, RetryPolicy};
