//! Short constructors for every policy.
//!
//! ```rust
//! use breakwater::policies;
//! use breakwater::prelude::*;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let pipeline = policies::compose(vec![
//!     std::sync::Arc::new(policies::retry(2, RetryOptions::new(Duration::from_millis(1)))) as SharedPolicy<u32>,
//!     std::sync::Arc::new(policies::timeout(Duration::from_secs(1))),
//! ])
//! .unwrap();
//!
//! assert_eq!(pipeline.execute(|| async { Ok::<_, PolicyError>(5) }).await.unwrap(), 5);
//! # });
//! ```

use std::time::Duration;

use crate::bulkhead::{BulkheadOptions, BulkheadPolicy};
use crate::circuit_breaker::{CircuitBreakerOptions, CircuitBreakerPolicy};
use crate::hedge::{HedgeOptions, HedgePolicy};
use crate::retry::{RetryOptions, RetryPolicy};
use crate::timeout::TimeoutPolicy;

pub use crate::policy::{compose, wrap};

/// A retry policy allowing `count` retries.
pub fn retry(count: u32, options: RetryOptions) -> RetryPolicy {
    RetryPolicy::new(count, options)
}

/// A circuit breaker.
pub fn circuit_breaker(options: CircuitBreakerOptions) -> CircuitBreakerPolicy {
    CircuitBreakerPolicy::new(options)
}

/// A timeout policy.
pub fn timeout(timeout: Duration) -> TimeoutPolicy {
    TimeoutPolicy::new(timeout)
}

/// A bulkhead.
pub fn bulkhead(options: BulkheadOptions) -> BulkheadPolicy {
    BulkheadPolicy::new(options)
}

/// A hedge policy.
pub fn hedge(options: HedgeOptions) -> HedgePolicy {
    HedgePolicy::new(options)
}
