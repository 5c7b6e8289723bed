//! Per-policy execution counters.
//!
//! Every policy instance owns a [`PolicyContext`] that is updated exactly once
//! per `execute()` call. The counters survive across calls and are cleared
//! only by an explicit reset.
//!
//! # Examples
//!
//! ```rust
//! use breakwater::prelude::*;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = TimeoutPolicy::new(Duration::from_secs(1));
//!
//! let _ = policy.execute(|| async { Ok::<_, PolicyError>(1) }).await;
//! let _ = policy.execute(|| async { Err::<i32, _>(PolicyError::from("nope")) }).await;
//!
//! let context = policy.context();
//! assert_eq!(context.execution_count, 2);
//! assert_eq!(context.success_count, 1);
//! assert_eq!(context.failure_count, 1);
//! assert!(context.last_error.is_some());
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::error::{PolicyError, PolicyResult};
use crate::sync::lock;

/// Snapshot of a policy's execution counters.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    /// Number of completed `execute()` calls.
    pub execution_count: u64,
    /// Calls that ended in an error.
    pub failure_count: u64,
    /// Calls that produced a value.
    pub success_count: u64,
    /// Error of the most recent failed call.
    pub last_error: Option<PolicyError>,
    /// When the most recent call completed.
    pub last_execution_time: Option<SystemTime>,
    /// Free-form annotations attached by the caller.
    pub metadata: HashMap<String, String>,
}

impl PolicyContext {
    /// Fraction of calls that failed, 0.0 when nothing ran yet.
    pub fn failure_rate(&self) -> f64 {
        if self.execution_count == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.execution_count as f64
    }
}

/// Interior-mutable holder shared by the policy implementations.
#[derive(Debug, Default)]
pub(crate) struct ContextTracker {
    inner: Mutex<PolicyContext>,
}

impl ContextTracker {
    pub(crate) fn record<T>(&self, result: &PolicyResult<T>, at: SystemTime) {
        let mut context = lock(&self.inner);
        context.execution_count += 1;
        context.last_execution_time = Some(at);
        match result {
            Ok(_) => context.success_count += 1,
            Err(error) => {
                context.failure_count += 1;
                context.last_error = Some(error.clone());
            }
        }
    }

    pub(crate) fn snapshot(&self) -> PolicyContext {
        lock(&self.inner).clone()
    }

    /// Clears counters and the last error. Metadata is kept.
    pub(crate) fn reset(&self) {
        let mut context = lock(&self.inner);
        let metadata = std::mem::take(&mut context.metadata);
        *context = PolicyContext {
            metadata,
            ..PolicyContext::default()
        };
    }

    pub(crate) fn set_metadata(&self, key: String, value: String) {
        lock(&self.inner).metadata.insert(key, value);
    }
}
