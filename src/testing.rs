//! Testing utilities for code that runs under policies.
//!
//! Pair these macros with [`MockClock`](crate::MockClock), which makes every
//! backoff, timeout and hedge delay complete instantly while still recording
//! what was requested.
//!
//! # Examples
//!
//! ```rust
//! use breakwater::prelude::*;
//! use breakwater::{assert_policy_err, assert_policy_ok};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = TimeoutPolicy::new(Duration::from_secs(1));
//!
//! let ok = policy.execute(|| async { Ok::<_, PolicyError>(7) }).await;
//! assert_eq!(assert_policy_ok!(ok), 7);
//!
//! let err = policy.execute(|| async { Err::<i32, _>(PolicyError::from("no")) }).await;
//! assert_policy_err!(err, PolicyError::Operation(_));
//! # });
//! ```

/// Assert that a policy result is `Ok` and evaluate to the value.
///
/// # Example
///
/// ```rust
/// use breakwater::{assert_policy_ok, PolicyResult};
///
/// let result: PolicyResult<u8> = Ok(3);
/// let value = assert_policy_ok!(result);
/// assert_eq!(value, 3);
/// ```
#[macro_export]
macro_rules! assert_policy_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                panic!("Expected Ok, got Err: {}", error);
            }
        }
    };
}

/// Assert that a policy result is an error, optionally matching a pattern.
///
/// # Example
///
/// ```rust
/// use breakwater::{assert_policy_err, PolicyError, PolicyResult};
///
/// let result: PolicyResult<u8> = Err(PolicyError::from("boom"));
/// assert_policy_err!(result, PolicyError::Operation(_));
/// ```
#[macro_export]
macro_rules! assert_policy_err {
    ($result:expr) => {
        match $result {
            Err(error) => error,
            Ok(value) => {
                panic!("Expected Err, got Ok: {:?}", value);
            }
        }
    };
    ($result:expr, $pattern:pat) => {
        match $result {
            Err(error) => {
                if !matches!(error, $pattern) {
                    panic!(
                        "Expected Err matching {}, got Err: {:?}",
                        stringify!($pattern),
                        error
                    );
                }
                error
            }
            Ok(value) => {
                panic!(
                    "Expected Err matching {}, got Ok: {:?}",
                    stringify!($pattern),
                    value
                );
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::error::{PolicyError, PolicyResult, TimeoutError};
    use std::time::Duration;

    #[test]
    fn assert_policy_ok_returns_value() {
        let result: PolicyResult<&str> = Ok("value");
        assert_eq!(assert_policy_ok!(result), "value");
    }

    #[test]
    fn assert_policy_err_returns_error() {
        let result: PolicyResult<()> = Err(PolicyError::from("boom"));
        let error = assert_policy_err!(result);
        assert!(error.is_operation());
    }

    #[test]
    fn assert_policy_err_matches_pattern() {
        let result: PolicyResult<()> = Err(PolicyError::Timeout(TimeoutError::new(
            Duration::from_millis(5),
            Duration::from_millis(6),
        )));
        let error = assert_policy_err!(result, PolicyError::Timeout(TimeoutError { .. }));
        assert!(error.is_timeout());
    }

    #[test]
    #[should_panic(expected = "Expected Ok, got Err")]
    fn assert_policy_ok_panics_on_err() {
        let result: PolicyResult<()> = Err(PolicyError::from("boom"));
        assert_policy_ok!(result);
    }

    #[test]
    #[should_panic(expected = "Expected Err, got Ok")]
    fn assert_policy_err_panics_on_ok() {
        let result: PolicyResult<u8> = Ok(1);
        assert_policy_err!(result);
    }

    #[test]
    #[should_panic(expected = "Expected Err matching")]
    fn assert_policy_err_panics_on_wrong_variant() {
        let result: PolicyResult<u8> = Err(PolicyError::from("boom"));
        assert_policy_err!(result, PolicyError::CircuitOpen(_));
    }
}
