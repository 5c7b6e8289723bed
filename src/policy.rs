//! The execution contract shared by every policy, and the combinators that
//! nest policies into pipelines.
//!
//! A policy receives an [`Operation`], a shareable factory of futures, and
//! returns the operation's outcome as a [`PolicyResult`]. Because every layer
//! speaks the same `Result<T, PolicyError>`, an outer layer sees exactly what
//! the inner layer produced: there is nothing to unwrap and nothing is wrapped
//! twice.
//!
//! # Composition
//!
//! ```rust
//! use breakwater::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let pipeline = compose(vec![
//!     Arc::new(RetryPolicy::new(2, RetryOptions::new(Duration::from_millis(10))))
//!         as SharedPolicy<u32>,
//!     Arc::new(TimeoutPolicy::new(Duration::from_secs(1))),
//! ])
//! .expect("at least one policy");
//!
//! let value = pipeline.execute(|| async { Ok::<_, PolicyError>(7) }).await;
//! assert_eq!(value.unwrap(), 7);
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{ComposeError, PolicyError, PolicyResult};

/// A shareable factory producing one attempt of the protected work per call.
///
/// Retry calls it once per attempt, hedge calls it once per launched attempt,
/// and a wrapping layer hands the next layer's `execute` to its outer layer
/// as an `Operation`.
pub type Operation<'a, T> = Arc<dyn Fn() -> BoxFuture<'a, PolicyResult<T>> + Send + Sync + 'a>;

/// Type-erased, shareable policy.
pub type SharedPolicy<T> = Arc<dyn Policy<T>>;

/// A fault-tolerance policy.
///
/// Implementations must never panic; every failure is reported through the
/// returned [`PolicyResult`].
pub trait Policy<T: Send + 'static>: Send + Sync {
    /// Human readable name used in errors, events and logs.
    fn name(&self) -> &str;

    /// Run `operation` under this policy.
    fn execute_operation<'a>(&'a self, operation: Operation<'a, T>)
        -> BoxFuture<'a, PolicyResult<T>>;
}

impl<T, P> Policy<T> for Arc<P>
where
    T: Send + 'static,
    P: Policy<T> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute_operation<'a>(
        &'a self,
        operation: Operation<'a, T>,
    ) -> BoxFuture<'a, PolicyResult<T>> {
        (**self).execute_operation(operation)
    }
}

/// Closure-friendly entry point for every [`Policy`].
pub trait PolicyExt<T: Send + 'static>: Policy<T> {
    /// Run an async closure under this policy.
    ///
    /// The closure may fail with any error convertible into [`PolicyError`].
    /// A panic inside the closure, or inside the future it returns, is caught
    /// and reported as [`PolicyError::Panicked`].
    ///
    /// ```rust
    /// use breakwater::prelude::*;
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let policy = TimeoutPolicy::new(Duration::from_secs(1));
    /// let result: PolicyResult<u8> = policy
    ///     .execute(|| async { Err::<u8, _>(std::io::Error::other("disk")) })
    ///     .await;
    /// assert!(result.unwrap_err().is_operation());
    /// # });
    /// ```
    fn execute<'a, F, Fut, E>(&'a self, operation: F) -> BoxFuture<'a, PolicyResult<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
        E: Into<PolicyError> + 'a,
    {
        self.execute_operation(operation_from(operation))
    }

    /// Nest `inner` inside this policy.
    fn wrap<I>(self, inner: I) -> Wrap<Self, I>
    where
        Self: Sized,
        I: Policy<T>,
    {
        wrap(self, inner)
    }
}

impl<T: Send + 'static, P: Policy<T> + ?Sized> PolicyExt<T> for P {}

/// Adapt an async closure into an [`Operation`].
///
/// This is the innermost layer of every pipeline: it converts the closure's
/// error into a [`PolicyError`] and turns panics into
/// [`PolicyError::Panicked`].
pub fn operation_from<'a, T, F, Fut, E>(operation: F) -> Operation<'a, T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'a,
    Fut: Future<Output = Result<T, E>> + Send + 'a,
    E: Into<PolicyError> + 'a,
{
    Arc::new(move || {
        let started = std::panic::catch_unwind(AssertUnwindSafe(&operation));
        match started {
            Ok(future) => AssertUnwindSafe(future)
                .catch_unwind()
                .map(|outcome| match outcome {
                    Ok(result) => result.map_err(Into::into),
                    Err(payload) => Err(PolicyError::panicked(payload)),
                })
                .boxed(),
            Err(payload) => futures::future::ready(Err(PolicyError::panicked(payload))).boxed(),
        }
    })
}

/// Two policies nested so that `outer` governs calls into `inner`.
///
/// Built by [`wrap`] or [`PolicyExt::wrap`].
pub struct Wrap<O, I> {
    outer: O,
    inner: I,
}

impl<O, I> Wrap<O, I> {
    /// The outer policy.
    pub fn outer(&self) -> &O {
        &self.outer
    }

    /// The inner policy.
    pub fn inner(&self) -> &I {
        &self.inner
    }
}

impl<O: fmt::Debug, I: fmt::Debug> fmt::Debug for Wrap<O, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrap")
            .field("outer", &self.outer)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T, O, I> Policy<T> for Wrap<O, I>
where
    T: Send + 'static,
    O: Policy<T>,
    I: Policy<T>,
{
    fn name(&self) -> &str {
        self.outer.name()
    }

    fn execute_operation<'a>(
        &'a self,
        operation: Operation<'a, T>,
    ) -> BoxFuture<'a, PolicyResult<T>> {
        self.outer.execute_operation(through(&self.inner, operation))
    }
}

/// An operation that runs `operation` under `policy`.
fn through<'a, T, P>(policy: &'a P, operation: Operation<'a, T>) -> Operation<'a, T>
where
    T: Send + 'static,
    P: Policy<T> + ?Sized,
{
    Arc::new(move || policy.execute_operation(Arc::clone(&operation)))
}

/// Nest `inner` inside `outer`: `outer.execute(|| inner.execute(operation))`.
///
/// ```rust
/// use breakwater::prelude::*;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = wrap(
///     RetryPolicy::new(1, RetryOptions::new(Duration::from_millis(1))),
///     TimeoutPolicy::new(Duration::from_secs(1)),
/// );
/// let result = policy.execute(|| async { Ok::<_, PolicyError>("ok") }).await;
/// assert_eq!(result.unwrap(), "ok");
/// # });
/// ```
pub fn wrap<O, I>(outer: O, inner: I) -> Wrap<O, I> {
    Wrap { outer, inner }
}

/// A non-empty, ordered stack of type-erased policies.
///
/// The first policy is the outermost layer.
pub struct Pipeline<T: Send + 'static> {
    outermost: SharedPolicy<T>,
    inner: Vec<SharedPolicy<T>>,
}

impl<T: Send + 'static> Pipeline<T> {
    /// Number of layers.
    pub fn len(&self) -> usize {
        self.inner.len() + 1
    }

    /// Always false: a pipeline holds at least one policy.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Layer names from outermost to innermost.
    pub fn names(&self) -> Vec<&str> {
        std::iter::once(&self.outermost)
            .chain(self.inner.iter())
            .map(|policy| policy.name())
            .collect()
    }
}

impl<T: Send + 'static> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.names())
            .finish()
    }
}

impl<T: Send + 'static> Policy<T> for Pipeline<T> {
    fn name(&self) -> &str {
        self.outermost.name()
    }

    fn execute_operation<'a>(
        &'a self,
        operation: Operation<'a, T>,
    ) -> BoxFuture<'a, PolicyResult<T>> {
        let innermost_first = self.inner.iter().rev();
        let operation = innermost_first.fold(operation, |next, layer| through(layer.as_ref(), next));
        self.outermost.execute_operation(operation)
    }
}

/// Build a pipeline where `policies[0]` is outermost and each later policy
/// nests one level deeper.
///
/// An empty list is rejected here rather than at execution time. A single
/// policy yields a pipeline that behaves exactly like that policy.
///
/// ```rust
/// use breakwater::{compose, ComposeError, SharedPolicy};
///
/// let empty: Vec<SharedPolicy<()>> = Vec::new();
/// assert_eq!(compose(empty).unwrap_err(), ComposeError::Empty);
/// ```
pub fn compose<T: Send + 'static>(
    policies: Vec<SharedPolicy<T>>,
) -> Result<Pipeline<T>, ComposeError> {
    let mut policies = policies.into_iter();
    let outermost = policies.next().ok_or(ComposeError::Empty)?;
    Ok(Pipeline {
        outermost,
        inner: policies.collect(),
    })
}

/// Statically nest policies, first argument outermost.
///
/// `compose!(a, b, c)` expands to `wrap(a, wrap(b, c))`. Calling it with no
/// arguments is a compile error.
///
/// ```rust
/// use breakwater::prelude::*;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let policy = breakwater::compose!(
///     RetryPolicy::new(1, RetryOptions::new(Duration::from_millis(1))),
///     CircuitBreakerPolicy::new(CircuitBreakerOptions::new(5, Duration::from_secs(30))),
///     TimeoutPolicy::new(Duration::from_secs(1)),
/// );
/// let result = policy.execute(|| async { Ok::<_, PolicyError>(1) }).await;
/// assert_eq!(result.unwrap(), 1);
/// # });
/// ```
#[macro_export]
macro_rules! compose {
    () => {
        compile_error!("compose! requires at least one policy")
    };
    ($policy:expr $(,)?) => {
        $policy
    };
    ($outer:expr, $($rest:expr),+ $(,)?) => {
        $crate::wrap($outer, $crate::compose!($($rest),+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records when it is entered and left, passing results through.
    struct Tracer {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl<T: Send + 'static> Policy<T> for Tracer {
        fn name(&self) -> &str {
            self.name
        }

        fn execute_operation<'a>(
            &'a self,
            operation: Operation<'a, T>,
        ) -> BoxFuture<'a, PolicyResult<T>> {
            async move {
                self.log.lock().unwrap().push(format!("enter {}", self.name));
                let result = operation().await;
                self.log.lock().unwrap().push(format!("leave {}", self.name));
                result
            }
            .boxed()
        }
    }

    fn tracer(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Tracer {
        Tracer {
            name,
            log: Arc::clone(log),
        }
    }

    #[tokio::test]
    async fn test_wrap_runs_outer_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let policy = wrap(tracer("outer", &log), tracer("inner", &log));

        let result = policy.execute(|| async { Ok::<_, PolicyError>(5) }).await;

        assert_eq!(result.unwrap(), 5);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["enter outer", "enter inner", "leave inner", "leave outer"]
        );
    }

    #[tokio::test]
    async fn test_compose_first_policy_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = compose::<i32>(vec![
            Arc::new(tracer("a", &log)),
            Arc::new(tracer("b", &log)),
            Arc::new(tracer("c", &log)),
        ])
        .unwrap();

        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.names(), vec!["a", "b", "c"]);

        pipeline
            .execute(|| async { Ok::<_, PolicyError>(1) })
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["enter a", "enter b", "enter c", "leave c", "leave b", "leave a"]
        );
    }

    #[test]
    fn test_compose_empty_fails_fast() {
        let result = compose::<()>(Vec::new());
        assert_eq!(result.unwrap_err(), ComposeError::Empty);
    }

    #[tokio::test]
    async fn test_compose_single_is_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = compose::<&str>(vec![Arc::new(tracer("only", &log))]).unwrap();

        let result = pipeline.execute(|| async { Err::<&str, _>("bad") }).await;

        assert_eq!(result.unwrap_err().to_string(), "operation failed: bad");
        assert_eq!(*log.lock().unwrap(), vec!["enter only", "leave only"]);
        assert_eq!(pipeline.name(), "only");
    }

    #[tokio::test]
    async fn test_compose_macro_matches_wrap() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let policy = compose!(tracer("x", &log), tracer("y", &log));

        policy
            .execute(|| async { Ok::<_, PolicyError>(()) })
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["enter x", "enter y", "leave y", "leave x"]
        );
    }

    #[tokio::test]
    async fn test_panic_in_future_becomes_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let policy = tracer("guard", &log);

        let result: PolicyResult<u8> = policy
            .execute(|| async {
                if true {
                    panic!("exploded");
                }
                Ok::<_, PolicyError>(1)
            })
            .await;

        let error = result.unwrap_err();
        assert!(error.is_panic());
        assert!(error.to_string().contains("exploded"));
    }

    #[tokio::test]
    async fn test_panic_before_future_becomes_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let policy = tracer("guard", &log);
        let calls = AtomicU32::new(0);

        let result: PolicyResult<u8> = policy
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                if calls.load(Ordering::SeqCst) > 0 {
                    panic!("eager");
                }
                async { Ok::<_, PolicyError>(1) }
            })
            .await;

        assert!(result.unwrap_err().is_panic());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operation_can_borrow_environment() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let policy = tracer("borrow", &log);
        let owned = String::from("hello");
        let greeting = &owned;

        let result = policy
            .execute(move || async move { Ok::<_, PolicyError>(greeting.len()) })
            .await;

        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_shared_policy_through_arc() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared: SharedPolicy<u8> = Arc::new(tracer("arc", &log));

        let result = shared.execute(|| async { Ok::<_, PolicyError>(9) }).await;

        assert_eq!(result.unwrap(), 9);
        assert_eq!(shared.name(), "arc");
    }
}
