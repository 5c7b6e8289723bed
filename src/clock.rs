//! Time source and sleep primitive used by every policy.
//!
//! Policies never call `tokio::time` directly; backoff sleeps, timeouts, queue
//! waits and hedge delays all go through a [`Clock`]. Production code uses
//! [`TokioClock`]. Tests either use [`MockClock`], whose sleeps complete
//! immediately while virtual time advances, or keep [`TokioClock`] and run
//! under `#[tokio::test(start_paused = true)]`.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::sync::lock;

/// Time operations needed by policies.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current wall-clock time, used to stamp events and errors.
    fn system_time(&self) -> SystemTime;

    /// Suspend for `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        (**self).sleep(duration)
    }
}

/// Real clock backed by the tokio timer.
///
/// `now()` reads tokio's clock, so paused test time (`start_paused = true`)
/// is observed consistently by both sleeps and elapsed-time measurements.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

pub(crate) fn default_clock() -> SharedClock {
    Arc::new(TokioClock)
}

/// Deterministic clock for tests.
///
/// Sleeping advances virtual time by the requested duration and completes
/// immediately. Every requested sleep is recorded so tests can assert on the
/// exact backoff schedule. Clones share the same timeline.
///
/// # Examples
///
/// ```rust
/// use breakwater::{Clock, MockClock};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let clock = MockClock::new();
/// let start = clock.now();
///
/// clock.sleep(Duration::from_millis(250)).await;
/// clock.advance(Duration::from_millis(50));
///
/// assert_eq!(clock.now() - start, Duration::from_millis(300));
/// assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl MockClock {
    /// Create a mock clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Move virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        lock(&self.state).elapsed += duration;
    }

    /// Virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        lock(&self.state).elapsed
    }

    /// Every duration passed to [`Clock::sleep`], in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.state).sleeps.clone()
    }

    /// Sum of all recorded sleeps.
    pub fn total_slept(&self) -> Duration {
        lock(&self.state).sleeps.iter().sum()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        {
            let mut state = lock(&self.state);
            state.elapsed += duration;
            state.sleeps.push(duration);
        }
        futures::future::ready(()).boxed()
    }
}
