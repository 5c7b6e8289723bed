//! Circuit breaker.
//!
//! After `threshold` consecutive failures the circuit opens and calls fail
//! fast with [`PolicyError::CircuitOpen`] without running the operation. Once
//! `duration` has passed the circuit turns half-open and lets exactly one
//! probe through: success closes the circuit, failure opens it again.
//!
//! # Examples
//!
//! ```rust
//! use breakwater::prelude::*;
//! use breakwater::MockClock;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let clock = MockClock::new();
//! let breaker = CircuitBreakerPolicy::new(CircuitBreakerOptions::new(2, Duration::from_secs(10)))
//!     .with_clock(clock.clone());
//!
//! for _ in 0..2 {
//!     let _ = breaker.execute(|| async { Err::<(), _>(PolicyError::from("down")) }).await;
//! }
//! assert_eq!(breaker.state(), CircuitState::Open);
//!
//! let rejected = breaker.execute(|| async { Ok::<_, PolicyError>(()) }).await;
//! assert!(rejected.unwrap_err().is_circuit_open());
//!
//! clock.advance(Duration::from_secs(10));
//! assert!(breaker.execute(|| async { Ok::<_, PolicyError>(()) }).await.is_ok());
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # });
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::clock::{default_clock, Clock, SharedClock};
use crate::context::{ContextTracker, PolicyContext};
use crate::error::{CircuitOpen, ConfigError, PolicyError, PolicyResult};
use crate::policy::{Operation, Policy};
use crate::sync::lock;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CircuitState {
    /// Circuit is closed, allowing requests.
    Closed,
    /// Circuit is open, rejecting requests.
    Open,
    /// Circuit is half-open, allowing a single probe.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,
    /// Time the circuit stays open before a probe is allowed.
    pub duration: Duration,
}

impl CircuitBreakerOptions {
    /// Options with the given threshold and open duration.
    pub fn new(threshold: u32, duration: Duration) -> Self {
        Self {
            threshold,
            duration,
        }
    }

    /// Check the options for inconsistencies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::new("threshold must be greater than 0"));
        }
        if self.duration.is_zero() {
            return Err(ConfigError::new("duration must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

/// Snapshot of circuit breaker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CircuitBreakerMetrics {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures recorded.
    pub failure_count: u32,
    /// Calls that reached the breaker, rejected ones included.
    pub total_calls: u64,
    /// Calls refused without running the operation.
    pub rejected_calls: u64,
    /// Times the circuit transitioned to open.
    pub times_opened: u64,
}

/// Callback for a specific transition.
pub type StateCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback receiving `(from, to)` for every transition.
pub type StateChangeCallback = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<SystemTime>,
    probe_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
    times_opened: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            opened_at_wall: None,
            probe_in_flight: false,
            total_calls: 0,
            rejected_calls: 0,
            times_opened: 0,
        }
    }
}

#[derive(Default, Clone)]
struct Listeners {
    on_open: Vec<StateCallback>,
    on_close: Vec<StateCallback>,
    on_half_open: Vec<StateCallback>,
    on_change: Vec<StateChangeCallback>,
}

type Transition = (CircuitState, CircuitState);

enum Admission {
    Normal,
    Probe,
}

/// Fails fast while a dependency is known to be unhealthy.
pub struct CircuitBreakerPolicy {
    name: String,
    options: CircuitBreakerOptions,
    clock: SharedClock,
    state: Mutex<BreakerState>,
    listeners: Mutex<Listeners>,
    context: ContextTracker,
}

impl CircuitBreakerPolicy {
    /// Create a closed circuit breaker.
    ///
    /// A `threshold` of 0 is treated as 1. Use
    /// [`CircuitBreakerOptions::validate`] to reject such options instead.
    pub fn new(options: CircuitBreakerOptions) -> Self {
        Self {
            name: "circuit-breaker".to_string(),
            options: CircuitBreakerOptions {
                threshold: options.threshold.max(1),
                ..options
            },
            clock: default_clock(),
            state: Mutex::new(BreakerState::new()),
            listeners: Mutex::new(Listeners::default()),
            context: ContextTracker::default(),
        }
    }

    /// Use `clock` to measure the open duration.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Name used in errors and logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The configuration.
    pub fn options(&self) -> &CircuitBreakerOptions {
        &self.options
    }

    /// Subscribe to transitions into [`CircuitState::Open`].
    pub fn on_open<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.listeners).on_open.push(Arc::new(callback));
    }

    /// Subscribe to transitions into [`CircuitState::Closed`].
    pub fn on_close<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.listeners).on_close.push(Arc::new(callback));
    }

    /// Subscribe to transitions into [`CircuitState::HalfOpen`].
    pub fn on_half_open<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.listeners).on_half_open.push(Arc::new(callback));
    }

    /// Subscribe to every transition.
    pub fn on_circuit_state_change<F>(&self, callback: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        lock(&self.listeners).on_change.push(Arc::new(callback));
    }

    /// Current state.
    ///
    /// An open circuit whose duration has elapsed reports (and becomes)
    /// half-open.
    pub fn state(&self) -> CircuitState {
        let (state, transitions) = {
            let mut inner = lock(&self.state);
            let transitions = self.refresh(&mut inner);
            (inner.state, transitions)
        };
        self.notify(&transitions);
        state
    }

    /// Consecutive failures recorded.
    pub fn failure_count(&self) -> u32 {
        lock(&self.state).failure_count
    }

    /// Snapshot of the breaker counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state();
        let inner = lock(&self.state);
        CircuitBreakerMetrics {
            state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            times_opened: inner.times_opened,
        }
    }

    /// Force the circuit closed and clear the failure count.
    pub fn reset(&self) {
        let transitions = {
            let mut inner = lock(&self.state);
            inner.failure_count = 0;
            inner.probe_in_flight = false;
            let mut transitions = Vec::new();
            Self::transition(&mut inner, CircuitState::Closed, &mut transitions);
            transitions
        };
        #[cfg(feature = "tracing")]
        tracing::info!(policy = %self.name, "circuit breaker manually reset");
        self.notify(&transitions);
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

    fn transition(inner: &mut BreakerState, to: CircuitState, transitions: &mut Vec<Transition>) {
        let from = inner.state;
        if from != to {
            inner.state = to;
            transitions.push((from, to));
        }
    }

    fn open(&self, inner: &mut BreakerState, transitions: &mut Vec<Transition>) {
        inner.opened_at = Some(self.clock.now());
        inner.opened_at_wall = Some(self.clock.system_time());
        inner.probe_in_flight = false;
        inner.times_opened += 1;
        Self::transition(inner, CircuitState::Open, transitions);
    }

    /// Move an expired open circuit to half-open.
    fn refresh(&self, inner: &mut BreakerState) -> Vec<Transition> {
        let mut transitions = Vec::new();
        if inner.state == CircuitState::Open && self.remaining(inner).is_zero() {
            Self::transition(inner, CircuitState::HalfOpen, &mut transitions);
        }
        transitions
    }

    fn remaining(&self, inner: &BreakerState) -> Duration {
        match inner.opened_at {
            Some(opened_at) => {
                let elapsed = self.clock.now().saturating_duration_since(opened_at);
                self.options.duration.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    fn admit(&self) -> (Result<Admission, PolicyError>, Vec<Transition>) {
        let mut inner = lock(&self.state);
        inner.total_calls += 1;
        let transitions = self.refresh(&mut inner);

        let admission = match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Ok(Admission::Probe)
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.rejected_calls += 1;
                Err(PolicyError::CircuitOpen(CircuitOpen {
                    policy: self.name.clone(),
                    opened_at: inner.opened_at_wall.unwrap_or_else(|| self.clock.system_time()),
                    failure_count: inner.failure_count,
                    retry_after: self.remaining(&inner),
                }))
            }
        };
        (admission, transitions)
    }

    fn record(&self, success: bool, admission: &Admission) -> Vec<Transition> {
        let mut inner = lock(&self.state);
        let mut transitions = Vec::new();
        match (inner.state, admission, success) {
            (CircuitState::Closed, Admission::Normal, true) => inner.failure_count = 0,
            (CircuitState::Closed, Admission::Normal, false) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                if inner.failure_count >= self.options.threshold {
                    self.open(&mut inner, &mut transitions);
                }
            }
            (CircuitState::HalfOpen, Admission::Probe, true) => {
                inner.failure_count = 0;
                inner.probe_in_flight = false;
                inner.opened_at = None;
                inner.opened_at_wall = None;
                Self::transition(&mut inner, CircuitState::Closed, &mut transitions);
            }
            (CircuitState::HalfOpen, Admission::Probe, false) => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                self.open(&mut inner, &mut transitions);
            }
            // Results of calls admitted under an earlier state are ignored.
            _ => {}
        }
        transitions
    }

    fn release_probe(&self) {
        lock(&self.state).probe_in_flight = false;
    }

    fn notify(&self, transitions: &[Transition]) {
        if transitions.is_empty() {
            return;
        }
        let listeners = lock(&self.listeners).clone();
        for &(from, to) in transitions {
            #[cfg(feature = "tracing")]
            match to {
                CircuitState::Open => {
                    tracing::warn!(policy = %self.name, %from, "circuit opened")
                }
                _ => tracing::info!(policy = %self.name, %from, %to, "circuit state changed"),
            }
            let specific = match to {
                CircuitState::Open => &listeners.on_open,
                CircuitState::Closed => &listeners.on_close,
                CircuitState::HalfOpen => &listeners.on_half_open,
            };
            for callback in specific {
                callback();
            }
            for callback in &listeners.on_change {
                callback(from, to);
            }
        }
    }

    async fn run<'a, T>(&'a self, operation: Operation<'a, T>) -> PolicyResult<T> {
        let (admission, transitions) = self.admit();
        self.notify(&transitions);

        let admission = match admission {
            Ok(admission) => admission,
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(policy = %self.name, "circuit open, rejecting call");
                self.context.record::<T>(&Err(error.clone()), self.clock.system_time());
                return Err(error);
            }
        };

        let mut probe = ProbeGuard {
            breaker: self,
            armed: matches!(admission, Admission::Probe),
        };
        let result = operation().await;
        probe.armed = false;

        let transitions = self.record(result.is_ok(), &admission);
        self.notify(&transitions);
        self.context.record(&result, self.clock.system_time());
        result
    }
}

/// Frees the half-open probe slot if the probe is dropped before it settles.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreakerPolicy,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}

impl<T: Send + 'static> Policy<T> for CircuitBreakerPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_operation<'a>(&'a self, operation: Operation<'a, T>) -> BoxFuture<'a, PolicyResult<T>> {
        self.run(operation).boxed()
    }
}

impl fmt::Debug for CircuitBreakerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.state);
        f.debug_struct("CircuitBreakerPolicy")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::policy::PolicyExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, clock: &MockClock) -> CircuitBreakerPolicy {
        CircuitBreakerPolicy::new(CircuitBreakerOptions::new(threshold, Duration::from_secs(5)))
            .with_clock(clock.clone())
    }

    async fn fail(breaker: &CircuitBreakerPolicy) -> PolicyResult<()> {
        breaker.execute(|| async { Err(PolicyError::from("down")) }).await
    }

    async fn succeed(breaker: &CircuitBreakerPolicy) -> PolicyResult<()> {
        breaker.execute(|| async { Ok::<_, PolicyError>(()) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_consecutive_failures() {
        let clock = MockClock::new();
        let breaker = breaker(3, &clock);

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let clock = MockClock::new();
        let breaker = breaker(2, &clock);

        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_running() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock);
        fail(&breaker).await.unwrap_err();
        clock.advance(Duration::from_secs(2));

        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, PolicyError>(()) }
            })
            .await;

        match result {
            Err(PolicyError::CircuitOpen(open)) => {
                assert_eq!(open.policy, "circuit-breaker");
                assert_eq!(open.failure_count, 1);
                assert_eq!(open.retry_after, Duration::from_secs(3));
                assert_eq!(open.opened_at, SystemTime::UNIX_EPOCH);
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock);
        fail(&breaker).await.unwrap_err();

        clock.advance(Duration::from_secs(5));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens_with_fresh_timer() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock);
        fail(&breaker).await.unwrap_err();

        clock.advance(Duration::from_secs(5));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(4));
        assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());

        clock.advance(Duration::from_secs(1));
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test]
    async fn test_single_trial_call_in_half_open() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock);
        fail(&breaker).await.unwrap_err();
        clock.advance(Duration::from_secs(5));

        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let gate = gate.shared();
        let trial = breaker.execute(move || {
            let gate = gate.clone();
            async move {
                let _ = gate.await;
                Ok::<_, PolicyError>("trial")
            }
        });
        futures::pin_mut!(trial);

        // start the trial call so it holds the slot
        assert!(futures::poll!(trial.as_mut()).is_pending());
        assert!(succeed(&breaker).await.unwrap_err().is_circuit_open());

        release.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), "trial");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_call_releases_slot() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock);
        fail(&breaker).await.unwrap_err();
        clock.advance(Duration::from_secs(5));

        {
            let trial = breaker.execute(|| futures::future::pending::<PolicyResult<()>>());
            futures::pin_mut!(trial);
            assert!(futures::poll!(trial.as_mut()).is_pending());
        }

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_state_change_callbacks() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock);
        let log = Arc::new(Mutex::new(Vec::new()));

        for (label, register) in [("open", 0), ("close", 1), ("half-open", 2)] {
            let log = Arc::clone(&log);
            let callback = move || log.lock().unwrap().push(label.to_string());
            match register {
                0 => breaker.on_open(callback),
                1 => breaker.on_close(callback),
                _ => breaker.on_half_open(callback),
            }
        }
        let changes = Arc::clone(&log);
        breaker.on_circuit_state_change(move |from, to| {
            changes.lock().unwrap().push(format!("{} -> {}", from, to));
        });

        fail(&breaker).await.unwrap_err();
        clock.advance(Duration::from_secs(5));
        succeed(&breaker).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "open",
                "closed -> open",
                "half-open",
                "open -> half-open",
                "close",
                "half-open -> closed",
            ]
        );
    }

    #[tokio::test]
    async fn test_metrics_and_reset() {
        let clock = MockClock::new();
        let breaker = breaker(2, &clock);

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap_err();

        let metrics = breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.failure_count, 2);
        assert_eq!(metrics.total_calls, 4);
        assert_eq!(metrics.rejected_calls, 2);
        assert_eq!(metrics.times_opened, 1);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test]
    async fn test_panics_count_as_failures() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock);

        let result = breaker
            .execute(|| async {
                if true {
                    panic!("kaboom");
                }
                Ok::<(), PolicyError>(())
            })
            .await;

        assert!(result.unwrap_err().is_panic());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_context_includes_rejections() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock);
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap_err();

        let context = breaker.context();
        assert_eq!(context.execution_count, 2);
        assert_eq!(context.failure_count, 2);
        assert!(context.last_error.map(|e| e.is_circuit_open()).unwrap_or(false));
    }

    #[test]
    fn test_options_validate() {
        assert!(CircuitBreakerOptions::default().validate().is_ok());
        assert!(CircuitBreakerOptions::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(CircuitBreakerOptions::new(1, Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
    }

    #[tokio::test]
    async fn test_zero_threshold_opens_on_first_failure() {
        let clock = MockClock::new();
        let breaker = breaker(0, &clock);
        assert_eq!(breaker.options().threshold, 1);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[cfg(feature = "tracing")]
    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_transitions_are_logged() {
        let clock = MockClock::new();
        let breaker = breaker(1, &clock).with_name("inventory");

        fail(&breaker).await.unwrap_err();
        assert!(logs_contain("circuit opened"));
        assert!(logs_contain("inventory"));

        clock.advance(Duration::from_secs(5));
        succeed(&breaker).await.unwrap();
        assert!(logs_contain("circuit state changed"));
    }
}
