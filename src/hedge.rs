//! Hedged requests.
//!
//! A hedge policy starts the operation, and if it has not succeeded after a
//! delay, starts another copy alongside it. The first success wins and the
//! remaining attempts are dropped. Once every launched attempt has failed the
//! policy gives up; hedging is not a retry. Only hedge idempotent operations:
//! every attempt may run to the point where it is dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{self, BoxFuture, Either};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;

use crate::clock::{default_clock, Clock, SharedClock};
use crate::context::{ContextTracker, PolicyContext};
use crate::error::{HedgeFailed, PolicyError, PolicyResult};
use crate::policy::{Operation, Policy};
use crate::sync::lock;

const LATENCY_WINDOW: usize = 1000;

/// When hedge `n` (1-indexed) launches, measured from the previous launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum HedgeDelay {
    /// Same delay before every hedge.
    Fixed(Duration),
    /// `d * n` before hedge `n`.
    Linear(Duration),
    /// `d * 2^(n-1)` before hedge `n`.
    Exponential(Duration),
}

impl HedgeDelay {
    /// Delay before hedge `hedge`.
    ///
    /// ```rust
    /// use breakwater::HedgeDelay;
    /// use std::time::Duration;
    ///
    /// let d = Duration::from_millis(10);
    /// assert_eq!(HedgeDelay::Fixed(d).delay_for(3), d);
    /// assert_eq!(HedgeDelay::Linear(d).delay_for(3), Duration::from_millis(30));
    /// assert_eq!(HedgeDelay::Exponential(d).delay_for(3), Duration::from_millis(40));
    /// ```
    pub fn delay_for(&self, hedge: u32) -> Duration {
        let n = hedge.max(1);
        match *self {
            HedgeDelay::Fixed(d) => d,
            HedgeDelay::Linear(d) => d.saturating_mul(n),
            HedgeDelay::Exponential(d) => d.saturating_mul(2u32.saturating_pow(n - 1)),
        }
    }
}

impl From<Duration> for HedgeDelay {
    fn from(delay: Duration) -> Self {
        HedgeDelay::Fixed(delay)
    }
}

/// Veto for launching hedge `n`.
pub type ShouldHedge = Arc<dyn Fn(u32) -> bool + Send + Sync>;

/// Hedge configuration.
#[derive(Clone)]
pub struct HedgeOptions {
    /// Delay strategy.
    pub delay: HedgeDelay,
    /// Extra attempts allowed beyond the primary.
    pub max_hedges: u32,
    should_hedge: Option<ShouldHedge>,
}

impl HedgeOptions {
    /// Options with the given delay and hedge budget.
    pub fn new(delay: impl Into<HedgeDelay>, max_hedges: u32) -> Self {
        Self {
            delay: delay.into(),
            max_hedges,
            should_hedge: None,
        }
    }

    /// Consult `predicate` before each hedge. Once it refuses, no further
    /// hedges are launched for that execution.
    pub fn with_should_hedge<P>(mut self, predicate: P) -> Self
    where
        P: Fn(u32) -> bool + Send + Sync + 'static,
    {
        self.should_hedge = Some(Arc::new(predicate));
        self
    }
}

impl Default for HedgeOptions {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 1)
    }
}

impl fmt::Debug for HedgeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HedgeOptions")
            .field("delay", &self.delay)
            .field("max_hedges", &self.max_hedges)
            .field("should_hedge", &self.should_hedge.is_some())
            .finish()
    }
}

/// Snapshot of hedge counters and latencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HedgeMetrics {
    /// Calls to `execute()`.
    pub total_executions: u64,
    /// Hedges launched across all executions.
    pub total_hedges: u64,
    /// Executions won by the primary attempt.
    pub primary_wins: u64,
    /// Executions won by a hedge.
    pub hedge_wins: u64,
    /// Executions where every attempt failed.
    pub failures: u64,
    /// Mean latency of successful executions.
    pub avg_latency: Duration,
    /// Mean latency of executions won by the primary.
    pub avg_primary_latency: Duration,
    /// Mean latency of executions won by a hedge.
    pub avg_hedge_latency: Duration,
    /// 99th percentile over the most recent successful executions.
    pub p99_latency: Duration,
    /// Attempts still in flight when another attempt won.
    pub resource_waste: u64,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_executions: u64,
    total_hedges: u64,
    primary_wins: u64,
    hedge_wins: u64,
    failures: u64,
    primary_latency: Duration,
    hedge_latency: Duration,
    recent: VecDeque<Duration>,
    resource_waste: u64,
}

fn mean(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => total / count,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

fn percentile(samples: &VecDeque<Duration>, p: f64) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl MetricsState {
    fn record_win(&mut self, hedge: bool, latency: Duration, wasted: usize) {
        if hedge {
            self.hedge_wins += 1;
            self.hedge_latency += latency;
        } else {
            self.primary_wins += 1;
            self.primary_latency += latency;
        }
        if self.recent.len() == LATENCY_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
        self.resource_waste += wasted as u64;
    }

    fn snapshot(&self) -> HedgeMetrics {
        let wins = self.primary_wins + self.hedge_wins;
        HedgeMetrics {
            total_executions: self.total_executions,
            total_hedges: self.total_hedges,
            primary_wins: self.primary_wins,
            hedge_wins: self.hedge_wins,
            failures: self.failures,
            avg_latency: mean(self.primary_latency + self.hedge_latency, wins),
            avg_primary_latency: mean(self.primary_latency, self.primary_wins),
            avg_hedge_latency: mean(self.hedge_latency, self.hedge_wins),
            p99_latency: percentile(&self.recent, 0.99),
            resource_waste: self.resource_waste,
        }
    }
}

enum Step<T> {
    Settled(Option<(u32, PolicyResult<T>)>),
    TimerFired,
}

/// Races delayed copies of an operation to cut tail latency.
///
/// # Examples
///
/// ```rust
/// use breakwater::prelude::*;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let hedge = HedgePolicy::new(HedgeOptions::new(Duration::from_millis(50), 2));
///
/// let result = hedge.execute(|| async { Ok::<_, PolicyError>("fast") }).await;
/// assert_eq!(result.unwrap(), "fast");
/// assert_eq!(hedge.metrics().primary_wins, 1);
/// assert_eq!(hedge.metrics().total_hedges, 0);
/// # });
/// ```
pub struct HedgePolicy {
    name: String,
    options: HedgeOptions,
    clock: SharedClock,
    metrics: Mutex<MetricsState>,
    context: ContextTracker,
}

impl HedgePolicy {
    /// Create a hedge policy.
    pub fn new(options: HedgeOptions) -> Self {
        Self {
            name: "hedge".to_string(),
            options,
            clock: default_clock(),
            metrics: Mutex::new(MetricsState::default()),
            context: ContextTracker::default(),
        }
    }

    /// Use `clock` for hedge delays and latency measurement.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The configuration.
    pub fn options(&self) -> &HedgeOptions {
        &self.options
    }

    /// Snapshot of counters and latencies.
    pub fn metrics(&self) -> HedgeMetrics {
        lock(&self.metrics).snapshot()
    }

    /// Zero all counters and drop the latency window.
    pub fn reset_metrics(&self) {
        *lock(&self.metrics) = MetricsState::default();
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

    fn permits_hedge(&self, hedge: u32) -> bool {
        if hedge > self.options.max_hedges {
            return false;
        }
        match &self.options.should_hedge {
            Some(should_hedge) => should_hedge(hedge),
            None => true,
        }
    }

    fn timer_for(&self, hedge: u32) -> Option<BoxFuture<'static, ()>> {
        (hedge <= self.options.max_hedges).then(|| self.clock.sleep(self.options.delay.delay_for(hedge)))
    }

    async fn run<'a, T>(&'a self, operation: Operation<'a, T>) -> PolicyResult<T> {
        let start = self.clock.now();
        lock(&self.metrics).total_executions += 1;

        let launch = |index: u32| operation().map(move |result| (index, result));
        let mut in_flight = FuturesUnordered::new();
        in_flight.push(launch(0));

        let mut launched = 1u32;
        let mut hedging = true;
        let mut errors = Vec::new();
        let mut timer = self.timer_for(launched);

        let result = loop {
            // hedges only chase slow attempts; failed ones are not retried
            if in_flight.is_empty() {
                break Err(PolicyError::HedgeFailed(HedgeFailed {
                    attempts: launched,
                    errors: std::mem::take(&mut errors),
                }));
            }

            let step = match timer.as_mut() {
                Some(sleep) => match future::select(in_flight.next(), sleep).await {
                    Either::Left((settled, _)) => Step::Settled(settled),
                    Either::Right(((), _)) => Step::TimerFired,
                },
                None => Step::Settled(in_flight.next().await),
            };

            match step {
                Step::Settled(Some((index, Ok(value)))) => {
                    let latency = self.clock.now().saturating_duration_since(start);
                    let wasted = in_flight.len();
                    lock(&self.metrics).record_win(index > 0, latency, wasted);
                    #[cfg(feature = "tracing")]
                    if index > 0 {
                        tracing::debug!(policy = %self.name, hedge = index, ?latency, wasted, "hedge won");
                    }
                    break Ok(value);
                }
                Step::Settled(Some((_, Err(error)))) => errors.push(error),
                Step::Settled(None) => {}
                Step::TimerFired => {
                    timer = None;
                    if !hedging {
                        continue;
                    }
                    if self.permits_hedge(launched) {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(policy = %self.name, hedge = launched, "launching hedge");
                        in_flight.push(launch(launched));
                        launched += 1;
                        timer = self.timer_for(launched);
                    } else {
                        hedging = false;
                    }
                }
            }
        };

        drop(in_flight);
        {
            let mut metrics = lock(&self.metrics);
            metrics.total_hedges += u64::from(launched - 1);
            if result.is_err() {
                metrics.failures += 1;
            }
        }
        #[cfg(feature = "tracing")]
        if result.is_err() {
            tracing::warn!(policy = %self.name, attempts = launched, "all hedged attempts failed");
        }
        self.context.record(&result, self.clock.system_time());
        result
    }
}

impl<T: Send + 'static> Policy<T> for HedgePolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_operation<'a>(&'a self, operation: Operation<'a, T>) -> BoxFuture<'a, PolicyResult<T>> {
        self.run(operation).boxed()
    }
}

impl fmt::Debug for HedgePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HedgePolicy")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
