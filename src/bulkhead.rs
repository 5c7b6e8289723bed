//! Concurrency limiting with a bounded FIFO wait queue.
//!
//! A bulkhead admits up to `max_concurrent` executions at once. Further
//! callers wait in a queue of at most `max_queue` entries, in arrival order,
//! and are rejected outright once the queue is full. A finishing execution
//! hands its slot directly to the head of the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{self, BoxFuture, Either};
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::clock::{default_clock, Clock, SharedClock};
use crate::context::{ContextTracker, PolicyContext};
use crate::error::{BulkheadQueueTimeout, BulkheadRejected, ConfigError, PolicyError, PolicyResult};
use crate::policy::{Operation, Policy};
use crate::sync::lock;

/// Bulkhead configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BulkheadOptions {
    /// Maximum concurrent executions.
    pub max_concurrent: usize,
    /// Maximum callers waiting for a slot.
    pub max_queue: usize,
    /// How long a queued caller waits before giving up; `None` waits forever.
    pub queue_timeout: Option<Duration>,
}

impl BulkheadOptions {
    /// Options with no queue timeout.
    pub fn new(max_concurrent: usize, max_queue: usize) -> Self {
        Self {
            max_concurrent,
            max_queue,
            queue_timeout: None,
        }
    }

    /// Set the queue timeout.
    pub fn with_queue_timeout(mut self, queue_timeout: Duration) -> Self {
        self.queue_timeout = Some(queue_timeout);
        self
    }

    /// Check the options for inconsistencies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::new("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for BulkheadOptions {
    fn default() -> Self {
        Self::new(10, 100)
    }
}

/// Snapshot of bulkhead occupancy and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BulkheadMetrics {
    /// Executions currently running.
    pub active_concurrent: usize,
    /// Callers currently waiting.
    pub queued_count: usize,
    /// Executions admitted so far.
    pub total_executed: u64,
    /// Calls rejected because the queue was full.
    pub total_rejected: u64,
    /// Calls that had to wait in the queue.
    pub total_queued: u64,
    /// Queued calls that gave up waiting.
    pub total_queue_timeout: u64,
    /// Concurrency limit.
    pub max_concurrent: usize,
    /// Queue limit.
    pub max_queue: usize,
}

impl BulkheadMetrics {
    /// Fraction of the concurrency limit in use.
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 1.0;
        }
        self.active_concurrent as f64 / self.max_concurrent as f64
    }

    /// Whether every execution slot is taken.
    pub fn is_at_capacity(&self) -> bool {
        self.active_concurrent >= self.max_concurrent
    }

    /// Fraction of calls rejected outright.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_executed + self.total_rejected;
        if total == 0 {
            return 0.0;
        }
        self.total_rejected as f64 / total as f64
    }
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    notify: oneshot::Sender<()>,
}

#[derive(Debug)]
struct BulkheadState {
    max_concurrent: usize,
    max_queue: usize,
    active: usize,
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    total_executed: u64,
    total_rejected: u64,
    total_queued: u64,
    total_queue_timeout: u64,
}

impl BulkheadState {
    /// Hand free slots to queued callers, oldest first.
    fn drain_queue(&mut self) {
        while self.active < self.max_concurrent {
            let Some(waiter) = self.queue.pop_front() else {
                break;
            };
            if waiter.notify.send(()).is_ok() {
                self.active += 1;
            }
        }
    }

    fn remove(&mut self, ticket: u64) -> bool {
        match self.queue.iter().position(|w| w.ticket == ticket) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }
}

enum Admission {
    Ready,
    Queued { ticket: u64, receiver: oneshot::Receiver<()> },
    Rejected(BulkheadRejected),
}

/// Limits concurrent executions of the wrapped operation.
///
/// # Examples
///
/// ```rust
/// use breakwater::prelude::*;
///
/// # tokio_test::block_on(async {
/// let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(2, 0));
///
/// let result = bulkhead.execute(|| async { Ok::<_, PolicyError>("ran") }).await;
/// assert_eq!(result.unwrap(), "ran");
///
/// let metrics = bulkhead.metrics();
/// assert_eq!(metrics.total_executed, 1);
/// assert_eq!(metrics.active_concurrent, 0);
/// # });
/// ```
pub struct BulkheadPolicy {
    name: String,
    queue_timeout: Option<Duration>,
    clock: SharedClock,
    state: Mutex<BulkheadState>,
    context: ContextTracker,
}

impl BulkheadPolicy {
    /// Create a bulkhead.
    ///
    /// A `max_concurrent` of 0 is treated as 1, so calls never queue behind a
    /// slot that cannot exist. Use [`BulkheadOptions::validate`] to reject
    /// such options instead.
    pub fn new(options: BulkheadOptions) -> Self {
        Self {
            name: "bulkhead".to_string(),
            queue_timeout: options.queue_timeout,
            clock: default_clock(),
            state: Mutex::new(BulkheadState {
                max_concurrent: options.max_concurrent.max(1),
                max_queue: options.max_queue,
                active: 0,
                queue: VecDeque::new(),
                next_ticket: 0,
                total_executed: 0,
                total_rejected: 0,
                total_queued: 0,
                total_queue_timeout: 0,
            }),
            context: ContextTracker::default(),
        }
    }

    /// Use `clock` for queue timeouts.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Current limits and queue timeout.
    pub fn options(&self) -> BulkheadOptions {
        let state = lock(&self.state);
        BulkheadOptions {
            max_concurrent: state.max_concurrent,
            max_queue: state.max_queue,
            queue_timeout: self.queue_timeout,
        }
    }

    /// Snapshot of occupancy and counters.
    pub fn metrics(&self) -> BulkheadMetrics {
        let state = lock(&self.state);
        BulkheadMetrics {
            active_concurrent: state.active,
            queued_count: state.queue.len(),
            total_executed: state.total_executed,
            total_rejected: state.total_rejected,
            total_queued: state.total_queued,
            total_queue_timeout: state.total_queue_timeout,
            max_concurrent: state.max_concurrent,
            max_queue: state.max_queue,
        }
    }

    /// Change the concurrency limit.
    ///
    /// Raising it admits queued callers immediately. Lowering it never
    /// interrupts running executions; slots are simply not handed on until
    /// the active count drops below the new limit.
    pub fn update_capacity(&self, max_concurrent: usize) -> Result<(), ConfigError> {
        if max_concurrent == 0 {
            return Err(ConfigError::new("max_concurrent must be greater than 0"));
        }
        let mut state = lock(&self.state);
        state.max_concurrent = max_concurrent;
        state.drain_queue();
        #[cfg(feature = "tracing")]
        tracing::debug!(policy = %self.name, max_concurrent, active = state.active, "bulkhead capacity updated");
        Ok(())
    }

    /// Change the queue limit. Callers already queued keep their place.
    pub fn update_queue_size(&self, max_queue: usize) {
        lock(&self.state).max_queue = max_queue;
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

    fn admit(&self) -> Admission {
        let mut state = lock(&self.state);
        if state.active < state.max_concurrent && state.queue.is_empty() {
            state.active += 1;
            return Admission::Ready;
        }
        if state.queue.len() < state.max_queue {
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (notify, receiver) = oneshot::channel();
            state.queue.push_back(Waiter { ticket, notify });
            state.total_queued += 1;
            return Admission::Queued { ticket, receiver };
        }
        state.total_rejected += 1;
        Admission::Rejected(BulkheadRejected {
            active: state.active,
            queued: state.queue.len(),
            max_concurrent: state.max_concurrent,
            max_queue: state.max_queue,
        })
    }

    /// Return a slot, passing it to the queue head when possible.
    fn release(&self) {
        let mut state = lock(&self.state);
        if state.active <= state.max_concurrent {
            while let Some(waiter) = state.queue.pop_front() {
                if waiter.notify.send(()).is_ok() {
                    return;
                }
            }
        }
        state.active = state.active.saturating_sub(1);
    }

    /// Take `ticket` out of the queue. False when it was already granted a slot.
    fn leave_queue(&self, ticket: u64, timed_out: bool) -> bool {
        let mut state = lock(&self.state);
        let removed = state.remove(ticket);
        if removed && timed_out {
            state.total_queue_timeout += 1;
        }
        removed
    }

    async fn acquire(&self) -> Result<SlotGuard<'_>, PolicyError> {
        let (ticket, receiver) = match self.admit() {
            Admission::Ready => return Ok(SlotGuard { bulkhead: self }),
            Admission::Rejected(rejected) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(policy = %self.name, active = rejected.active, queued = rejected.queued, "bulkhead rejected call");
                return Err(PolicyError::BulkheadRejected(rejected));
            }
            Admission::Queued { ticket, receiver } => (ticket, receiver),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(policy = %self.name, ticket, "bulkhead full, queueing call");

        let mut waiter = QueueGuard {
            bulkhead: self,
            ticket,
            receiver,
            settled: false,
        };
        let start = self.clock.now();
        let granted = match self.queue_timeout {
            Some(limit) => {
                matches!(
                    future::select(&mut waiter.receiver, self.clock.sleep(limit)).await,
                    Either::Left(_)
                )
            }
            None => {
                let _ = (&mut waiter.receiver).await;
                true
            }
        };
        waiter.settled = true;

        // a grant can race the deadline; the queue is the source of truth
        if granted || !self.leave_queue(ticket, true) {
            return Ok(SlotGuard { bulkhead: self });
        }

        let waited = self.clock.now().saturating_duration_since(start);
        let state = lock(&self.state);
        #[cfg(feature = "tracing")]
        tracing::warn!(policy = %self.name, ?waited, "bulkhead queue wait timed out");
        Err(PolicyError::BulkheadQueueTimeout(BulkheadQueueTimeout {
            waited,
            queue_timeout: self.queue_timeout.unwrap_or(waited),
            active: state.active,
            queued: state.queue.len(),
        }))
    }

    async fn run<'a, T>(&'a self, operation: Operation<'a, T>) -> PolicyResult<T> {
        let result = match self.acquire().await {
            Ok(slot) => {
                lock(&self.state).total_executed += 1;
                let result = operation().await;
                drop(slot);
                result
            }
            Err(error) => Err(error),
        };
        self.context.record(&result, self.clock.system_time());
        result
    }
}

/// An occupied execution slot.
struct SlotGuard<'a> {
    bulkhead: &'a BulkheadPolicy,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.bulkhead.release();
    }
}

/// A queued caller; leaves the queue (or returns its granted slot) if dropped
/// while still waiting.
struct QueueGuard<'a> {
    bulkhead: &'a BulkheadPolicy,
    ticket: u64,
    receiver: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && !self.bulkhead.leave_queue(self.ticket, false) {
            self.bulkhead.release();
        }
    }
}

impl<T: Send + 'static> Policy<T> for BulkheadPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute_operation<'a>(&'a self, operation: Operation<'a, T>) -> BoxFuture<'a, PolicyResult<T>> {
        self.run(operation).boxed()
    }
}

impl fmt::Debug for BulkheadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics();
        f.debug_struct("BulkheadPolicy")
            .field("name", &self.name)
            .field("max_concurrent", &metrics.max_concurrent)
            .field("max_queue", &metrics.max_queue)
            .field("active", &metrics.active_concurrent)
            .field("queued", &metrics.queued_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyExt;
    use futures::future::Shared;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Gate = Shared<oneshot::Receiver<()>>;

    fn gate() -> (oneshot::Sender<()>, Gate) {
        let (open, gate) = oneshot::channel();
        (open, gate.shared())
    }

    /// Operation that blocks until `gate` opens.
    async fn blocked(gate: Gate) -> PolicyResult<&'static str> {
        let _ = gate.await;
        Ok("done")
    }

    #[tokio::test]
    async fn test_rejects_when_full_without_queue() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(2, 0));
        let (open, gate) = gate();

        let first = bulkhead.execute(|| blocked(gate.clone()));
        let second = bulkhead.execute(|| blocked(gate.clone()));
        futures::pin_mut!(first, second);
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(futures::poll!(second.as_mut()).is_pending());

        let third = bulkhead.execute(|| async { Ok::<_, PolicyError>("third") }).await;
        match third {
            Err(PolicyError::BulkheadRejected(rejected)) => {
                assert_eq!(rejected.active, 2);
                assert_eq!(rejected.max_concurrent, 2);
                assert_eq!(rejected.queued, 0);
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        open.send(()).unwrap();
        assert_eq!(first.await.unwrap(), "done");
        assert_eq!(second.await.unwrap(), "done");

        let fourth = bulkhead.execute(|| async { Ok::<_, PolicyError>("fourth") }).await;
        assert_eq!(fourth.unwrap(), "fourth");

        let metrics = bulkhead.metrics();
        assert_eq!(metrics.total_executed, 3);
        assert_eq!(metrics.total_rejected, 1);
        assert_eq!(metrics.active_concurrent, 0);
    }

    #[tokio::test]
    async fn test_queued_callers_run_in_fifo_order() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(1, 3));
        let order = Mutex::new(Vec::new());
        let (open, gate) = gate();

        let holder = bulkhead.execute(|| blocked(gate.clone()));
        futures::pin_mut!(holder);
        assert!(futures::poll!(holder.as_mut()).is_pending());

        let queued = |label: &'static str| {
            let order = &order;
            bulkhead.execute(move || async move {
                order.lock().unwrap().push(label);
                Ok::<_, PolicyError>(label)
            })
        };
        let a = queued("a");
        let b = queued("b");
        let c = queued("c");
        futures::pin_mut!(a, b, c);
        // enqueue in order c, a, b
        assert!(futures::poll!(c.as_mut()).is_pending());
        assert!(futures::poll!(a.as_mut()).is_pending());
        assert!(futures::poll!(b.as_mut()).is_pending());
        assert_eq!(bulkhead.metrics().queued_count, 3);

        open.send(()).unwrap();
        holder.await.unwrap();
        let (ra, rb, rc) = futures::join!(a, b, c);
        assert_eq!((ra.unwrap(), rb.unwrap(), rc.unwrap()), ("a", "b", "c"));

        assert_eq!(*order.lock().unwrap(), vec!["c", "a", "b"]);
        assert_eq!(bulkhead.metrics().total_queued, 3);
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(1, 1));
        let (_open, gate) = gate();

        let holder = bulkhead.execute(|| blocked(gate.clone()));
        let waiting = bulkhead.execute(|| blocked(gate.clone()));
        futures::pin_mut!(holder, waiting);
        assert!(futures::poll!(holder.as_mut()).is_pending());
        assert!(futures::poll!(waiting.as_mut()).is_pending());

        let result = bulkhead.execute(|| async { Ok::<_, PolicyError>("x") }).await;
        match result {
            Err(PolicyError::BulkheadRejected(rejected)) => {
                assert_eq!(rejected.queued, 1);
                assert_eq!(rejected.max_queue, 1);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_timeout() {
        let bulkhead =
            BulkheadPolicy::new(BulkheadOptions::new(1, 1).with_queue_timeout(Duration::from_millis(100)));
        let (_open, gate) = gate();

        let holder = bulkhead.execute(|| blocked(gate.clone()));
        futures::pin_mut!(holder);
        assert!(futures::poll!(holder.as_mut()).is_pending());

        let result = bulkhead.execute(|| async { Ok::<_, PolicyError>("late") }).await;
        match result {
            Err(PolicyError::BulkheadQueueTimeout(timeout)) => {
                assert_eq!(timeout.queue_timeout, Duration::from_millis(100));
                assert!(timeout.waited >= Duration::from_millis(100));
                assert_eq!(timeout.active, 1);
                assert_eq!(timeout.queued, 0);
            }
            other => panic!("expected queue timeout, got {:?}", other),
        }

        let metrics = bulkhead.metrics();
        assert_eq!(metrics.total_queue_timeout, 1);
        assert_eq!(metrics.queued_count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(1, 2));
        let (open, gate) = gate();

        let holder = bulkhead.execute(|| blocked(gate.clone()));
        futures::pin_mut!(holder);
        assert!(futures::poll!(holder.as_mut()).is_pending());

        {
            let abandoned = bulkhead.execute(|| async { Ok::<_, PolicyError>("never") });
            futures::pin_mut!(abandoned);
            assert!(futures::poll!(abandoned.as_mut()).is_pending());
            assert_eq!(bulkhead.metrics().queued_count, 1);
        }
        assert_eq!(bulkhead.metrics().queued_count, 0);

        open.send(()).unwrap();
        holder.await.unwrap();
        assert_eq!(bulkhead.metrics().active_concurrent, 0);
    }

    #[tokio::test]
    async fn test_granted_but_dropped_waiter_returns_slot() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(1, 2));
        let (open, gate) = gate();

        let holder = bulkhead.execute(|| blocked(gate.clone()));
        futures::pin_mut!(holder);
        assert!(futures::poll!(holder.as_mut()).is_pending());

        let mut waiter = bulkhead.execute(|| async { Ok::<_, PolicyError>("granted") });
        assert!(futures::poll!(waiter.as_mut()).is_pending());

        open.send(()).unwrap();
        holder.await.unwrap();
        // slot was handed over but the waiter never ran
        assert_eq!(bulkhead.metrics().active_concurrent, 1);
        drop(waiter);

        assert_eq!(bulkhead.metrics().active_concurrent, 0);
    }

    #[tokio::test]
    async fn test_slot_released_on_error_and_panic() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(1, 0));

        let failed: PolicyResult<()> = bulkhead.execute(|| async { Err(PolicyError::from("x")) }).await;
        assert!(failed.is_err());
        let panicked = bulkhead
            .execute(|| async {
                if true {
                    panic!("boom");
                }
                Ok::<(), PolicyError>(())
            })
            .await;
        assert!(panicked.unwrap_err().is_panic());

        assert_eq!(bulkhead.metrics().active_concurrent, 0);
        assert!(bulkhead.execute(|| async { Ok::<_, PolicyError>(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_capacity_admits_queued_callers() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(1, 5));
        let running = AtomicUsize::new(0);
        let (_open, gate) = gate();

        let holder = bulkhead.execute(|| blocked(gate.clone()));
        let waiter = bulkhead.execute(|| {
            running.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, PolicyError>("admitted") }
        });
        futures::pin_mut!(holder, waiter);
        assert!(futures::poll!(holder.as_mut()).is_pending());
        assert!(futures::poll!(waiter.as_mut()).is_pending());
        assert_eq!(running.load(Ordering::SeqCst), 0);

        bulkhead.update_capacity(2).unwrap();
        assert_eq!(bulkhead.metrics().queued_count, 0);
        assert_eq!(bulkhead.metrics().active_concurrent, 2);

        assert_eq!(waiter.await.unwrap(), "admitted");
        assert_eq!(running.load(Ordering::SeqCst), 1);
        assert!(bulkhead.update_capacity(0).is_err());
    }

    #[tokio::test]
    async fn test_shrinking_capacity_does_not_hand_off_excess_slots() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(2, 5));
        let (open, gate) = gate();

        let a = bulkhead.execute(|| blocked(gate.clone()));
        let b = bulkhead.execute(|| blocked(gate.clone()));
        futures::pin_mut!(a, b);
        assert!(futures::poll!(a.as_mut()).is_pending());
        assert!(futures::poll!(b.as_mut()).is_pending());

        bulkhead.update_capacity(1).unwrap();
        let c = bulkhead.execute(|| async { Ok::<_, PolicyError>("c") });
        futures::pin_mut!(c);
        assert!(futures::poll!(c.as_mut()).is_pending());

        open.send(()).unwrap();
        a.await.unwrap();
        // one finished, still at the new limit, so c keeps waiting
        assert_eq!(bulkhead.metrics().active_concurrent, 1);
        assert_eq!(bulkhead.metrics().queued_count, 1);

        b.await.unwrap();
        assert_eq!(c.await.unwrap(), "c");
        assert_eq!(bulkhead.metrics().active_concurrent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_is_treated_as_one() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(0, 5));
        assert_eq!(bulkhead.options().max_concurrent, 1);

        let result = bulkhead.execute(|| async { Ok::<_, PolicyError>("ran") }).await;
        assert_eq!(result.unwrap(), "ran");
        assert_eq!(bulkhead.metrics().total_executed, 1);
    }

    #[test]
    fn test_update_queue_size() {
        let bulkhead = BulkheadPolicy::new(BulkheadOptions::new(1, 1));
        bulkhead.update_queue_size(7);
        assert_eq!(bulkhead.options().max_queue, 7);
        assert_eq!(bulkhead.metrics().max_queue, 7);
    }

    #[test]
    fn test_options_validate() {
        assert!(BulkheadOptions::default().validate().is_ok());
        assert!(BulkheadOptions::new(0, 10).validate().is_err());
    }

    #[test]
    fn test_metrics_ratios() {
        let metrics = BulkheadMetrics {
            active_concurrent: 3,
            queued_count: 0,
            total_executed: 9,
            total_rejected: 1,
            total_queued: 0,
            total_queue_timeout: 0,
            max_concurrent: 4,
            max_queue: 0,
        };
        assert_eq!(metrics.utilization(), 0.75);
        assert!(!metrics.is_at_capacity());
        assert_eq!(metrics.rejection_rate(), 0.1);
    }
}
