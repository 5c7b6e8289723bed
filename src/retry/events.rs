//! Lifecycle events emitted by [`RetryPolicy`](super::RetryPolicy).
//!
//! A single `execute()` emits `Started`, then one `Attempt` per attempt, a
//! `Failed` for each failed attempt, a `Backoff` before each sleep, and
//! finally either `Succeeded` or `Exhausted`. When the retry predicate
//! rejects an error the sequence ends after that `Failed` event with
//! `will_retry == false`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::options::Backoff;
use crate::error::PolicyError;
use crate::jitter::JitterStrategy;

/// One retry lifecycle event.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    /// When the event was produced.
    pub timestamp: SystemTime,
    /// Name of the emitting policy.
    pub policy: String,
    /// Caller supplied correlation id.
    pub operation_id: Option<String>,
    /// What happened.
    pub kind: RetryEventKind,
}

/// Payload of a [`RetryEvent`].
#[derive(Debug, Clone)]
pub enum RetryEventKind {
    /// `execute()` was entered.
    Started {
        /// Attempts allowed in total.
        max_attempts: u32,
        /// Configured backoff.
        backoff: Backoff,
        /// Configured base delay.
        delay: Duration,
        /// Configured delay cap.
        max_delay: Option<Duration>,
        /// Configured jitter.
        jitter: JitterStrategy,
    },
    /// An attempt is about to run.
    Attempt {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Time since `Started`.
        elapsed: Duration,
    },
    /// An attempt failed.
    Failed {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// The attempt's error.
        error: PolicyError,
        /// Time since `Started`.
        elapsed: Duration,
        /// Whether another attempt follows.
        will_retry: bool,
    },
    /// The policy is about to sleep before the next attempt.
    Backoff {
        /// Attempt that just failed.
        attempt: u32,
        /// Sleep duration, jitter included.
        delay: Duration,
        /// Wall-clock time of the next attempt.
        next_attempt_at: SystemTime,
    },
    /// An attempt succeeded.
    Succeeded {
        /// The successful attempt.
        attempt: u32,
        /// Attempts made, equal to `attempt`.
        total_attempts: u32,
        /// Time since `Started`.
        total_elapsed: Duration,
    },
    /// Every attempt failed.
    Exhausted {
        /// Attempts made.
        total_attempts: u32,
        /// Error of the last attempt.
        last_error: PolicyError,
        /// Time since `Started`.
        total_elapsed: Duration,
    },
}

impl RetryEventKind {
    /// Stable event name, e.g. `"retry:failed"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "retry:started",
            Self::Attempt { .. } => "retry:attempt",
            Self::Failed { .. } => "retry:failed",
            Self::Backoff { .. } => "retry:backoff",
            Self::Succeeded { .. } => "retry:succeeded",
            Self::Exhausted { .. } => "retry:exhausted",
        }
    }
}

/// Callback receiving retry events.
pub type RetryEventHandler = Arc<dyn Fn(&RetryEvent) + Send + Sync>;

/// Typed and catch-all event callbacks.
///
/// Typed handlers run first, then `on_event`.
///
/// # Examples
///
/// ```rust
/// use breakwater::{RetryEventHandlers, RetryEventKind};
/// use std::sync::{Arc, Mutex};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&seen);
/// let handlers = RetryEventHandlers::new()
///     .on_event(move |event| sink.lock().unwrap().push(event.kind.name()));
/// # let _ = handlers;
/// ```
#[derive(Clone, Default)]
pub struct RetryEventHandlers {
    on_started: Option<RetryEventHandler>,
    on_attempt: Option<RetryEventHandler>,
    on_failed: Option<RetryEventHandler>,
    on_backoff: Option<RetryEventHandler>,
    on_succeeded: Option<RetryEventHandler>,
    on_exhausted: Option<RetryEventHandler>,
    on_event: Option<RetryEventHandler>,
}

macro_rules! handler_setter {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub fn $name<H>(mut self, handler: H) -> Self
        where
            H: Fn(&RetryEvent) + Send + Sync + 'static,
        {
            self.$name = Some(Arc::new(handler));
            self
        }
    };
}

impl RetryEventHandlers {
    /// No handlers.
    pub fn new() -> Self {
        Self::default()
    }

    handler_setter!(
        /// Called with `Started` events.
        on_started
    );
    handler_setter!(
        /// Called with `Attempt` events.
        on_attempt
    );
    handler_setter!(
        /// Called with `Failed` events.
        on_failed
    );
    handler_setter!(
        /// Called with `Backoff` events.
        on_backoff
    );
    handler_setter!(
        /// Called with `Succeeded` events.
        on_succeeded
    );
    handler_setter!(
        /// Called with `Exhausted` events.
        on_exhausted
    );
    handler_setter!(
        /// Called with every event.
        on_event
    );

    /// True when no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.on_started.is_none()
            && self.on_attempt.is_none()
            && self.on_failed.is_none()
            && self.on_backoff.is_none()
            && self.on_succeeded.is_none()
            && self.on_exhausted.is_none()
            && self.on_event.is_none()
    }

    fn deliver(&self, event: &RetryEvent) {
        let typed = match event.kind {
            RetryEventKind::Started { .. } => &self.on_started,
            RetryEventKind::Attempt { .. } => &self.on_attempt,
            RetryEventKind::Failed { .. } => &self.on_failed,
            RetryEventKind::Backoff { .. } => &self.on_backoff,
            RetryEventKind::Succeeded { .. } => &self.on_succeeded,
            RetryEventKind::Exhausted { .. } => &self.on_exhausted,
        };
        if let Some(handler) = typed {
            handler(event);
        }
        if let Some(handler) = &self.on_event {
            handler(event);
        }
    }
}

impl fmt::Debug for RetryEventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEventHandlers")
            .field("on_started", &self.on_started.is_some())
            .field("on_attempt", &self.on_attempt.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .field("on_backoff", &self.on_backoff.is_some())
            .field("on_succeeded", &self.on_succeeded.is_some())
            .field("on_exhausted", &self.on_exhausted.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// Event delivery settings.
///
/// With `buffered` set, events are collected and delivered in batches of
/// `buffer_size`, plus a final flush when `execute()` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventOptions {
    /// Batch events instead of delivering them immediately.
    pub buffered: bool,
    /// Batch size when buffered.
    pub buffer_size: usize,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            buffered: false,
            buffer_size: 10,
        }
    }
}

impl EventOptions {
    /// Buffered delivery with the given batch size.
    pub fn buffered(buffer_size: usize) -> Self {
        Self {
            buffered: true,
            buffer_size,
        }
    }
}

/// Routes events to handlers.
pub(crate) struct EventDispatcher {
    handlers: RetryEventHandlers,
    options: EventOptions,
}

impl EventDispatcher {
    pub(crate) fn new(handlers: RetryEventHandlers, options: EventOptions) -> Self {
        Self { handlers, options }
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Start collecting the events of one `execute()` call.
    pub(crate) fn batch(&self) -> EventBatch<'_> {
        EventBatch {
            dispatcher: self,
            pending: Vec::new(),
        }
    }
}

/// Events of a single execution. Whatever is still pending is delivered when
/// the batch is dropped, including when the execution itself is cancelled.
pub(crate) struct EventBatch<'a> {
    dispatcher: &'a EventDispatcher,
    pending: Vec<RetryEvent>,
}

impl EventBatch<'_> {
    pub(crate) fn emit(&mut self, event: RetryEvent) {
        let dispatcher = self.dispatcher;
        if !dispatcher.is_active() {
            return;
        }
        if !dispatcher.options.buffered {
            dispatcher.handlers.deliver(&event);
            return;
        }
        self.pending.push(event);
        if self.pending.len() >= dispatcher.options.buffer_size.max(1) {
            self.flush();
        }
    }

    pub(crate) fn flush(&mut self) {
        for event in std::mem::take(&mut self.pending) {
            self.dispatcher.handlers.deliver(&event);
        }
    }
}

impl Drop for EventBatch<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
