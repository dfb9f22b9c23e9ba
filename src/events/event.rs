//! # Events emitted by a cluster.
//!
//! The [`EventKind`] enum classifies events across four groups:
//! - **Worker lifecycle**: fork, hoisted messages, disconnect, exit
//! - **Sequencer outcomes**: started, start timeout, unexpected exit, stopped, stop timeout
//! - **Signal relay**: queued, relayed, dropped
//! - **Replacement**: queued, started, succeeded, failed, rejected
//!
//! The [`Event`] struct carries the metadata: worker pid, replacement pid,
//! signal, lifecycle event, timeout and a free-form reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use forkvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::StartTimeout)
//!     .with_pid(4242)
//!     .with_timeout(Duration::from_millis(10));
//!
//! assert_eq!(ev.kind, EventKind::StartTimeout);
//! assert_eq!(ev.pid, Some(4242));
//! assert_eq!(ev.timeout_ms, Some(10));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use nix::sys::signal::Signal;

use crate::error::ClusterError;
use crate::protocol::LifecycleEvent;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of cluster events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: panic message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `subscriber`: subscriber name
    /// - `reason`: `"full"` or `"closed"`
    SubscriberOverflow,

    // === Worker lifecycle ===
    /// A worker process was created and registered, before its start-wait resolves.
    ///
    /// Sets:
    /// - `pid`: new worker pid
    WorkerForked,

    /// The fork primitive failed; no worker exists.
    ///
    /// Sets:
    /// - `reason`: OS error message
    ForkFailed,

    /// A valid lifecycle envelope arrived from a worker and was hoisted.
    ///
    /// Sets:
    /// - `pid`: worker pid
    /// - `lifecycle`: the hoisted event
    WorkerMessage,

    /// The channel to a worker was torn down (by either side).
    ///
    /// Sets:
    /// - `pid`: worker pid
    WorkerDisconnected,

    /// A worker process exited and was removed from the cluster.
    ///
    /// Sets:
    /// - `pid`: worker pid
    /// - `reason`: exit description (code or signal)
    WorkerExited,

    // === Sequencer outcomes ===
    /// A worker reported being runnable within its start budget.
    ///
    /// Sets:
    /// - `pid`: worker pid
    WorkerStarted,

    /// A worker did not become runnable in time and was sent `SIGKILL`.
    ///
    /// Sets:
    /// - `pid`: worker pid
    /// - `timeout_ms`: elapsed budget
    StartTimeout,

    /// A worker exited before it became runnable.
    ///
    /// Sets:
    /// - `pid`: worker pid
    UnexpectedExit,

    /// A worker confirmed `stop` (or exited/disconnected, as configured).
    ///
    /// Sets:
    /// - `pid`: worker pid
    WorkerStopped,

    /// A worker did not confirm `stop` in time. It is left running.
    ///
    /// Sets:
    /// - `pid`: worker pid
    /// - `timeout_ms`: elapsed budget
    StopTimeout,

    // === Signal relay ===
    /// A caught signal was queued because a fork is in progress.
    ///
    /// Sets:
    /// - `signal`: caught signal
    SignalQueued,

    /// A signal was forwarded to a worker.
    ///
    /// Sets:
    /// - `pid`: target worker pid
    /// - `signal`: delivered signal (after `SIGTSTP` → `SIGSTOP` translation)
    SignalRelayed,

    /// Queued signals were discarded because the forked worker failed to start.
    ///
    /// Sets:
    /// - `pid`: failed worker pid, if one was created
    /// - `reason`: list of discarded signals
    SignalsDropped,

    // === Replacement ===
    /// A replacement request was appended to the queue.
    ///
    /// Sets:
    /// - `pid`: worker to replace
    ReplaceQueued,

    /// A replacement request reached the head of the queue and is running.
    ///
    /// Sets:
    /// - `pid`: worker to replace
    ReplaceStarted,

    /// The old worker was stopped and the new one is serving.
    ///
    /// Sets:
    /// - `pid`: replaced worker pid
    /// - `replacement`: new worker pid
    ReplaceSucceeded,

    /// The replacement failed; see `reason`.
    ///
    /// Sets:
    /// - `pid`: worker that was to be replaced
    /// - `replacement`: new worker pid, if one was forked
    /// - `reason`: error message
    ReplaceFailed,

    /// The request was rejected without any OS-level action.
    ///
    /// Sets:
    /// - `pid`: target pid
    /// - `reason`: error message (`already being replaced`, `not our child`, ...)
    ReplaceRejected,
}

impl EventKind {
    /// Short stable label (kebab-case) for log lines.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::SubscriberPanicked => "subscriber-panicked",
            EventKind::SubscriberOverflow => "subscriber-overflow",
            EventKind::WorkerForked => "fork",
            EventKind::ForkFailed => "fork-failed",
            EventKind::WorkerMessage => "message",
            EventKind::WorkerDisconnected => "disconnect",
            EventKind::WorkerExited => "exit",
            EventKind::WorkerStarted => "started",
            EventKind::StartTimeout => "start-timeout",
            EventKind::UnexpectedExit => "unexpected-exit",
            EventKind::WorkerStopped => "stopped",
            EventKind::StopTimeout => "stop-timeout",
            EventKind::SignalQueued => "signal-queued",
            EventKind::SignalRelayed => "signal-relayed",
            EventKind::SignalsDropped => "signals-dropped",
            EventKind::ReplaceQueued => "replace-queued",
            EventKind::ReplaceStarted => "replace-started",
            EventKind::ReplaceSucceeded => "replace-succeeded",
            EventKind::ReplaceFailed => "replace-failed",
            EventKind::ReplaceRejected => "replace-rejected",
        }
    }
}

/// Cluster event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Worker the event is about.
    pub pid: Option<u32>,
    /// New worker pid, for replacement events.
    pub replacement: Option<u32>,
    /// Signal caught or delivered.
    pub signal: Option<Signal>,
    /// Hoisted lifecycle event.
    pub lifecycle: Option<LifecycleEvent>,
    /// Elapsed budget in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Human-readable reason (errors, exit status, overflow details).
    pub reason: Option<Arc<str>>,
    /// Subscriber name, for subscriber events.
    pub subscriber: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pid: None,
            replacement: None,
            signal: None,
            lifecycle: None,
            timeout_ms: None,
            reason: None,
            subscriber: None,
        }
    }

    /// Attaches the worker pid.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches the replacement worker pid.
    #[inline]
    pub fn with_replacement(mut self, pid: u32) -> Self {
        self.replacement = Some(pid);
        self
    }

    /// Attaches a signal.
    #[inline]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Attaches a hoisted lifecycle event.
    #[inline]
    pub fn with_lifecycle(mut self, ev: LifecycleEvent) -> Self {
        self.lifecycle = Some(ev);
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Builds the event reporting `err` for the worker it names.
    pub fn from_error(kind: EventKind, err: &ClusterError) -> Self {
        let ev = Event::new(kind).with_reason(err.to_string());
        let ev = match err.pid() {
            Some(pid) => ev.with_pid(pid),
            None => ev,
        };
        match err {
            ClusterError::StartTimeout { timeout, .. }
            | ClusterError::StopTimeout { timeout, .. } => ev.with_timeout(*timeout),
            _ => ev,
        }
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}
