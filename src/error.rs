//! Error types used by the forkvisor runtime and its transports.
//!
//! This module defines two enums:
//!
//! - [`ClusterError`]: outcomes of the fork/start/stop/replace sequencers.
//! - [`TransportError`]: failures of a single send over a parent/worker channel.
//!
//! Both provide `as_label` for logs/metrics. Every sequencer resolves its caller
//! with exactly one of these, never leaving it pending.

use std::time::Duration;

use nix::sys::signal::Signal;
use thiserror::Error;

/// # Errors produced by the cluster sequencers.
///
/// The `Display` text of each variant contains a stable phrase
/// (`"unable to fork"`, `"start timeout"`, ...) so that callers matching on
/// messages keep working across field changes.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The fork primitive did not produce a process.
    #[error("unable to fork: {reason}")]
    ForkFailed {
        /// Underlying OS or transport error message.
        reason: String,
    },

    /// The worker did not report `ready`/`started`/`listening` in time and was killed.
    #[error("start timeout: worker #{pid} not runnable after {timeout:?}")]
    StartTimeout {
        /// Worker process id.
        pid: u32,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The worker exited before it reported being runnable.
    #[error("unexpected exit: worker #{pid} exited before it was runnable")]
    UnexpectedExit {
        /// Worker process id.
        pid: u32,
    },

    /// The worker did not confirm `stop` in time. It is left running.
    #[error("stop timeout: worker #{pid} did not stop within {timeout:?}")]
    StopTimeout {
        /// Worker process id.
        pid: u32,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A replacement for this worker is already in flight (or already done).
    #[error("already being replaced: worker #{pid}")]
    AlreadyBeingReplaced {
        /// Worker process id.
        pid: u32,
    },

    /// The handle does not belong to this cluster.
    #[error("not our child: worker #{pid}")]
    NotOurChild {
        /// Worker process id.
        pid: u32,
    },

    /// A queued replacement was removed with `cancel_replace` before it ran.
    #[error("replace cancelled: worker #{pid}")]
    ReplaceCancelled {
        /// Worker process id.
        pid: u32,
    },

    /// Installing an OS signal handler failed.
    #[error("cannot install handler for {signal}: {reason}")]
    SignalInstall {
        /// The signal whose handler could not be registered.
        signal: Signal,
        /// Underlying OS error message.
        reason: String,
    },

    /// The background task owning the outcome was dropped (runtime shutting down).
    #[error("operation abandoned before an outcome was known")]
    Abandoned,
}

impl ClusterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use forkvisor::ClusterError;
    ///
    /// let err = ClusterError::UnexpectedExit { pid: 42 };
    /// assert_eq!(err.as_label(), "unexpected_exit");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ClusterError::ForkFailed { .. } => "fork_failed",
            ClusterError::StartTimeout { .. } => "start_timeout",
            ClusterError::UnexpectedExit { .. } => "unexpected_exit",
            ClusterError::StopTimeout { .. } => "stop_timeout",
            ClusterError::AlreadyBeingReplaced { .. } => "already_being_replaced",
            ClusterError::NotOurChild { .. } => "not_our_child",
            ClusterError::ReplaceCancelled { .. } => "replace_cancelled",
            ClusterError::SignalInstall { .. } => "signal_install",
            ClusterError::Abandoned => "abandoned",
        }
    }

    /// Returns the pid of the worker the error is about, if any.
    pub fn pid(&self) -> Option<u32> {
        match self {
            ClusterError::StartTimeout { pid, .. }
            | ClusterError::UnexpectedExit { pid }
            | ClusterError::StopTimeout { pid, .. }
            | ClusterError::AlreadyBeingReplaced { pid }
            | ClusterError::NotOurChild { pid }
            | ClusterError::ReplaceCancelled { pid } => Some(*pid),
            ClusterError::ForkFailed { .. }
            | ClusterError::SignalInstall { .. }
            | ClusterError::Abandoned => None,
        }
    }

    /// True for the errors after which the worker was (or will be) force-killed.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            ClusterError::StartTimeout { .. } | ClusterError::UnexpectedExit { .. }
        )
    }
}

/// # Errors produced by a channel send.
///
/// Returned synchronously to the caller of `send`; never raised later.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel was disconnected or the peer is gone.
    #[error("channel disconnected")]
    Disconnected,

    /// The message could not be encoded.
    #[error("cannot encode message: {reason}")]
    Encode {
        /// Encoder error message.
        reason: String,
    },
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Disconnected => "transport_disconnected",
            TransportError::Encode { .. } => "transport_encode",
        }
    }
}
