//! Process and channel plumbing at the OS boundary.
//!
//! The cluster never creates processes or writes to pipes itself; it goes through
//! three seams:
//!
//! - [`Fork`] creates a worker and returns its pid, a [`Channel`] and an inbound stream
//! - [`Channel`] sends one message or tears the channel down
//! - [`Signaller`] delivers signals and probes for process existence
//!
//! [`CommandForker`] and [`OsSignaller`] are the real implementations; tests plug in
//! in-memory ones.
//!
//! ## Inbound stream
//! ```text
//! Forked.inbound ──► Message(json) ... Disconnected? ... Exited(status)
//! ```
//! `Exited` is always last; nothing after it is read.

mod command;
mod lines;
mod signaller;

pub use command::{CommandForker, WORKER_ENV};
pub use signaller::{OsSignaller, Signaller};

pub(crate) use lines::{LineChannel, spawn_reader};

use std::fmt;
use std::io;

use nix::sys::signal::Signal;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Outgoing half of a parent/worker message channel.
pub trait Channel: Send + Sync + 'static {
    /// Sends one message. Fails if the channel is disconnected.
    fn send(&self, msg: Value) -> Result<(), TransportError>;

    /// Tears the channel down without killing the process.
    ///
    /// Returns `true` if this call did the disconnect, `false` if it was already down.
    fn disconnect(&self) -> bool;

    /// True until the channel is disconnected.
    fn is_connected(&self) -> bool;
}

/// Something that arrived from a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A decoded message (not necessarily a handshake envelope).
    Message(Value),
    /// The worker's side of the channel closed.
    Disconnected,
    /// The worker process exited and was reaped.
    Exited(WorkerExit),
}

/// A freshly created worker process.
pub struct Forked {
    /// Process id (positive).
    pub pid: u32,
    /// Channel to the worker.
    pub channel: Box<dyn Channel>,
    /// Messages, disconnect and exit notifications from the worker.
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl fmt::Debug for Forked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forked").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// The process-fork primitive.
///
/// Must be called from within a tokio runtime.
pub trait Fork: Send + Sync + 'static {
    /// Creates one worker process.
    fn fork(&self) -> io::Result<Forked>;
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerExit {
    /// Exit code, if it exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if it was killed.
    pub signal: Option<Signal>,
}

impl WorkerExit {
    /// Normal exit with `code`.
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Killed by `signal`.
    pub fn signaled(signal: Signal) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// True for a normal exit with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for WorkerExit {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            code: status.code(),
            signal: status.signal().and_then(|raw| Signal::try_from(raw).ok()),
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with code {code}"),
            (None, Some(sig)) => write!(f, "killed by {sig}"),
            (None, None) => f.write_str("exited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    #[test]
    fn exit_status_is_decoded() {
        let exited = WorkerExit::from(ExitStatus::from_raw(3 << 8));
        assert_eq!(exited, WorkerExit::code(3));
        assert_eq!(exited.to_string(), "exited with code 3");

        let killed = WorkerExit::from(ExitStatus::from_raw(9));
        assert_eq!(killed, WorkerExit::signaled(Signal::SIGKILL));
        assert!(!killed.success());
        assert!(killed.to_string().contains("SIGKILL"));
    }
}
