//! # Signal delivery.
//!
//! [`Signaller`] is the `kill(2)` seam. [`OsSignaller`] uses `nix`.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Delivers signals to processes by pid.
pub trait Signaller: Send + Sync + 'static {
    /// Sends `signal` to `pid`.
    fn kill(&self, pid: u32, signal: Signal) -> nix::Result<()>;

    /// True if a process with `pid` exists and may be signalled.
    fn probe(&self, pid: u32) -> bool;
}

/// Real `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSignaller;

fn as_pid(pid: u32) -> nix::Result<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(Errno::ESRCH),
    }
}

impl Signaller for OsSignaller {
    fn kill(&self, pid: u32, sig: Signal) -> nix::Result<()> {
        signal::kill(as_pid(pid)?, sig)
    }

    fn probe(&self, pid: u32) -> bool {
        as_pid(pid)
            .and_then(|pid| signal::kill(pid, None))
            .is_ok()
    }
}
