//! # Cluster configuration.
//!
//! Provides [`ClusterConfig`] centralized settings consumed once, when a
//! [`Cluster`](crate::Cluster) is built.
//!
//! ## Sentinel values
//! - `start_timeout = 0s` → default (30s)
//! - `stop_timeout = 0s` → default (20s)
//! - `cluster_size = 0` → [`Cluster::launch`](crate::Cluster::launch) forks nothing

use std::time::Duration;

use nix::sys::signal::Signal;

const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(20);

/// Configuration for a worker cluster.
///
/// ## Field semantics
/// - `start_timeout`: budget for a new worker to report `ready`/`started`/`listening`
/// - `stop_timeout`: budget for a worker to confirm `stop`
/// - `started_if_listening`: whether `listening` alone counts as started
/// - `disconnect_if_stop`: cut the channel right after sending `stop`
/// - `stopped_if_disconnect`: whether a channel disconnect confirms `stop`
/// - `signals_to_relay`: signals caught by the supervisor and forwarded to workers
///
/// All fields are public; prefer the helper accessors over checking sentinels inline.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Maximum wait for a freshly forked worker to become runnable.
    ///
    /// On expiry the worker is killed with `SIGKILL`.
    pub start_timeout: Duration,

    /// Maximum wait for a worker to confirm `stop`.
    ///
    /// On expiry the worker is left running; the caller decides whether to kill it.
    pub stop_timeout: Duration,

    /// Treat a `listening` report as "started".
    pub started_if_listening: bool,

    /// Disconnect the channel to a worker immediately after telling it to stop.
    ///
    /// Guarantees no more work is dispatched to it, at the cost of no longer
    /// hearing its `stopped` acknowledgement. A replacement whose old worker
    /// then times out on stop keeps the new worker.
    pub disconnect_if_stop: bool,

    /// Treat a channel disconnect as a stop confirmation.
    pub stopped_if_disconnect: bool,

    /// Signals to catch and relay to every worker.
    ///
    /// `SIGKILL` and `SIGSTOP` cannot be caught and are ignored here.
    pub signals_to_relay: Vec<Signal>,

    /// Number of workers forked by [`Cluster::launch`](crate::Cluster::launch).
    pub cluster_size: usize,

    /// Install the signal relays in [`Cluster::launch`](crate::Cluster::launch).
    pub handle_signals: bool,

    /// Capacity of the cluster event bus ring buffer (min 1).
    pub bus_capacity: usize,

    /// Capacity of each worker's lifecycle event channel (min 1).
    pub worker_event_capacity: usize,
}

impl ClusterConfig {
    /// Returns the effective start timeout (`0s` means the 30s default).
    #[inline]
    pub fn start_timeout(&self) -> Duration {
        if self.start_timeout.is_zero() {
            DEFAULT_START_TIMEOUT
        } else {
            self.start_timeout
        }
    }

    /// Returns the effective stop timeout (`0s` means the 20s default).
    #[inline]
    pub fn stop_timeout(&self) -> Duration {
        if self.stop_timeout.is_zero() {
            DEFAULT_STOP_TIMEOUT
        } else {
            self.stop_timeout
        }
    }

    /// Returns the relay set without uncatchable signals and without duplicates.
    pub fn relayable_signals(&self) -> Vec<Signal> {
        let mut out: Vec<Signal> = Vec::with_capacity(self.signals_to_relay.len());
        for sig in &self.signals_to_relay {
            if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) || out.contains(sig) {
                continue;
            }
            out.push(*sig);
        }
        out
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns a per-worker event capacity clamped to a minimum of 1.
    #[inline]
    pub fn worker_event_capacity_clamped(&self) -> usize {
        self.worker_event_capacity.max(1)
    }
}

impl Default for ClusterConfig {
    /// Default configuration:
    ///
    /// - `start_timeout = 30s`, `stop_timeout = 20s`
    /// - `started_if_listening = true`
    /// - `disconnect_if_stop = false`, `stopped_if_disconnect = false`
    /// - `signals_to_relay = [SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2, SIGTSTP, SIGCONT]`
    /// - `cluster_size = 0`, `handle_signals = true`
    /// - `bus_capacity = 1024`, `worker_event_capacity = 64`
    fn default() -> Self {
        Self {
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            started_if_listening: true,
            disconnect_if_stop: false,
            stopped_if_disconnect: false,
            signals_to_relay: vec![
                Signal::SIGHUP,
                Signal::SIGINT,
                Signal::SIGTERM,
                Signal::SIGUSR1,
                Signal::SIGUSR2,
                Signal::SIGTSTP,
                Signal::SIGCONT,
            ],
            cluster_size: 0,
            handle_signals: true,
            bus_capacity: 1024,
            worker_event_capacity: 64,
        }
    }
}
