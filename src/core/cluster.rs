//! # Cluster: owns the workers, the signal queue and the replacement queue.
//!
//! The [`Cluster`] is the façade of the crate. Sequencers live in sibling modules
//! as further `impl Cluster` blocks:
//!
//! - `start`: fork, inbound pump, start-wait
//! - `stop`: stop handshake
//! - `relay`: OS signal handlers, queueing while forking
//! - `replace`: serialized replacement loop
//!
//! ## State
//! ```text
//! ClusterState (one short-lived lock, never held across .await)
//!   workers        Vec<WorkerRef>        fork order; removed on exit
//!   forking        bool                  single outstanding fork window
//!   signal_queue   Vec<Signal>           filled only while forking
//!   replace_queue  VecDeque<request>     FIFO, drained one at a time
//!   replacing      bool                  a drain loop is running
//!   relays         Option<token>         signal handlers installed
//! ```
//!
//! ## Example
//! ```no_run
//! use forkvisor::{Cluster, ClusterConfig, CommandForker, LifecycleEvent};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = ClusterConfig { cluster_size: 2, ..ClusterConfig::default() };
//!     let cluster = Cluster::builder(cfg)
//!         .with_forker(CommandForker::new("/usr/local/bin/my-worker"))
//!         .build();
//!
//!     cluster.launch().await?;
//!     if let Some(old) = cluster.workers().first().cloned() {
//!         let new = cluster.replace_child(&old).await?;
//!         println!("replaced #{} with #{}", old.pid(), new.pid());
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use super::builder::ClusterBuilder;
use super::config::ClusterConfig;
use super::worker::{Worker, WorkerRef};
use crate::error::ClusterError;
use crate::events::{Bus, Event};
use crate::protocol::LifecycleEvent;
use crate::subscribers::SubscriberSet;
use crate::transport::{Fork, Signaller};

static CLUSTER_IDS: AtomicU64 = AtomicU64::new(1);

pub(super) struct ReplaceRequest {
    pub(super) worker: WorkerRef,
    pub(super) reply: oneshot::Sender<Result<WorkerRef, ClusterError>>,
}

#[derive(Default)]
pub(super) struct ClusterState {
    pub(super) workers: Vec<WorkerRef>,
    pub(super) forking: bool,
    pub(super) signal_queue: Vec<Signal>,
    pub(super) replace_queue: VecDeque<ReplaceRequest>,
    pub(super) replacing: bool,
    pub(super) relays: Option<CancellationToken>,
}

/// A pool of worker processes with handshake-driven start/stop, signal relay
/// and serialized zero-downtime replacement.
///
/// Always used as `Arc<Cluster>`; see [`Cluster::builder`].
pub struct Cluster {
    pub(super) id: u64,
    pub(super) cfg: ClusterConfig,
    pub(super) bus: Bus,
    pub(super) forker: Arc<dyn Fork>,
    pub(super) signaller: Arc<dyn Signaller>,
    pub(super) state: Mutex<ClusterState>,
    pub(super) subs: Option<Arc<SubscriberSet>>,
}

impl Cluster {
    /// Starts building a cluster with the given configuration.
    pub fn builder(cfg: ClusterConfig) -> ClusterBuilder {
        ClusterBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: ClusterConfig,
        bus: Bus,
        forker: Arc<dyn Fork>,
        signaller: Arc<dyn Signaller>,
        subs: Option<Arc<SubscriberSet>>,
    ) -> Self {
        Self {
            id: CLUSTER_IDS.fetch_add(1, Ordering::Relaxed),
            cfg,
            bus,
            forker,
            signaller,
            state: Mutex::new(ClusterState::default()),
            subs,
        }
    }

    /// Installs signal relays (unless disabled), forks `cluster_size` workers
    /// concurrently, waits for all of them and then tells every worker to `start`.
    ///
    /// Returns the first start error, if any. Workers that did start are kept.
    pub async fn launch(self: &Arc<Self>) -> Result<(), ClusterError> {
        if self.cfg.handle_signals {
            self.handle_signals()?;
        }
        if self.cfg.cluster_size == 0 {
            return Ok(());
        }

        let mut pending = Vec::with_capacity(self.cfg.cluster_size);
        let mut first_err = None;
        for _ in 0..self.cfg.cluster_size {
            match self.fork_child() {
                Ok(p) => pending.push(p.started()),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        for res in join_all(pending).await {
            if let Err(e) = res {
                first_err.get_or_insert(e);
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        for worker in self.workers() {
            if let Err(e) = worker.send(LifecycleEvent::Start, Value::Null) {
                tracing::debug!(pid = worker.pid(), error = %e, "cannot send start");
            }
        }
        Ok(())
    }

    /// Configuration this cluster was built with.
    pub fn config(&self) -> &ClusterConfig {
        &self.cfg
    }

    /// Receives every later cluster event.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Snapshot of the tracked workers, in fork order.
    pub fn workers(&self) -> Vec<WorkerRef> {
        self.state.lock().workers.clone()
    }

    /// Number of tracked workers.
    pub fn len(&self) -> usize {
        self.state.lock().workers.len()
    }

    /// True if no worker is tracked.
    pub fn is_empty(&self) -> bool {
        self.state.lock().workers.is_empty()
    }

    /// Finds a tracked worker by pid.
    pub fn find_pid(&self, pid: u32) -> Option<WorkerRef> {
        self.state
            .lock()
            .workers
            .iter()
            .find(|w| w.pid() == pid)
            .cloned()
    }

    /// True if `worker` was forked by this cluster (tracked or not).
    pub fn owns(&self, worker: &Worker) -> bool {
        worker.cluster_id() == self.id
    }

    pub(super) fn remove_pid(&self, pid: u32) {
        self.state.lock().workers.retain(|w| w.pid() != pid);
    }

    /// Sends `signal` to the worker. Failures (already gone, no permission) are ignored.
    pub fn kill_child(&self, worker: &Worker, signal: Signal) {
        if worker.pid() == 0 {
            return;
        }
        if let Err(e) = self.signaller.kill(worker.pid(), signal) {
            tracing::debug!(pid = worker.pid(), %signal, error = %e, "kill ignored");
        }
    }

    /// Sends `SIGTERM` to the worker.
    pub fn terminate_child(&self, worker: &Worker) {
        self.kill_child(worker, Signal::SIGTERM);
    }

    /// True if a process with `pid` exists and can be signalled.
    pub fn exists_process(&self, pid: u32) -> bool {
        self.signaller.probe(pid)
    }

    /// Tears down the channel to `worker`; already disconnected is fine.
    pub fn disconnect_from(&self, worker: &Worker) {
        worker.disconnect();
    }

    /// True while a fork's start-wait is outstanding.
    pub fn is_forking(&self) -> bool {
        self.state.lock().forking
    }

    /// Signals caught during the current fork window, in arrival order.
    pub fn queued_signals(&self) -> Vec<Signal> {
        self.state.lock().signal_queue.clone()
    }

    /// Number of replacement requests not yet dequeued.
    pub fn pending_replacements(&self) -> usize {
        self.state.lock().replace_queue.len()
    }

    /// True while the replacement loop runs.
    pub fn is_replacing(&self) -> bool {
        self.state.lock().replacing
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("workers", &st.workers.len())
            .field("forking", &st.forking)
            .field("replacing", &st.replacing)
            .field("subscribers", &self.subs.as_ref().map_or(0, |s| s.len()))
            .finish_non_exhaustive()
    }
}
