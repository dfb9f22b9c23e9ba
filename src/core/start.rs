//! # Fork/start sequencer.
//!
//! ```text
//! fork_child()
//!   ├─ forking = true                       (signals now queue)
//!   ├─ Fork::fork()            ── Err ──► forking = false, drop queue, ForkFailed
//!   ├─ Worker::new, subscribe start-wait receiver
//!   ├─ workers.push, publish WorkerForked   (visible before it started)
//!   ├─ spawn inbound pump
//!   └─ spawn start-wait ─► finish_fork ─► oneshot ─► PendingStart::started()
//!
//! start-wait: first of
//!   ready | started | listening (if configured)  ─► Ok
//!   exit                                         ─► UnexpectedExit
//!   start_timeout                                ─► SIGKILL, StartTimeout
//!
//! finish_fork:
//!   forking = false, take queue
//!   Ok  ─► relay queued signals to the new worker only
//!   Err ─► SIGKILL the new worker, queued signals dropped
//! ```

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::cluster::Cluster;
use super::wait;
use super::worker::{Worker, WorkerEvent, WorkerRef};
use crate::error::ClusterError;
use crate::events::{Event, EventKind};
use crate::protocol::{self, LifecycleEvent};
use crate::transport::{Forked, Inbound};

/// A forked worker whose start-wait is still running.
///
/// The worker is already tracked by the cluster; dropping this value does not
/// cancel the start-wait.
#[derive(Debug)]
pub struct PendingStart {
    worker: WorkerRef,
    outcome: oneshot::Receiver<Result<(), ClusterError>>,
}

impl PendingStart {
    /// The new worker.
    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    /// Pid of the new worker.
    pub fn pid(&self) -> u32 {
        self.worker.pid()
    }

    /// Waits for the start-wait outcome and returns the worker with it.
    pub async fn wait(self) -> (WorkerRef, Result<(), ClusterError>) {
        let res = self.outcome.await.unwrap_or(Err(ClusterError::Abandoned));
        (self.worker, res)
    }

    /// Waits until the worker is runnable.
    pub async fn started(self) -> Result<WorkerRef, ClusterError> {
        let (worker, res) = self.wait().await;
        res.map(|()| worker)
    }
}

impl Cluster {
    /// Forks a new worker and starts its start-wait.
    ///
    /// Fails synchronously only when the fork primitive fails; every later
    /// outcome is delivered through [`PendingStart`].
    pub fn fork_child(self: &Arc<Self>) -> Result<PendingStart, ClusterError> {
        self.state.lock().forking = true;

        let Forked {
            pid,
            channel,
            inbound,
        } = match self.forker.fork() {
            Ok(forked) => forked,
            Err(e) => {
                let dropped = self.close_fork_window();
                self.report_dropped(None, &dropped);
                let err = ClusterError::ForkFailed {
                    reason: e.to_string(),
                };
                tracing::warn!(error = %e, "unable to fork");
                self.bus
                    .publish(Event::from_error(EventKind::ForkFailed, &err));
                return Err(err);
            }
        };

        let worker = Arc::new(Worker::new(
            pid,
            self.id,
            channel,
            self.cfg.worker_event_capacity_clamped(),
        ));
        let rx = worker.subscribe();

        self.state.lock().workers.push(Arc::clone(&worker));
        tracing::debug!(pid, "forked new worker");
        self.bus
            .publish(Event::new(EventKind::WorkerForked).with_pid(pid));
        self.spawn_pump(&worker, inbound);

        let (tx, outcome) = oneshot::channel();
        let cluster = Arc::clone(self);
        let w = Arc::clone(&worker);
        tokio::spawn(async move {
            let res = cluster
                .await_start(&w, rx, cluster.cfg.start_timeout())
                .await;
            cluster.finish_fork(&w, res.is_ok());
            let _ = tx.send(res);
        });

        Ok(PendingStart { worker, outcome })
    }

    /// Waits for `worker` to become runnable, at most `timeout` (default: `start_timeout`).
    ///
    /// On timeout the worker is killed with `SIGKILL`. Usable on any handle,
    /// including one that already started (resolves immediately).
    pub async fn start_child(
        &self,
        worker: &WorkerRef,
        timeout: Option<Duration>,
    ) -> Result<(), ClusterError> {
        let rx = worker.subscribe();
        let budget = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or_else(|| self.cfg.start_timeout());
        self.await_start(worker, rx, budget).await
    }

    async fn await_start(
        &self,
        worker: &Worker,
        mut rx: broadcast::Receiver<WorkerEvent>,
        budget: Duration,
    ) -> Result<(), ClusterError> {
        let if_listening = self.cfg.started_if_listening;
        let outcome = wait::until(
            &mut rx,
            budget,
            || worker.start_state(if_listening),
            |ev| match ev {
                WorkerEvent::Lifecycle(LifecycleEvent::Ready | LifecycleEvent::Started) => {
                    Some(true)
                }
                WorkerEvent::Lifecycle(LifecycleEvent::Listening) if if_listening => Some(true),
                WorkerEvent::Exited(_) => Some(false),
                _ => None,
            },
        )
        .await;

        let pid = worker.pid();
        let err = match outcome {
            Some(true) => {
                self.bus
                    .publish(Event::new(EventKind::WorkerStarted).with_pid(pid));
                return Ok(());
            }
            Some(false) => {
                let err = ClusterError::UnexpectedExit { pid };
                self.bus
                    .publish(Event::from_error(EventKind::UnexpectedExit, &err));
                err
            }
            None => {
                tracing::warn!(pid, ?budget, "worker failed to start in time");
                self.kill_child(worker, Signal::SIGKILL);
                let err = ClusterError::StartTimeout {
                    pid,
                    timeout: budget,
                };
                self.bus
                    .publish(Event::from_error(EventKind::StartTimeout, &err));
                err
            }
        };
        worker.set_error(err.clone());
        Err(err)
    }

    fn finish_fork(&self, worker: &Worker, started: bool) {
        let signals = self.close_fork_window();
        if started {
            self.relay_to(&signals, std::slice::from_ref(&worker));
        } else {
            self.report_dropped(Some(worker.pid()), &signals);
            self.kill_child(worker, Signal::SIGKILL);
        }
    }

    /// Clears the forking flag and takes the queued signals.
    fn close_fork_window(&self) -> Vec<Signal> {
        let mut st = self.state.lock();
        st.forking = false;
        std::mem::take(&mut st.signal_queue)
    }

    fn report_dropped(&self, pid: Option<u32>, signals: &[Signal]) {
        if signals.is_empty() {
            return;
        }
        let names: Vec<&str> = signals.iter().map(|s| s.as_str()).collect();
        let ev = Event::new(EventKind::SignalsDropped).with_reason(names.join(","));
        self.bus.publish(match pid {
            Some(pid) => ev.with_pid(pid),
            None => ev,
        });
    }

    /// Routes inbound traffic of one worker until it exits.
    fn spawn_pump(
        self: &Arc<Self>,
        worker: &WorkerRef,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
    ) {
        let cluster = Arc::downgrade(self);
        let bus = self.bus.clone();
        let worker = Arc::clone(worker);

        tokio::spawn(async move {
            let pid = worker.pid();
            while let Some(msg) = inbound.recv().await {
                match msg {
                    Inbound::Message(value) => {
                        if let Some(ev) = protocol::hoist_message(worker.as_ref(), &value) {
                            bus.publish(
                                Event::new(EventKind::WorkerMessage)
                                    .with_pid(pid)
                                    .with_lifecycle(ev),
                            );
                        }
                        worker.deliver(value);
                    }
                    Inbound::Disconnected => {
                        if worker.mark_disconnected() {
                            bus.publish(Event::new(EventKind::WorkerDisconnected).with_pid(pid));
                        }
                    }
                    Inbound::Exited(exit) => {
                        if let Some(cluster) = cluster.upgrade() {
                            cluster.remove_pid(pid);
                        }
                        tracing::debug!(pid, %exit, "worker exited");
                        worker.mark_exited(exit);
                        bus.publish(
                            Event::new(EventKind::WorkerExited)
                                .with_pid(pid)
                                .with_reason(exit.to_string()),
                        );
                        break;
                    }
                }
            }
        });
    }
}
