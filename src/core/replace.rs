//! # Replacement engine.
//!
//! Requests are queued FIFO and processed strictly one at a time by a single
//! drain loop per cluster:
//!
//! ```text
//! replace_child(old) ─► queue.push_back ─► (spawn drain loop if idle)
//!
//! drain loop:
//!   pop ─► old already claimed? ─► AlreadyBeingReplaced (no OS action)
//!       └► claim old ─► do_replace(old)
//!                          ├─ fork_child + start-wait   ── Err ─► old untouched
//!                          ├─ send `start` to new
//!                          ├─ wait started | listening  ── Err ─► SIGKILL new
//!                          └─ stop_child(old)
//!                                ├─ Ok                       ─► new
//!                                ├─ Err, disconnect_if_stop  ─► new (old channel is cut)
//!                                └─ Err                      ─► SIGKILL new, error
//!          Ok  ─► old stays claimed (later requests for it are rejected)
//!          Err ─► claim released
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use nix::sys::signal::Signal;
use serde_json::Value;
use tokio::sync::oneshot;

use super::cluster::{Cluster, ReplaceRequest};
use super::wait;
use super::worker::{WorkerEvent, WorkerRef};
use crate::error::ClusterError;
use crate::events::{Event, EventKind};
use crate::protocol::LifecycleEvent;

/// Outcome of one [`Cluster::replace_child`] request.
///
/// The request is queued when the ticket is created; awaiting the ticket is
/// optional. Resolves with the new worker or with the reason the old one is
/// still serving.
#[must_use = "the replacement runs anyway; await the ticket to learn its outcome"]
#[derive(Debug)]
pub struct ReplaceTicket {
    pid: u32,
    inner: TicketInner,
}

#[derive(Debug)]
enum TicketInner {
    Ready(Option<Result<WorkerRef, ClusterError>>),
    Waiting(oneshot::Receiver<Result<WorkerRef, ClusterError>>),
}

impl ReplaceTicket {
    fn ready(pid: u32, res: Result<WorkerRef, ClusterError>) -> Self {
        Self {
            pid,
            inner: TicketInner::Ready(Some(res)),
        }
    }

    /// Pid of the worker to be replaced.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Future for ReplaceTicket {
    type Output = Result<WorkerRef, ClusterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            TicketInner::Ready(res) => {
                Poll::Ready(res.take().unwrap_or(Err(ClusterError::Abandoned)))
            }
            TicketInner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or(Err(ClusterError::Abandoned))),
        }
    }
}

struct ReplaceFailure {
    err: ClusterError,
    replacement: Option<u32>,
}

impl Cluster {
    /// Queues the replacement of `worker` by a newly forked one.
    ///
    /// Handles from another cluster are rejected with `NotOurChild` before any
    /// OS action. Must be called from within a tokio runtime.
    pub fn replace_child(self: &Arc<Self>, worker: &WorkerRef) -> ReplaceTicket {
        let pid = worker.pid();
        if pid == 0 || !self.owns(worker) {
            let err = ClusterError::NotOurChild { pid };
            self.bus
                .publish(Event::from_error(EventKind::ReplaceRejected, &err));
            return ReplaceTicket::ready(pid, Err(err));
        }

        let (reply, rx) = oneshot::channel();
        let start_loop = {
            let mut st = self.state.lock();
            st.replace_queue.push_back(ReplaceRequest {
                worker: Arc::clone(worker),
                reply,
            });
            !std::mem::replace(&mut st.replacing, true)
        };
        self.bus
            .publish(Event::new(EventKind::ReplaceQueued).with_pid(pid));

        if start_loop {
            let cluster = Arc::clone(self);
            tokio::spawn(async move { cluster.drain_replacements().await });
        }
        ReplaceTicket {
            pid,
            inner: TicketInner::Waiting(rx),
        }
    }

    /// Removes every queued, not yet started request for `worker`.
    ///
    /// Their tickets resolve with `ReplaceCancelled`. A replacement already in
    /// flight is not affected. Returns the number of removed requests.
    pub fn cancel_replace(&self, worker: &WorkerRef) -> usize {
        let removed = {
            let mut st = self.state.lock();
            let (gone, kept): (Vec<ReplaceRequest>, Vec<ReplaceRequest>) =
                std::mem::take(&mut st.replace_queue)
                    .into_iter()
                    .partition(|r| Arc::ptr_eq(&r.worker, worker));
            st.replace_queue = kept.into();
            gone
        };
        let n = removed.len();
        for req in removed {
            let _ = req.reply.send(Err(ClusterError::ReplaceCancelled {
                pid: worker.pid(),
            }));
        }
        n
    }

    /// True if a request for `worker` is still queued.
    pub fn is_being_replaced(&self, worker: &WorkerRef) -> bool {
        self.state
            .lock()
            .replace_queue
            .iter()
            .any(|r| Arc::ptr_eq(&r.worker, worker))
    }

    async fn drain_replacements(self: Arc<Self>) {
        loop {
            let ReplaceRequest { worker, reply } = {
                let mut st = self.state.lock();
                match st.replace_queue.pop_front() {
                    Some(req) => req,
                    None => {
                        st.replacing = false;
                        return;
                    }
                }
            };
            let pid = worker.pid();

            if !worker.try_claim() {
                let err = ClusterError::AlreadyBeingReplaced { pid };
                self.bus
                    .publish(Event::from_error(EventKind::ReplaceRejected, &err));
                let _ = reply.send(Err(err));
                continue;
            }

            tracing::debug!(pid, "replacing worker");
            self.bus
                .publish(Event::new(EventKind::ReplaceStarted).with_pid(pid));

            let res = match self.do_replace(&worker).await {
                Ok(new) => {
                    tracing::debug!(pid, new = new.pid(), "replaced worker");
                    self.bus.publish(
                        Event::new(EventKind::ReplaceSucceeded)
                            .with_pid(pid)
                            .with_replacement(new.pid()),
                    );
                    Ok(new)
                }
                Err(ReplaceFailure { err, replacement }) => {
                    worker.release_claim();
                    tracing::warn!(pid, ?replacement, error = %err, "could not replace worker");
                    let ev = Event::new(EventKind::ReplaceFailed)
                        .with_pid(pid)
                        .with_reason(err.to_string());
                    self.bus.publish(match replacement {
                        Some(new) => ev.with_replacement(new),
                        None => ev,
                    });
                    Err(err)
                }
            };
            let _ = reply.send(res);
            tokio::task::yield_now().await;
        }
    }

    async fn do_replace(self: &Arc<Self>, old: &WorkerRef) -> Result<WorkerRef, ReplaceFailure> {
        let pending = self.fork_child().map_err(|err| ReplaceFailure {
            err,
            replacement: None,
        })?;
        let new = Arc::clone(pending.worker());
        let new_pid = new.pid();
        let fail = move |err| ReplaceFailure {
            err,
            replacement: Some(new_pid),
        };
        let mut rx = new.subscribe();

        pending.started().await.map_err(fail)?;

        // Workers that announce `listening` on their own ignore `start`.
        if let Err(e) = new.send(LifecycleEvent::Start, Value::Null) {
            tracing::debug!(pid = new_pid, error = %e, "cannot send start");
        }

        let if_listening = self.cfg.started_if_listening;
        let budget = self.cfg.start_timeout();
        let running = wait::until(
            &mut rx,
            budget,
            || {
                if new.is_started(if_listening) {
                    Some(true)
                } else if new.has_exited() {
                    Some(false)
                } else {
                    None
                }
            },
            |ev| match ev {
                WorkerEvent::Lifecycle(LifecycleEvent::Started) => Some(true),
                WorkerEvent::Lifecycle(LifecycleEvent::Listening) if if_listening => Some(true),
                WorkerEvent::Exited(_) => Some(false),
                _ => None,
            },
        )
        .await;
        match running {
            Some(true) => {}
            Some(false) => return Err(fail(ClusterError::UnexpectedExit { pid: new_pid })),
            None => {
                self.kill_child(&new, Signal::SIGKILL);
                return Err(fail(ClusterError::StartTimeout {
                    pid: new_pid,
                    timeout: budget,
                }));
            }
        }

        match self.stop_child(old).await {
            Ok(()) => Ok(new),
            Err(err) if self.cfg.disconnect_if_stop => {
                tracing::warn!(
                    pid = old.pid(),
                    error = %err,
                    "old worker disconnected but not stopped; keeping new worker"
                );
                Ok(new)
            }
            Err(err) => {
                self.kill_child(&new, Signal::SIGKILL);
                Err(fail(err))
            }
        }
    }
}
