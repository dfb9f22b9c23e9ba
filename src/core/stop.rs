//! # Stop sequencer.
//!
//! ```text
//! stop_child(worker)
//!   ├─ subscribe, forget any earlier `stopped`
//!   ├─ send `stop`                  (send failure is not fatal: exit still counts)
//!   ├─ disconnect                   (if disconnect_if_stop)
//!   └─ first of
//!        stopped | exit | disconnect (if stopped_if_disconnect)  ─► Ok
//!        stop_timeout                                            ─► StopTimeout, worker left running
//! ```

use serde_json::Value;

use super::cluster::Cluster;
use super::wait;
use super::worker::{WorkerEvent, WorkerRef};
use crate::error::ClusterError;
use crate::events::{Event, EventKind};
use crate::protocol::LifecycleEvent;

impl Cluster {
    /// Asks `worker` to stop accepting work and waits for its confirmation.
    ///
    /// On timeout the worker keeps running; kill it with [`Cluster::kill_child`]
    /// if needed.
    pub async fn stop_child(&self, worker: &WorkerRef) -> Result<(), ClusterError> {
        let pid = worker.pid();
        let budget = self.cfg.stop_timeout();
        let if_disconnect = self.cfg.stopped_if_disconnect;
        let mut rx = worker.subscribe();
        worker.clear_stopped();

        if let Err(e) = worker.send(LifecycleEvent::Stop, Value::Null) {
            tracing::debug!(pid, error = %e, "cannot send stop");
        }
        if self.cfg.disconnect_if_stop {
            worker.disconnect();
        }

        let stopped = wait::until(
            &mut rx,
            budget,
            || {
                let done = worker.is_stopped()
                    || worker.has_exited()
                    || (if_disconnect && !worker.is_connected());
                done.then_some(())
            },
            |ev| match ev {
                WorkerEvent::Lifecycle(LifecycleEvent::Stopped) | WorkerEvent::Exited(_) => {
                    Some(())
                }
                WorkerEvent::Disconnected if if_disconnect => Some(()),
                _ => None,
            },
        )
        .await;

        match stopped {
            Some(()) => {
                tracing::debug!(pid, "worker stopped");
                self.bus
                    .publish(Event::new(EventKind::WorkerStopped).with_pid(pid));
                Ok(())
            }
            None => {
                tracing::warn!(pid, ?budget, "worker failed to stop in time");
                let err = ClusterError::StopTimeout {
                    pid,
                    timeout: budget,
                };
                self.bus
                    .publish(Event::from_error(EventKind::StopTimeout, &err));
                Err(err)
            }
        }
    }
}
