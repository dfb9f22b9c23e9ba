//! # Worker handle: one supervised child process.
//!
//! A [`Worker`] is created by the fork sequencer and shared as [`WorkerRef`].
//! Its state flags are written by the inbound pump and read by the sequencers:
//!
//! ```text
//! inbound pump ──► fire(ev) ──► flags.set ──► broadcast WorkerEvent ──► waiters
//! ```
//!
//! Flags are always updated **before** the event is broadcast, so a waiter that
//! subscribes first and checks flags second never misses a transition.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{ClusterError, TransportError};
use crate::protocol::{self, Hoist, LifecycleEvent};
use crate::transport::{Channel, WorkerExit};

/// Shared handle to a worker.
pub type WorkerRef = Arc<Worker>;

/// Something observed on a worker, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A hoisted lifecycle event (`ready`, `started`, `listening`, `stopped`, ...).
    Lifecycle(LifecycleEvent),
    /// Any decoded inbound message, including the ones also hoisted.
    Message(Arc<Value>),
    /// The channel was torn down.
    Disconnected,
    /// The process exited. Always the last event.
    Exited(WorkerExit),
}

#[derive(Debug, Default)]
struct WorkerState {
    ready: bool,
    started: bool,
    listening: bool,
    stopped: bool,
    disconnected: bool,
    exited: Option<WorkerExit>,
    claimed: bool,
    error: Option<ClusterError>,
}

/// One child process supervised by a [`Cluster`](crate::Cluster).
pub struct Worker {
    pid: u32,
    cluster_id: u64,
    channel: Box<dyn Channel>,
    events: broadcast::Sender<WorkerEvent>,
    state: Mutex<WorkerState>,
}

impl Worker {
    pub(crate) fn new(
        pid: u32,
        cluster_id: u64,
        channel: Box<dyn Channel>,
        capacity: usize,
    ) -> Self {
        let (events, _rx) = broadcast::channel(capacity.max(1));
        Self {
            pid,
            cluster_id,
            channel,
            events,
            state: Mutex::new(WorkerState::default()),
        }
    }

    /// Process id.
    #[inline]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[inline]
    pub(crate) fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    /// Receives every later event observed on this worker.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Sends a lifecycle event (`start`, `stop`, `quit`) with a payload.
    pub fn send(&self, event: LifecycleEvent, payload: Value) -> Result<(), TransportError> {
        self.send_named(event.as_str(), payload)
    }

    /// Sends an arbitrary event name wrapped in the handshake envelope.
    pub fn send_named(&self, name: &str, payload: Value) -> Result<(), TransportError> {
        protocol::send_to(self.channel.as_ref(), self.pid, name, payload)
    }

    /// Sends a raw message without the envelope.
    pub fn send_raw(&self, msg: Value) -> Result<(), TransportError> {
        self.channel.send(msg)
    }

    /// Tears the channel down without killing the process.
    ///
    /// Already disconnected is not an error. Returns `true` if this call disconnected.
    pub fn disconnect(&self) -> bool {
        if !self.channel.disconnect() {
            return false;
        }
        self.mark_disconnected();
        true
    }

    /// True until the channel is torn down from either side.
    pub fn is_connected(&self) -> bool {
        !self.state.lock().disconnected && self.channel.is_connected()
    }

    /// True once the worker reported `ready`.
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// True once the worker reported `started` (or `listening`, when that counts).
    pub fn is_started(&self, started_if_listening: bool) -> bool {
        let st = self.state.lock();
        st.started || (started_if_listening && st.listening)
    }

    /// True once the worker reported `stopped` after the last `stop` request.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Exit status, once the process was reaped.
    pub fn exit_status(&self) -> Option<WorkerExit> {
        self.state.lock().exited
    }

    /// True once the process was reaped.
    pub fn has_exited(&self) -> bool {
        self.state.lock().exited.is_some()
    }

    /// Terminal error recorded by the start-wait, if any.
    pub fn error(&self) -> Option<ClusterError> {
        self.state.lock().error.clone()
    }

    /// True while a replacement of this worker runs, and after it succeeded.
    pub fn is_claimed_for_replace(&self) -> bool {
        self.state.lock().claimed
    }

    /// Start-wait precheck: `Some(true)` runnable, `Some(false)` exited, `None` pending.
    pub(crate) fn start_state(&self, started_if_listening: bool) -> Option<bool> {
        let st = self.state.lock();
        if st.ready || st.started || (started_if_listening && st.listening) {
            Some(true)
        } else if st.exited.is_some() {
            Some(false)
        } else {
            None
        }
    }

    /// Forgets an earlier `stopped` so only a reply to the next `stop` counts.
    pub(crate) fn clear_stopped(&self) {
        self.state.lock().stopped = false;
    }

    pub(crate) fn set_error(&self, err: ClusterError) {
        self.state.lock().error = Some(err);
    }

    pub(crate) fn try_claim(&self) -> bool {
        let mut st = self.state.lock();
        if st.claimed {
            return false;
        }
        st.claimed = true;
        true
    }

    pub(crate) fn release_claim(&self) {
        self.state.lock().claimed = false;
    }

    pub(crate) fn deliver(&self, msg: Value) {
        let _ = self.events.send(WorkerEvent::Message(Arc::new(msg)));
    }

    /// Returns `true` on the first call only.
    pub(crate) fn mark_disconnected(&self) -> bool {
        {
            let mut st = self.state.lock();
            if st.disconnected {
                return false;
            }
            st.disconnected = true;
        }
        let _ = self.events.send(WorkerEvent::Disconnected);
        true
    }

    pub(crate) fn mark_exited(&self, exit: WorkerExit) {
        {
            let mut st = self.state.lock();
            st.exited = Some(exit);
            st.disconnected = true;
        }
        let _ = self.events.send(WorkerEvent::Exited(exit));
    }
}

impl Hoist for Worker {
    fn fire(&self, event: LifecycleEvent) {
        {
            let mut st = self.state.lock();
            match event {
                LifecycleEvent::Ready => st.ready = true,
                LifecycleEvent::Started => st.started = true,
                LifecycleEvent::Listening => st.listening = true,
                LifecycleEvent::Stopped => st.stopped = true,
                LifecycleEvent::Start | LifecycleEvent::Stop | LifecycleEvent::Quit => {}
            }
        }
        let _ = self.events.send(WorkerEvent::Lifecycle(event));
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Worker")
            .field("pid", &self.pid)
            .field("started", &st.started)
            .field("exited", &st.exited)
            .field("claimed", &st.claimed)
            .finish_non_exhaustive()
    }
}
