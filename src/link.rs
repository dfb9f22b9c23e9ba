//! # Worker side of the channel.
//!
//! A worker process started by [`CommandForker`](crate::CommandForker) talks
//! to its parent over stdin/stdout. [`ParentLink`] wraps that pair, sends
//! envelopes carrying the worker's own pid and hoists `start`/`stop`/`quit`
//! into [`ParentEvent`]s, using the same table as the parent side.
//!
//! ```no_run
//! use forkvisor::{LifecycleEvent, ParentEvent, ParentLink, is_worker};
//! use serde_json::Value;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     if !is_worker() {
//!         return;
//!     }
//!     let link = ParentLink::connect();
//!     let mut events = link.subscribe();
//!     let _ = link.send(LifecycleEvent::Ready, Value::Null);
//!     while let Ok(ev) = events.recv().await {
//!         match ev {
//!             ParentEvent::Lifecycle(LifecycleEvent::Start) => {
//!                 let _ = link.send(LifecycleEvent::Started, Value::Null);
//!             }
//!             ParentEvent::Lifecycle(LifecycleEvent::Stop) => {
//!                 let _ = link.send(LifecycleEvent::Stopped, Value::Null);
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};

use crate::error::TransportError;
use crate::protocol::{self, Hoist, LifecycleEvent};
use crate::transport::{Channel, Inbound, LineChannel, WORKER_ENV, spawn_reader};

/// True if this process was forked as a worker.
pub fn is_worker() -> bool {
    std::env::var_os(WORKER_ENV).is_some_and(|v| v == "1")
}

/// True unless this process was forked as a worker.
pub fn is_master() -> bool {
    !is_worker()
}

/// Something received from the parent.
#[derive(Debug, Clone, PartialEq)]
pub enum ParentEvent {
    /// A hoisted lifecycle event (`start`, `stop`, `quit`).
    Lifecycle(LifecycleEvent),
    /// Any decoded message, including the ones also hoisted.
    Message(Arc<Value>),
    /// The parent closed the channel.
    Disconnected,
}

/// Worker endpoint of the parent/worker channel.
pub struct ParentLink {
    pid: u32,
    channel: LineChannel,
    events: broadcast::Sender<ParentEvent>,
}

impl ParentLink {
    /// Connects over this process' stdin/stdout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect() -> Arc<Self> {
        Self::over(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Connects over an arbitrary reader/writer pair.
    pub fn over<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (events, _rx) = broadcast::channel(64);
        let link = Arc::new(Self {
            pid: std::process::id(),
            channel: LineChannel::spawn(writer),
            events,
        });

        let (tx, mut inbound) = mpsc::unbounded_channel();
        spawn_reader(reader, tx);
        let weak = Arc::downgrade(&link);
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                let Some(link) = weak.upgrade() else { break };
                match msg {
                    Inbound::Message(value) => {
                        protocol::hoist_message(link.as_ref(), &value);
                        let _ = link.events.send(ParentEvent::Message(Arc::new(value)));
                    }
                    Inbound::Disconnected | Inbound::Exited(_) => {
                        let _ = link.events.send(ParentEvent::Disconnected);
                        break;
                    }
                }
            }
        });
        link
    }

    /// This worker's pid, as written into every envelope.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Sends a lifecycle event (`ready`, `started`, `listening`, `stopped`) to the parent.
    pub fn send(&self, event: LifecycleEvent, payload: Value) -> Result<(), TransportError> {
        self.send_named(event.as_str(), payload)
    }

    /// Sends an arbitrary event name wrapped in the handshake envelope.
    pub fn send_named(&self, name: &str, payload: Value) -> Result<(), TransportError> {
        protocol::send_to(&self.channel, self.pid, name, payload)
    }

    /// Receives every later event from the parent.
    pub fn subscribe(&self) -> broadcast::Receiver<ParentEvent> {
        self.events.subscribe()
    }

    /// Stops writing to the parent; already disconnected is fine.
    pub fn disconnect(&self) -> bool {
        self.channel.disconnect()
    }

    /// True until [`ParentLink::disconnect`] or a write failure.
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }
}

impl Hoist for ParentLink {
    fn fire(&self, event: LifecycleEvent) {
        let _ = self.events.send(ParentEvent::Lifecycle(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn hoists_parent_commands_and_sends_envelopes() {
        let (mut parent_write, worker_in) = tokio::io::duplex(1024);
        let (worker_out, parent_read) = tokio::io::duplex(1024);
        let link = ParentLink::over(worker_in, worker_out);
        let mut events = link.subscribe();

        let start = json!({ "v": "qc-1", "pid": link.pid(), "n": "start", "m": null });
        parent_write
            .write_all(format!("{start}\n").as_bytes())
            .await
            .expect("write");

        assert_eq!(
            events.recv().await.ok(),
            Some(ParentEvent::Lifecycle(LifecycleEvent::Start))
        );
        assert_eq!(
            events.recv().await.ok(),
            Some(ParentEvent::Message(Arc::new(start)))
        );

        link.send(LifecycleEvent::Started, json!({ "port": 1337 }))
            .expect("send");
        let mut lines = BufReader::new(parent_read).lines();
        let line = lines.next_line().await.expect("read").expect("line");
        let got: Value = serde_json::from_str(&line).expect("json");
        assert_eq!(
            got,
            json!({ "v": "qc-1", "pid": link.pid(), "n": "started", "m": { "port": 1337 } })
        );
    }

    #[test]
    fn worker_marker_is_read_from_the_environment() {
        // The test harness itself is never forked by a cluster.
        if std::env::var_os(WORKER_ENV).is_none() {
            assert!(is_master());
            assert!(!is_worker());
        }
    }
}
