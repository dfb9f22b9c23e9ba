//! Handshake protocol: envelope, lifecycle vocabulary, send and hoist.
//!
//! The same table is used on both sides of a channel: the parent hoists
//! `ready`/`started`/`listening`/`stopped` onto a [`Worker`](crate::Worker),
//! the worker hoists `start`/`stop`/`quit` onto its [`ParentLink`](crate::ParentLink).
//!
//! ## Contents
//! - [`Envelope`] the four-field wire message
//! - [`LifecycleEvent`] the event vocabulary
//! - [`send_to`] wrap and send over a [`Channel`]
//! - [`is_message`] / [`hoist_message`] validate and fire inbound messages

mod envelope;
mod lifecycle;

pub use envelope::{Envelope, PROTOCOL_TAG};
pub use lifecycle::LifecycleEvent;

use serde_json::Value;

use crate::error::TransportError;
use crate::transport::Channel;

/// Receiver of hoisted lifecycle events.
///
/// Implemented by the parent-side [`Worker`](crate::Worker) handle and the
/// worker-side [`ParentLink`](crate::ParentLink).
pub trait Hoist {
    /// Fires a lifecycle event locally.
    fn fire(&self, event: LifecycleEvent);
}

/// Wraps `(tag, pid, name, payload)` and hands it to the channel.
///
/// Send failures are returned, never raised asynchronously.
pub fn send_to(
    channel: &dyn Channel,
    pid: u32,
    name: &str,
    payload: Value,
) -> Result<(), TransportError> {
    channel.send(Envelope::new(pid, name, payload).to_value())
}

/// True if `msg` has the handshake envelope shape.
pub fn is_message(msg: &Value) -> bool {
    Envelope::from_value(msg).is_some()
}

/// Maps a validated envelope onto a local lifecycle event fired on `target`.
///
/// Invalid shapes and unknown event names are dropped silently. Returns the
/// fired event, if any.
pub fn hoist_message<T: Hoist + ?Sized>(target: &T, msg: &Value) -> Option<LifecycleEvent> {
    let event = Envelope::from_value(msg)?.event()?;
    target.fire(event);
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<LifecycleEvent>>,
        sent: Mutex<Vec<Value>>,
        closed: bool,
    }

    impl Hoist for Recorder {
        fn fire(&self, event: LifecycleEvent) {
            self.fired.lock().push(event);
        }
    }

    impl Channel for Recorder {
        fn send(&self, msg: Value) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::Disconnected);
            }
            self.sent.lock().push(msg);
            Ok(())
        }

        fn disconnect(&self) -> bool {
            false
        }

        fn is_connected(&self) -> bool {
            !self.closed
        }
    }

    #[test]
    fn sent_started_hoists_to_started_only() {
        let link = Recorder::default();
        send_to(&link, 77, "started", Value::Null).expect("send");

        let sent = link.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert!(is_message(&sent[0]));

        let target = Recorder::default();
        let fired = hoist_message(&target, &sent[0]);
        assert_eq!(fired, Some(LifecycleEvent::Started));
        assert_eq!(*target.fired.lock(), vec![LifecycleEvent::Started]);
        assert!(target.sent.lock().is_empty());
    }

    #[test]
    fn unknown_names_and_foreign_messages_are_dropped() {
        let target = Recorder::default();
        let status = json!({ "v": "qc-1", "pid": 5, "n": "status", "m": "ok" });
        let other = json!({ "n": "other", "m": "other" });
        assert!(is_message(&status));
        assert_eq!(hoist_message(&target, &status), None);
        assert!(!is_message(&other));
        assert_eq!(hoist_message(&target, &other), None);
        assert!(target.fired.lock().is_empty());
    }

    #[test]
    fn send_errors_are_returned() {
        let link = Recorder {
            closed: true,
            ..Recorder::default()
        };
        let err = send_to(&link, 1, "stop", Value::Null).unwrap_err();
        assert_eq!(err, TransportError::Disconnected);
    }

    #[test]
    fn hoisting_is_symmetric() {
        let target = Recorder::default();
        for ev in LifecycleEvent::ALL {
            let msg = Envelope::lifecycle(3, ev, Value::Null).to_value();
            assert_eq!(hoist_message(&target, &msg), Some(ev));
        }
        assert_eq!(target.fired.lock().len(), LifecycleEvent::ALL.len());
    }
}
