//! # Lifecycle events exchanged between the supervisor and its workers.
//!
//! ```text
//! worker ──► parent:  ready, started, listening, stopped
//! parent ──► worker:  start, stop, quit
//! ```

use std::fmt;

/// Fixed vocabulary of handshake events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Worker initialized and able to accept `start`.
    Ready,
    /// Worker is running and serving.
    Started,
    /// Worker is listening for requests (counts as started if configured).
    Listening,
    /// Worker no longer accepts work.
    Stopped,
    /// Parent asks the worker to begin serving.
    Start,
    /// Parent asks the worker to stop accepting work.
    Stop,
    /// Parent asks the worker to exit.
    Quit,
}

impl LifecycleEvent {
    /// All events, in wire-table order.
    pub const ALL: [LifecycleEvent; 7] = [
        LifecycleEvent::Ready,
        LifecycleEvent::Started,
        LifecycleEvent::Stopped,
        LifecycleEvent::Listening,
        LifecycleEvent::Start,
        LifecycleEvent::Stop,
        LifecycleEvent::Quit,
    ];

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::Ready => "ready",
            LifecycleEvent::Started => "started",
            LifecycleEvent::Listening => "listening",
            LifecycleEvent::Stopped => "stopped",
            LifecycleEvent::Start => "start",
            LifecycleEvent::Stop => "stop",
            LifecycleEvent::Quit => "quit",
        }
    }

    /// Looks up an event by wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ev| ev.as_str() == name)
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_map_both_ways() {
        for ev in LifecycleEvent::ALL {
            assert_eq!(LifecycleEvent::from_name(ev.as_str()), Some(ev));
            assert_eq!(ev.to_string(), ev.as_str());
        }
        assert_eq!(LifecycleEvent::from_name("status"), None);
    }
}
