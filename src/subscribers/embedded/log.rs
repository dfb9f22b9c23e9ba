//! # LogWriter: cluster events as tracing records
//!
//! ## Example output (with the `fmt` subscriber)
//! ```text
//! INFO forkvisor: fork pid=4242
//! INFO forkvisor: started pid=4242
//! WARN forkvisor: start-timeout pid=4243 timeout_ms=10
//! INFO forkvisor: signal-relayed pid=4242 signal=SIGUSR2
//! INFO forkvisor: replace-succeeded pid=4242 replacement=4250
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let label = e.kind.as_label();
        match e.kind {
            EventKind::SubscriberPanicked | EventKind::SubscriberOverflow => {
                tracing::warn!(
                    target: "forkvisor",
                    subscriber = e.subscriber.unwrap_or("unknown"),
                    reason = e.reason.as_deref().unwrap_or("unknown"),
                    "{label}"
                );
            }
            EventKind::ForkFailed
            | EventKind::StartTimeout
            | EventKind::UnexpectedExit
            | EventKind::StopTimeout
            | EventKind::SignalsDropped
            | EventKind::ReplaceFailed
            | EventKind::ReplaceRejected => {
                tracing::warn!(
                    target: "forkvisor",
                    pid = e.pid,
                    replacement = e.replacement,
                    timeout_ms = e.timeout_ms,
                    reason = e.reason.as_deref(),
                    "{label}"
                );
            }
            EventKind::WorkerMessage => {
                tracing::debug!(
                    target: "forkvisor",
                    pid = e.pid,
                    event = e.lifecycle.map(|l| l.as_str()),
                    "{label}"
                );
            }
            EventKind::SignalQueued | EventKind::SignalRelayed => {
                tracing::info!(
                    target: "forkvisor",
                    pid = e.pid,
                    signal = e.signal.map(|s| s.as_str()),
                    "{label}"
                );
            }
            EventKind::WorkerForked
            | EventKind::WorkerDisconnected
            | EventKind::WorkerExited
            | EventKind::WorkerStarted
            | EventKind::WorkerStopped
            | EventKind::ReplaceQueued
            | EventKind::ReplaceStarted
            | EventKind::ReplaceSucceeded => {
                tracing::info!(
                    target: "forkvisor",
                    pid = e.pid,
                    replacement = e.replacement,
                    reason = e.reason.as_deref(),
                    "{label}"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
