//! The one timeout combinator behind every wait on a worker.
//!
//! `until` resolves exactly once: with the first state or event the caller
//! classifies as final, or with `None` when the budget elapses. The receiver
//! is owned by the caller and dropped with the wait, which is the whole
//! listener teardown.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use super::worker::WorkerEvent;

/// Waits for the first final outcome within `budget`.
///
/// - `check` inspects current state; called first and again after the receiver lagged
/// - `classify` inspects each later event
pub(crate) async fn until<T, C, F>(
    rx: &mut broadcast::Receiver<WorkerEvent>,
    budget: Duration,
    check: C,
    mut classify: F,
) -> Option<T>
where
    C: Fn() -> Option<T>,
    F: FnMut(&WorkerEvent) -> Option<T>,
{
    let watch = async {
        if let Some(out) = check() {
            return out;
        }
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if let Some(out) = classify(&ev) {
                        return out;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "worker event receiver lagged");
                    if let Some(out) = check() {
                        return out;
                    }
                }
                // The sender lives as long as the worker handle; only the budget ends this.
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    };
    tokio::time::timeout(budget, watch).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LifecycleEvent;

    #[tokio::test(start_paused = true)]
    async fn first_final_event_wins() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(WorkerEvent::Lifecycle(LifecycleEvent::Ready)).ok();
        tx.send(WorkerEvent::Lifecycle(LifecycleEvent::Stopped)).ok();
        tx.send(WorkerEvent::Disconnected).ok();

        let got = until(&mut rx, Duration::from_secs(1), || None, |ev| match ev {
            WorkerEvent::Lifecycle(LifecycleEvent::Stopped) => Some("stopped"),
            WorkerEvent::Disconnected => Some("disconnected"),
            _ => None,
        })
        .await;
        assert_eq!(got, Some("stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn state_check_short_circuits_and_budget_bounds() {
        let (_tx, mut rx) = broadcast::channel::<WorkerEvent>(8);
        let got = until(&mut rx, Duration::from_secs(1), || Some(1), |_| Some(2)).await;
        assert_eq!(got, Some(1));

        let got: Option<()> = until(&mut rx, Duration::from_millis(10), || None, |_| None).await;
        assert_eq!(got, None);
    }
}
