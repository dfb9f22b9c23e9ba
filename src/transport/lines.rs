//! # Newline-delimited JSON over a byte stream.
//!
//! One JSON value per line in each direction. Lines that are not JSON are
//! ignored, so a worker may still print ordinary text to its stdout.
//!
//! ```text
//! Channel::send(Value) ──► mpsc ──► writer task ──► AsyncWrite (pipe)
//! AsyncRead (pipe) ──► reader task ──► Inbound::Message / Inbound::Disconnected
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Channel, Inbound};
use crate::error::TransportError;

/// [`Channel`] that writes JSON lines from a background task.
pub(crate) struct LineChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    broken: std::sync::Arc<AtomicBool>,
}

impl LineChannel {
    /// Spawns the writer task. Must be called from within a tokio runtime.
    pub(crate) fn spawn<W>(writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let broken = std::sync::Arc::new(AtomicBool::new(false));
        tokio::spawn(write_lines(writer, rx, broken.clone()));
        Self {
            tx: Mutex::new(Some(tx)),
            broken,
        }
    }
}

async fn write_lines<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<String>,
    broken: std::sync::Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let res = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = res {
            tracing::debug!(error = %e, "channel write failed");
            broken.store(true, Ordering::SeqCst);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

impl Channel for LineChannel {
    fn send(&self, msg: Value) -> Result<(), TransportError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::Disconnected)?;
        let mut line = serde_json::to_string(&msg).map_err(|e| TransportError::Encode {
            reason: e.to_string(),
        })?;
        line.push('\n');
        tx.send(line).map_err(|_| TransportError::Disconnected)
    }

    fn disconnect(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    fn is_connected(&self) -> bool {
        self.tx.lock().is_some() && !self.broken.load(Ordering::SeqCst)
    }
}

/// Spawns a task turning JSON lines into [`Inbound::Message`]s.
///
/// Sends [`Inbound::Disconnected`] once the stream ends or fails.
pub(crate) fn spawn_reader<R>(reader: R, tx: mpsc::UnboundedSender<Inbound>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(line) {
                        Ok(value) => {
                            if tx.send(Inbound::Message(value)).is_err() {
                                return;
                            }
                        }
                        Err(_) => tracing::debug!(line, "ignoring non-json channel output"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "channel read failed");
                    break;
                }
            }
        }
        let _ = tx.send(Inbound::Disconnected);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lines_round_trip_through_a_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let channel = LineChannel::spawn(client);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reader = spawn_reader(server, tx);

        channel.send(json!({ "n": "ready" })).expect("send");
        channel.send(json!([1, 2, 3])).expect("send");
        assert_eq!(rx.recv().await, Some(Inbound::Message(json!({ "n": "ready" }))));
        assert_eq!(rx.recv().await, Some(Inbound::Message(json!([1, 2, 3]))));

        assert!(channel.disconnect());
        assert!(!channel.disconnect());
        assert!(!channel.is_connected());
        assert_eq!(
            channel.send(json!(null)),
            Err(TransportError::Disconnected)
        );
        assert_eq!(rx.recv().await, Some(Inbound::Disconnected));
        reader.await.expect("reader task");
    }

    #[tokio::test]
    async fn non_json_output_is_skipped() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _reader = spawn_reader(server, tx);

        client
            .write_all(b"hello there\n\n{\"n\":\"started\"}\n")
            .await
            .expect("write");
        drop(client);

        assert_eq!(
            rx.recv().await,
            Some(Inbound::Message(json!({ "n": "started" })))
        );
        assert_eq!(rx.recv().await, Some(Inbound::Disconnected));
    }
}
