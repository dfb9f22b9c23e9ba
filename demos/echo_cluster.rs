//! # Example: echo_cluster
//!
//! The same binary acts as master and worker. The master forks two workers,
//! relays signals to them, replaces one of them and then stops the rest.
//! Each worker answers the handshake and echoes any non-handshake message.
//!
//! ## Flow
//! ```text
//! master                               worker (FORKVISOR_WORKER=1)
//!   launch() ── fork ×2 ─────────────►   ready
//!            ◄─ started wait ─────────
//!            ── start ───────────────►   started
//!   replace_child(w0)
//!            ── fork ────────────────►   ready
//!            ── start ───────────────►   started
//!            ── stop (w0) ───────────►   stopped, exit
//!   stop_child(rest) ────────────────►   stopped, exit
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example echo_cluster --features logging
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use forkvisor::{
    Cluster, ClusterConfig, Envelope, LifecycleEvent, LogWriter, ParentEvent, ParentLink,
    Subscribe, WorkerEvent, is_worker,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if is_worker() {
        worker().await;
        return Ok(());
    }
    master().await
}

async fn master() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = ClusterConfig {
        cluster_size: 2,
        start_timeout: Duration::from_secs(5),
        stop_timeout: Duration::from_secs(5),
        ..ClusterConfig::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let cluster = Cluster::builder(cfg).with_subscribers(subs).build();

    cluster.launch().await?;
    println!("launched {} workers", cluster.len());

    let workers = cluster.workers();
    let first = workers.first().ok_or("no workers")?;

    let mut replies = first.subscribe();
    first.send_raw(json!({ "hello": "worker" }))?;
    let echo = tokio::time::timeout(Duration::from_secs(2), async {
        while let Ok(ev) = replies.recv().await {
            let WorkerEvent::Message(msg) = ev else { continue };
            match Envelope::from_value(&msg) {
                Some(env) if env.name == "echo" => return Some(env.payload),
                _ => {}
            }
        }
        None
    })
    .await;
    println!("echo from #{}: {:?}", first.pid(), echo.ok().flatten());

    let fresh = cluster.replace_child(first).await?;
    println!("replaced #{} with #{}", first.pid(), fresh.pid());

    for w in cluster.workers() {
        cluster.stop_child(&w).await?;
    }
    cluster.uninstall_signal_handlers();
    println!("all workers stopped");
    Ok(())
}

async fn worker() {
    let link = ParentLink::connect();
    let mut events = link.subscribe();
    let _ = link.send(LifecycleEvent::Ready, Value::Null);

    while let Ok(ev) = events.recv().await {
        match ev {
            ParentEvent::Lifecycle(LifecycleEvent::Start) => {
                let _ = link.send(LifecycleEvent::Started, Value::Null);
            }
            ParentEvent::Lifecycle(LifecycleEvent::Stop | LifecycleEvent::Quit) => {
                let _ = link.send(LifecycleEvent::Stopped, Value::Null);
                // Let the writer flush before the process ends.
                tokio::time::sleep(Duration::from_millis(20)).await;
                break;
            }
            ParentEvent::Message(msg) if !forkvisor::protocol::is_message(&msg) => {
                let _ = link.send_named("echo", msg.as_ref().clone());
            }
            ParentEvent::Disconnected => break,
            _ => {}
        }
    }
}
