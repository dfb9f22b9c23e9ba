//! # forkvisor
//!
//! **Forkvisor** supervises a pool of worker processes on one host: it forks
//! them, drives a small start/stop handshake over a message channel, relays
//! OS signals to them and replaces a running worker with a fresh one with a
//! minimal overlap window.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   OS signals            replace_child()            fork_child() / launch()
//!       │                       │                              │
//!       ▼                       ▼                              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Cluster                                                          │
//! │  - relay: queue while forking, else kill(every worker, sig)       │
//! │  - replace queue: FIFO, one replacement at a time                 │
//! │  - workers: Vec<WorkerRef> (removed on exit)                      │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐         │
//!   │  Worker  │       │  Worker  │       │  Worker  │         │ publish
//!   │ (handle) │       │ (handle) │       │ (handle) │         │
//!   └────┬─────┘       └────┬─────┘       └────┬─────┘         │
//!        │ Channel (JSON lines, qc-1 envelopes)│               ▼
//!        ▼                  ▼                  ▼         ┌───────────┐
//!   worker process     worker process     worker process │    Bus    │
//!   (ParentLink)       (ParentLink)       (ParentLink)   └─────┬─────┘
//!                                                              ▼
//!                                                        SubscriberSet
//! ```
//!
//! ### Handshake
//! ```text
//! parent                          worker
//!   │ fork ─────────────────────────► │
//!   │ ◄──────────────── ready/started │   start-wait resolves
//!   │ start ────────────────────────► │
//!   │ ◄─────────── started/listening  │   (replacement: now stop the old one)
//!   │ stop ─────────────────────────► │
//!   │ ◄───────────────────── stopped  │   or exit, or disconnect if configured
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                       |
//! |-------------------|----------------------------------------------------------|------------------------------------------|
//! | **Cluster**       | Fork, start, stop, replace, relay signals.               | [`Cluster`], [`WorkerRef`]               |
//! | **Protocol**      | Envelope and lifecycle vocabulary, shared by both sides. | [`Envelope`], [`LifecycleEvent`]         |
//! | **Transport**     | Pluggable fork and kill primitives.                      | [`Fork`], [`Channel`], [`Signaller`]     |
//! | **Worker side**   | Parent channel inside a worker process.                  | [`ParentLink`], [`is_worker`]            |
//! | **Subscriber API**| Observe cluster events.                                  | [`Subscribe`], [`Event`]                 |
//! | **Errors**        | Typed outcomes of every sequencer.                       | [`ClusterError`], [`TransportError`]     |
//! | **Configuration** | Timeouts, handshake options, relayed signals.            | [`ClusterConfig`]                        |
//!
//! ## Optional features
//! - `logging`: exports a built-in [`LogWriter`] that renders events through `tracing`.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use forkvisor::{Cluster, ClusterConfig, is_worker};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     if is_worker() {
//!         // run the worker side with forkvisor::ParentLink
//!         return Ok(());
//!     }
//!
//!     let cfg = ClusterConfig {
//!         cluster_size: 4,
//!         start_timeout: Duration::from_secs(5),
//!         ..ClusterConfig::default()
//!     };
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn forkvisor::Subscribe>> = vec![Arc::new(forkvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn forkvisor::Subscribe>> = Vec::new();
//!
//!     // Without a forker the current executable is re-run as the worker.
//!     let cluster = Cluster::builder(cfg).with_subscribers(subs).build();
//!     cluster.launch().await?;
//!
//!     for old in cluster.workers() {
//!         cluster.replace_child(&old).await?;
//!     }
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod link;
pub mod protocol;
mod subscribers;
mod transport;

// ---- Public re-exports ----

pub use crate::core::{
    Cluster, ClusterBuilder, ClusterConfig, PendingStart, ReplaceTicket, Worker, WorkerEvent,
    WorkerRef,
};
pub use error::{ClusterError, TransportError};
pub use events::{Bus, Event, EventKind};
pub use link::{ParentEvent, ParentLink, is_master, is_worker};
pub use protocol::{Envelope, LifecycleEvent};
pub use subscribers::{Subscribe, SubscriberSet};
pub use transport::{
    Channel, CommandForker, Fork, Forked, Inbound, OsSignaller, Signaller, WORKER_ENV, WorkerExit,
};

// Optional: expose a built-in tracing subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
