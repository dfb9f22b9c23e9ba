//! Cluster core: worker handles and the sequencers that drive them.
//!
//! The only public entry point is [`Cluster`], built with [`ClusterBuilder`].
//!
//! Internal modules:
//! - [`cluster`]: state, introspection, kill/probe, `launch`;
//! - [`start`]: fork, inbound pump and start-wait;
//! - [`stop`]: stop handshake;
//! - [`relay`]: OS signal relay with queueing while forking;
//! - [`replace`]: serialized replacement loop;
//! - [`wait`]: the shared timeout combinator;
//! - [`worker`]: per-worker state and event stream.
//!
//! ```text
//!          ┌──────────── Cluster ─────────────┐
//! signals ─►  relay ──► queue | kill workers  │
//! replace ─►  replace ──► start ──► stop      │
//!          │     workers: Vec<WorkerRef>      │
//!          └───────┬──────────────────────────┘
//!                  │ publish
//!                  ▼
//!                 Bus ──► subscribers
//! ```

mod builder;
mod cluster;
mod config;
mod relay;
mod replace;
mod start;
mod stop;
mod wait;
mod worker;

pub use builder::ClusterBuilder;
pub use cluster::Cluster;
pub use config::ClusterConfig;
pub use replace::ReplaceTicket;
pub use start::PendingStart;
pub use worker::{Worker, WorkerEvent, WorkerRef};
