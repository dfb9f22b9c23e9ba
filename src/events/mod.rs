//! Cluster events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to what happens inside a [`Cluster`](crate::Cluster):
//! forks, lifecycle messages, exits, relayed signals and replacements.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: the fork/start and stop sequencers, the per-worker inbound pump,
//!   the signal relay, the replacement loop, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Cluster::subscribe()` receivers and the subscriber listener
//!   spawned by the builder (fans out to `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
