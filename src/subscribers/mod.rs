//! # Event subscribers.
//!
//! [`Subscribe`] is the extension point for plugging handlers into a cluster's
//! event stream; [`SubscriberSet`] fans each event out to all of them.
//!
//! ```text
//! Bus ──► subscriber listener ──► SubscriberSet::emit(&Event)
//!                                    ├──► [queue S1] ─► worker S1 ─► on_event()
//!                                    └──► [queue SN] ─► worker SN ─► on_event()
//! ```
//!
//! ## Implementing a subscriber
//! ```no_run
//! use forkvisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct ExitCounter;
//!
//! #[async_trait]
//! impl Subscribe for ExitCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::WorkerExited {
//!             // bump a counter
//!         }
//!     }
//!     fn name(&self) -> &'static str { "exit-counter" }
//! }
//! ```

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod embedded;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
