use std::io;
use std::sync::Arc;

use super::cluster::Cluster;
use super::config::ClusterConfig;
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::transport::{CommandForker, Fork, Forked, OsSignaller, Signaller};

/// Builder for a [`Cluster`] with pluggable process plumbing and subscribers.
pub struct ClusterBuilder {
    cfg: ClusterConfig,
    forker: Option<Arc<dyn Fork>>,
    signaller: Option<Arc<dyn Signaller>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ClusterBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: ClusterConfig) -> Self {
        Self {
            cfg,
            forker: None,
            signaller: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the fork primitive. Defaults to re-running the current executable.
    pub fn with_forker(mut self, forker: impl Fork) -> Self {
        self.forker = Some(Arc::new(forker));
        self
    }

    /// Sets the signal primitive. Defaults to [`OsSignaller`].
    pub fn with_signaller(mut self, signaller: impl Signaller) -> Self {
        self.signaller = Some(Arc::new(signaller));
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive cluster events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the cluster.
    ///
    /// Must be called from within a tokio runtime when subscribers are set.
    pub fn build(self) -> Arc<Cluster> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let forker = self.forker.unwrap_or_else(default_forker);
        let signaller = self
            .signaller
            .unwrap_or_else(|| Arc::new(OsSignaller) as Arc<dyn Signaller>);

        let subs = if self.subscribers.is_empty() {
            None
        } else {
            let set = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
            subscriber_listener(&bus, Arc::clone(&set));
            Some(set)
        };

        Arc::new(Cluster::new_internal(self.cfg, bus, forker, signaller, subs))
    }
}

/// Forwards bus events to the subscriber set until the bus closes.
fn subscriber_listener(bus: &Bus, set: Arc<SubscriberSet>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(&ev),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "subscriber listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn default_forker() -> Arc<dyn Fork> {
    match CommandForker::current_exe() {
        Ok(forker) => Arc::new(forker),
        Err(e) => Arc::new(Unforkable(e.to_string())),
    }
}

/// Stand-in when the current executable cannot be located; every fork fails.
struct Unforkable(String);

impl Fork for Unforkable {
    fn fork(&self) -> io::Result<Forked> {
        Err(io::Error::other(self.0.clone()))
    }
}
