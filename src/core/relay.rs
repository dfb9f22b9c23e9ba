//! # Signal relay.
//!
//! One tokio signal stream per relayable signal, each drained by a task that
//! calls [`Cluster::relay_signal`]:
//!
//! ```text
//! OS signal ─► relay task ─► relay_signal(sig)
//!                               ├─ forking   ─► signal_queue.push(sig)
//!                               └─ otherwise ─► kill(every worker, sig)
//!                            SIGTSTP: delivered as SIGSTOP, then the
//!                            supervisor stops itself after one yield
//! ```
//!
//! Kill failures are ignored. Only one fork window is tracked at a time:
//! signals caught while several forks overlap all go to whichever fork
//! finishes first.

use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use super::cluster::Cluster;
use super::worker::Worker;
use crate::error::ClusterError;
use crate::events::{Event, EventKind};

impl Cluster {
    /// Installs one relay per configured signal. Installing twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_signals(self: &Arc<Self>) -> Result<(), ClusterError> {
        let token = {
            let mut st = self.state.lock();
            if st.relays.is_some() {
                return Ok(());
            }
            let token = CancellationToken::new();
            st.relays = Some(token.clone());
            token
        };

        let mut streams = Vec::new();
        for sig in self.cfg.relayable_signals() {
            match signal(SignalKind::from_raw(sig as i32)) {
                Ok(stream) => streams.push((sig, stream)),
                Err(e) => {
                    self.state.lock().relays = None;
                    token.cancel();
                    return Err(ClusterError::SignalInstall {
                        signal: sig,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for (sig, mut stream) in streams {
            let cluster = Arc::downgrade(self);
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        got = stream.recv() => {
                            let Some(()) = got else { break };
                            let Some(cluster) = cluster.upgrade() else { break };
                            tracing::debug!(signal = %sig, "relaying signal");
                            cluster.relay_signal(sig);
                        }
                    }
                }
            });
        }
        Ok(())
    }

    /// Stops the relay tasks. Returns `false` if none were installed.
    ///
    /// The process keeps its tokio signal registrations, so the default action
    /// of a signal (e.g. terminate on `SIGINT`) is not restored.
    pub fn uninstall_signal_handlers(&self) -> bool {
        match self.state.lock().relays.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// True if signal relays are installed.
    pub fn handles_signals(&self) -> bool {
        self.state.lock().relays.is_some()
    }

    /// Handles one caught signal: queue it while forking, else relay to every worker.
    pub fn relay_signal(&self, sig: Signal) {
        let targets = {
            let mut st = self.state.lock();
            if st.forking {
                st.signal_queue.push(sig);
                None
            } else {
                Some(st.workers.clone())
            }
        };
        match targets {
            None => self
                .bus
                .publish(Event::new(EventKind::SignalQueued).with_signal(sig)),
            Some(workers) => {
                let refs: Vec<&Worker> = workers.iter().map(|w| w.as_ref()).collect();
                self.relay_to(&[sig], &refs);
            }
        }
        if sig == Signal::SIGTSTP {
            self.suspend_self();
        }
    }

    /// Delivers each signal, in order, to each of `workers`.
    pub(super) fn relay_to(&self, signals: &[Signal], workers: &[&Worker]) {
        for &sig in signals {
            let sig = if sig == Signal::SIGTSTP {
                Signal::SIGSTOP
            } else {
                sig
            };
            for worker in workers {
                self.kill_child(worker, sig);
                self.bus.publish(
                    Event::new(EventKind::SignalRelayed)
                        .with_pid(worker.pid())
                        .with_signal(sig),
                );
            }
        }
    }

    /// Stops this process once the workers were told to stop.
    fn suspend_self(&self) {
        let signaller = Arc::clone(&self.signaller);
        let me = std::process::id();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    tokio::task::yield_now().await;
                    let _ = signaller.kill(me, Signal::SIGSTOP);
                });
            }
            Err(_) => {
                let _ = signaller.kill(me, Signal::SIGSTOP);
            }
        }
    }
}
