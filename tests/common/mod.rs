//! In-memory fork/kill host for driving a `Cluster` without real processes.
//!
//! Each forked "process" follows a [`Script`]: what it reports right after the
//! fork, on `start` and on `stop`. Kills are recorded; `SIGKILL`/`SIGTERM`
//! make the process exit. Signals aimed at the test process itself are only
//! recorded.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use forkvisor::{
    Channel, Cluster, ClusterConfig, Envelope, Event, EventKind, Fork, Forked, Inbound,
    LifecycleEvent, Signaller, TransportError, WorkerExit,
};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

/// How a mock worker answers `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnStop {
    Stopped,
    StoppedTwice,
    StoppedThenExit,
    Exit,
    Disconnect,
    Ignore,
}

/// Behaviour of one mock worker.
#[derive(Debug, Clone)]
pub struct Script {
    pub on_fork: Vec<LifecycleEvent>,
    pub on_start: Vec<LifecycleEvent>,
    pub on_stop: OnStop,
}

impl Script {
    /// `ready` on fork, `started` on start, `stopped` + exit on stop.
    pub fn well_behaved() -> Self {
        Self {
            on_fork: vec![LifecycleEvent::Ready],
            on_start: vec![LifecycleEvent::Started],
            on_stop: OnStop::StoppedThenExit,
        }
    }

    /// Never says anything.
    pub fn silent() -> Self {
        Self {
            on_fork: vec![],
            on_start: vec![],
            on_stop: OnStop::Ignore,
        }
    }

    pub fn on_fork(mut self, events: &[LifecycleEvent]) -> Self {
        self.on_fork = events.to_vec();
        self
    }

    pub fn on_start(mut self, events: &[LifecycleEvent]) -> Self {
        self.on_start = events.to_vec();
        self
    }

    pub fn on_stop(mut self, reply: OnStop) -> Self {
        self.on_stop = reply;
        self
    }
}

struct Proc {
    tx: mpsc::UnboundedSender<Inbound>,
    alive: bool,
    script: Script,
    received: Vec<String>,
}

#[derive(Default)]
struct Inner {
    next_pid: AtomicU32,
    fail_next: AtomicBool,
    procs: Mutex<HashMap<u32, Proc>>,
    scripts: Mutex<VecDeque<Script>>,
    default_script: Mutex<Option<Script>>,
    kills: Mutex<Vec<(u32, Signal)>>,
    forks: Mutex<Vec<u32>>,
}

impl Inner {
    fn reply(&self, pid: u32, events: &[LifecycleEvent]) {
        let procs = self.procs.lock();
        if let Some(p) = procs.get(&pid) {
            for ev in events {
                let msg = Envelope::lifecycle(pid, *ev, Value::Null).to_value();
                let _ = p.tx.send(Inbound::Message(msg));
            }
        }
    }

    fn exit(&self, pid: u32, exit: WorkerExit) -> bool {
        let mut procs = self.procs.lock();
        match procs.get_mut(&pid) {
            Some(p) if p.alive => {
                p.alive = false;
                let _ = p.tx.send(Inbound::Exited(exit));
                true
            }
            _ => false,
        }
    }

    fn on_message(&self, pid: u32, msg: &Value) {
        let Some(env) = Envelope::from_value(msg) else { return };
        let script = {
            let mut procs = self.procs.lock();
            let Some(p) = procs.get_mut(&pid) else { return };
            p.received.push(env.name.clone());
            p.script.clone()
        };
        match env.event() {
            Some(LifecycleEvent::Start) => self.reply(pid, &script.on_start),
            Some(LifecycleEvent::Stop) => match script.on_stop {
                OnStop::Stopped => self.reply(pid, &[LifecycleEvent::Stopped]),
                OnStop::StoppedTwice => {
                    self.reply(pid, &[LifecycleEvent::Stopped, LifecycleEvent::Stopped])
                }
                OnStop::StoppedThenExit => {
                    self.reply(pid, &[LifecycleEvent::Stopped]);
                    self.exit(pid, WorkerExit::code(0));
                }
                OnStop::Exit => {
                    self.exit(pid, WorkerExit::code(0));
                }
                OnStop::Disconnect => {
                    if let Some(p) = self.procs.lock().get(&pid) {
                        let _ = p.tx.send(Inbound::Disconnected);
                    }
                }
                OnStop::Ignore => {}
            },
            _ => {}
        }
    }
}

struct MockChannel {
    pid: u32,
    host: Arc<Inner>,
    connected: AtomicBool,
}

impl Channel for MockChannel {
    fn send(&self, msg: Value) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let alive = self
            .host
            .procs
            .lock()
            .get(&self.pid)
            .is_some_and(|p| p.alive);
        if !alive {
            return Err(TransportError::Disconnected);
        }
        self.host.on_message(self.pid, &msg);
        Ok(())
    }

    fn disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Cloneable handle acting as both [`Fork`] and [`Signaller`].
#[derive(Clone)]
pub struct MockHost {
    inner: Arc<Inner>,
}

impl Default for MockHost {
    fn default() -> Self {
        let inner = Inner::default();
        inner.next_pid.store(1000, Ordering::SeqCst);
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script used when no queued script is left.
    pub fn with_default(self, script: Script) -> Self {
        *self.inner.default_script.lock() = Some(script);
        self
    }

    /// Script for the next fork (FIFO).
    pub fn push_script(&self, script: Script) {
        self.inner.scripts.lock().push_back(script);
    }

    /// Changes the behaviour of a running worker.
    pub fn set_script(&self, pid: u32, script: Script) {
        if let Some(p) = self.inner.procs.lock().get_mut(&pid) {
            p.script = script;
        }
    }

    pub fn fail_next_fork(&self) {
        self.inner.fail_next.store(true, Ordering::SeqCst);
    }

    /// Makes the worker report lifecycle events.
    pub fn emit(&self, pid: u32, events: &[LifecycleEvent]) {
        self.inner.reply(pid, events);
    }

    /// Makes the worker exit on its own.
    pub fn exit(&self, pid: u32, code: i32) -> bool {
        self.inner.exit(pid, WorkerExit::code(code))
    }

    /// Names of the envelopes the worker received, in order.
    pub fn received(&self, pid: u32) -> Vec<String> {
        self.inner
            .procs
            .lock()
            .get(&pid)
            .map(|p| p.received.clone())
            .unwrap_or_default()
    }

    pub fn kills(&self) -> Vec<(u32, Signal)> {
        self.inner.kills.lock().clone()
    }

    pub fn kills_of(&self, pid: u32) -> Vec<Signal> {
        self.kills()
            .into_iter()
            .filter(|(p, _)| *p == pid)
            .map(|(_, s)| s)
            .collect()
    }

    pub fn forks(&self) -> Vec<u32> {
        self.inner.forks.lock().clone()
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.inner.procs.lock().get(&pid).is_some_and(|p| p.alive)
    }
}

impl Fork for MockHost {
    fn fork(&self) -> io::Result<Forked> {
        if self.inner.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("EAGAIN: no more processes"));
        }
        let pid = self.inner.next_pid.fetch_add(1, Ordering::SeqCst);
        let script = self
            .inner
            .scripts
            .lock()
            .pop_front()
            .or_else(|| self.inner.default_script.lock().clone())
            .unwrap_or_else(Script::well_behaved);

        let (tx, inbound) = mpsc::unbounded_channel();
        let on_fork = script.on_fork.clone();
        self.inner.procs.lock().insert(
            pid,
            Proc {
                tx,
                alive: true,
                script,
                received: Vec::new(),
            },
        );
        self.inner.forks.lock().push(pid);
        self.inner.reply(pid, &on_fork);

        Ok(Forked {
            pid,
            channel: Box::new(MockChannel {
                pid,
                host: Arc::clone(&self.inner),
                connected: AtomicBool::new(true),
            }),
            inbound,
        })
    }
}

impl Signaller for MockHost {
    fn kill(&self, pid: u32, signal: Signal) -> nix::Result<()> {
        self.inner.kills.lock().push((pid, signal));
        if pid == std::process::id() {
            return Ok(());
        }
        if !self.is_alive(pid) {
            return Err(Errno::ESRCH);
        }
        if matches!(signal, Signal::SIGKILL | Signal::SIGTERM) {
            self.inner.exit(pid, WorkerExit::signaled(signal));
        }
        Ok(())
    }

    fn probe(&self, pid: u32) -> bool {
        self.is_alive(pid)
    }
}

/// Test defaults: short timeouts, no OS signal handlers.
pub fn config() -> ClusterConfig {
    ClusterConfig {
        start_timeout: Duration::from_millis(100),
        stop_timeout: Duration::from_millis(100),
        handle_signals: false,
        ..ClusterConfig::default()
    }
}

pub fn cluster(host: &MockHost, cfg: ClusterConfig) -> Arc<Cluster> {
    Cluster::builder(cfg)
        .with_forker(host.clone())
        .with_signaller(host.clone())
        .build()
}

/// Lets spawned tasks run until they are all idle.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Drains everything published so far.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

pub fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind).collect()
}

/// Waits until the bus reports `kind` for `pid`.
pub async fn wait_for(rx: &mut broadcast::Receiver<Event>, kind: EventKind, pid: u32) -> Event {
    loop {
        match rx.recv().await {
            Ok(ev) if ev.kind == kind && ev.pid == Some(pid) => return ev,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(e) => panic!("bus closed while waiting for {kind:?}: {e}"),
        }
    }
}
