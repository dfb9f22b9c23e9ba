//! # Child processes as workers.
//!
//! [`CommandForker`] spawns a program with piped stdin/stdout and speaks the
//! JSON-lines channel over them. The child sees `FORKVISOR_WORKER=1` in its
//! environment, which is what [`is_worker`](crate::is_worker) checks.
//!
//! ```text
//! fork()
//!   ├─ spawn program (stdin/stdout piped, stderr inherited)
//!   ├─ LineChannel over stdin
//!   ├─ reader task over stdout ──► inbound
//!   └─ exit task: wait() ─► drain reader (bounded) ─► Inbound::Exited
//! ```

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;

use super::{Fork, Forked, Inbound, LineChannel, WorkerExit, spawn_reader};

/// Environment variable set to `1` in every forked worker.
pub const WORKER_ENV: &str = "FORKVISOR_WORKER";

/// How long buffered output may still be read after the child was reaped.
const DRAIN_GRACE: Duration = Duration::from_millis(50);

/// [`Fork`] implementation backed by [`tokio::process::Command`].
#[derive(Debug, Clone)]
pub struct CommandForker {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl CommandForker {
    /// Forks `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Forks the currently running executable, i.e. the same binary acts as
    /// master and worker and tells them apart with [`is_worker`](crate::is_worker).
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Sets an extra environment variable for every worker.
    pub fn env(mut self, key: impl AsRef<OsStr>, val: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), val.as_ref().to_os_string()));
        self
    }

    /// Program that will be spawned.
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl Fork for CommandForker {
    fn fork(&self) -> io::Result<Forked> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned child has no pid"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout not piped"))?;

        let (tx, inbound) = mpsc::unbounded_channel();
        let channel = LineChannel::spawn(stdin);
        let reader = spawn_reader(stdout, tx.clone());

        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => WorkerExit::from(status),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to reap worker");
                    WorkerExit::default()
                }
            };
            // Output written right before exit is still in the pipe.
            let _ = tokio::time::timeout(DRAIN_GRACE, reader).await;
            let _ = tx.send(Inbound::Exited(exit));
        });

        Ok(Forked {
            pid,
            channel: Box::new(channel),
            inbound,
        })
    }
}
