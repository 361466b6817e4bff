// crates/supervisor/src/launcher.rs
//! Process lifecycle seam.
//!
//! The supervisor only talks to [`ProcessLauncher`] and [`ProcessHandle`], so
//! tests can swap in fakes and production uses [`TokioLauncher`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::error::SupervisorError;

/// How to start one long-lived process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ProcessHandle>, SupervisorError>;
}

/// A running (or exited) process started by a [`ProcessLauncher`].
#[async_trait]
pub trait ProcessHandle: Send {
    /// `None` once the process has been reaped.
    fn pid(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM).
    fn terminate(&mut self) -> Result<(), SupervisorError>;

    /// Force the process down (SIGKILL) and reap it.
    async fn kill(&mut self) -> Result<(), SupervisorError>;

    /// Wait up to `timeout` for exit. `Ok(None)` means still running.
    async fn wait(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, SupervisorError>;

    /// Non-blocking exit check.
    fn try_status(&mut self) -> Result<Option<ExitStatus>, SupervisorError>;
}

/// Launches real OS processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            name: spec.name.clone(),
            source,
        })?;
        tracing::info!(name = %spec.name, pid = ?child.id(), program = %spec.program.display(), "Launched process");

        Ok(Box::new(TokioProcess {
            name: spec.name.clone(),
            child,
        }))
    }
}

struct TokioProcess {
    name: String,
    child: Child,
}

impl TokioProcess {
    fn wait_error(&self, source: std::io::Error) -> SupervisorError {
        SupervisorError::Wait {
            name: self.name.clone(),
            source,
        }
    }
}

#[async_trait]
impl ProcessHandle for TokioProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn terminate(&mut self) -> Result<(), SupervisorError> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // Exited between the id() check and the signal.
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(SupervisorError::Signal {
                pid,
                message: e.to_string(),
            }),
        }
    }

    async fn kill(&mut self) -> Result<(), SupervisorError> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(self.wait_error(e)),
        }
    }

    async fn wait(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, SupervisorError> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => Ok(Some(status)),
            Ok(Err(e)) => Err(self.wait_error(e)),
            Err(_) => Ok(None),
        }
    }

    fn try_status(&mut self) -> Result<Option<ExitStatus>, SupervisorError> {
        self.child.try_wait().map_err(|e| self.wait_error(e))
    }
}
