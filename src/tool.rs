//! External program descriptors and a bounded runner.
//!
//! Every collaborator binary (archiver, metadata scrubber, secure delete,
//! the encryption tool itself) is described by a [`Tool`]: the program plus
//! optional leading arguments. Commands never receive secrets; the only
//! secret-bearing exchange goes through [`crate::pty`].

use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::{AGE_PROGRAM, CLIPBOARD_PROGRAM, MAT2_PROGRAM, PROBE_TIMEOUT, SHRED_PROGRAM, TAR_PROGRAM};
use crate::error::{Error, Result};

/// A program and the arguments that always precede the per-call ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tool {
    program: OsString,
    leading: Vec<OsString>,
}

impl Tool {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self { program: program.into(), leading: Vec::new() }
    }

    /// Adds arguments placed before every invocation's own arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading.extend(args.into_iter().map(Into::into));
        self
    }

    /// Display name used in logs and error messages.
    pub fn name(&self) -> String {
        std::path::Path::new(&self.program).file_name().unwrap_or(&self.program).to_string_lossy().into_owned()
    }

    /// A blocking command with the leading arguments applied and no inherited stdin.
    pub fn std_command<I, S>(&self, args: I) -> std::process::Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.leading).args(args).stdin(Stdio::null());
        command
    }

    /// Async variant of [`Tool::std_command`]; the child is killed if the handle is dropped.
    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::from(self.std_command(args));
        command.kill_on_drop(true);
        command
    }

    /// Spawns, maps a missing binary to [`Error::DependencyMissing`].
    pub fn spawn(&self, command: &mut Command) -> Result<Child> {
        command.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::DependencyMissing(self.name()),
            _ => Error::io(format!("failed to start {}", self.name()), e),
        })
    }

    /// Runs to completion, capturing output, optionally bounded by `limit`.
    pub async fn run<I, S>(&self, args: I, limit: Option<Duration>) -> Result<Captured>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command(args);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let child = self.spawn(&mut command)?;
        drop(command);

        self.collect(child, limit).await
    }

    /// Waits for `child` while draining its pipes; kills and reaps it on timeout.
    pub async fn collect(&self, mut child: Child, limit: Option<Duration>) -> Result<Captured> {
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let completion = async {
            let read_out = async {
                let mut buf = Vec::new();
                if let Some(pipe) = stdout.as_mut() {
                    let _ = pipe.read_to_end(&mut buf).await;
                }
                buf
            };
            let read_err = async {
                let mut buf = Vec::new();
                if let Some(pipe) = stderr.as_mut() {
                    let _ = pipe.read_to_end(&mut buf).await;
                }
                buf
            };
            let (status, stdout, stderr) = tokio::join!(child.wait(), read_out, read_err);
            status.map(|status| Captured { status, stdout, stderr })
        };

        let finished = match limit {
            Some(limit) => tokio::time::timeout(limit, completion).await.ok(),
            None => Some(completion.await),
        };

        match finished {
            Some(result) => result.map_err(|e| Error::io(format!("failed to wait for {}", self.name()), e)),
            None => {
                let after = limit.unwrap_or_default();
                warn!(tool = %self.name(), secs = after.as_secs_f32(), "killing unresponsive process");
                if let Err(e) = child.kill().await {
                    warn!(tool = %self.name(), error = %e, "failed to kill child");
                }
                Err(Error::Timeout { tool: self.name(), after })
            }
        }
    }

    /// Whether `<program> --version` succeeds within the probe timeout.
    pub async fn probe(&self) -> bool {
        match self.run(["--version"], Some(PROBE_TIMEOUT)).await {
            Ok(captured) => captured.status.success(),
            Err(e) => {
                debug!(tool = %self.name(), error = %e, "probe failed");
                false
            }
        }
    }
}

/// Exit status and captured output of a finished tool.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_owned()
    }

    /// Converts a non-zero exit into [`Error::ProcessFailure`].
    pub fn ensure_success(self, tool: &Tool) -> Result<Self> {
        if self.status.success() {
            return Ok(self);
        }
        Err(Error::ProcessFailure { tool: tool.name(), code: self.status.code(), detail: self.stderr_lossy() })
    }
}

/// The external programs the orchestrator drives.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub age: Tool,
    pub tar: Tool,
    pub mat2: Tool,
    pub shred: Tool,
    pub clipboard: Tool,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            age: Tool::new(AGE_PROGRAM),
            tar: Tool::new(TAR_PROGRAM),
            mat2: Tool::new(MAT2_PROGRAM),
            shred: Tool::new(SHRED_PROGRAM),
            clipboard: Tool::new(CLIPBOARD_PROGRAM),
        }
    }
}
