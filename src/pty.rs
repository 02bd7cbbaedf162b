//! Passphrase delivery to the encryption tool over a pseudo-terminal.
//!
//! The tool refuses to read a passphrase from anything but a terminal, so
//! the channel fabricates one:
//!
//! 1. open a master/slave pair
//! 2. spawn the tool in a new session with the slave as stdin and
//!    controlling terminal, stdout and stderr on ordinary pipes
//! 3. close the parent's copy of the slave
//! 4. play the [`Handshake`] for the mode into the master
//! 5. wait with a bound, killing and reaping the child on expiry
//! 6. accept only a zero exit status together with an existing output file
//!
//! Both descriptors are [`OwnedFd`]s and the output is held by a
//! [`PartialOutput`] guard, so every early return releases the terminal and
//! removes whatever the tool managed to write.

use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::{CHANNEL_TIMEOUT, CONFIRM_DELAY, SETTLE_DELAY};
use crate::error::{Error, Result};
use crate::file::operations::PartialOutput;
use crate::secret::Passphrase;
use crate::tool::Tool;
use crate::types::Mode;

/// Scripted timing of one passphrase exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// Pause before the first entry so the tool can reach its prompt
    pub settle: Duration,
    /// How many times the passphrase line is written
    pub entries: usize,
    /// Pause between consecutive entries
    pub gap: Duration,
}

impl Handshake {
    /// Encryption asks for entry plus confirmation, decryption asks once.
    pub const fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Encrypt => Self { settle: SETTLE_DELAY, entries: 2, gap: CONFIRM_DELAY },
            Mode::Decrypt => Self { settle: SETTLE_DELAY, entries: 1, gap: CONFIRM_DELAY },
        }
    }
}

/// Master and slave ends of a freshly allocated pseudo-terminal.
struct Pty {
    master: OwnedFd,
    slave: OwnedFd,
}

impl Pty {
    fn open() -> io::Result<Self> {
        let mut master: RawFd = -1;
        let mut slave: RawFd = -1;

        // SAFETY: both out-pointers are valid; name, termios and winsize may be null.
        let rc = unsafe { libc::openpty(&mut master, &mut slave, std::ptr::null_mut(), std::ptr::null(), std::ptr::null()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: openpty succeeded, so both descriptors are open and owned by nobody else.
        let pty = unsafe { Self { master: OwnedFd::from_raw_fd(master), slave: OwnedFd::from_raw_fd(slave) } };
        set_cloexec(&pty.master)?;
        set_cloexec(&pty.slave)?;
        Ok(pty)
    }
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    // SAFETY: fd is a valid open descriptor for the duration of the call.
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc == -1 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

/// Drives the encryption tool through a pseudo-terminal.
#[derive(Clone, Debug)]
pub struct PtyChannel {
    tool: Tool,
    timeout: Duration,
    handshake: Option<Handshake>,
}

impl PtyChannel {
    pub fn new(tool: Tool) -> Self {
        Self { tool, timeout: CHANNEL_TIMEOUT, handshake: None }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the per-mode handshake table with a fixed script.
    #[must_use]
    pub fn with_handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = Some(handshake);
        self
    }

    #[inline]
    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    fn handshake(&self, mode: Mode) -> Handshake {
        self.handshake.unwrap_or_else(|| Handshake::for_mode(mode))
    }

    fn arguments<'a>(mode: Mode, input: &'a Path, output: &'a Path) -> [&'a OsStr; 4] {
        let flag: &OsStr = match mode {
            Mode::Encrypt => "-p".as_ref(),
            Mode::Decrypt => "-d".as_ref(),
        };
        [flag, "-o".as_ref(), output.as_os_str(), input.as_os_str()]
    }

    /// Runs the tool on `input`, producing `output`, answering its prompts with `passphrase`.
    ///
    /// On any error `output` does not exist afterwards.
    pub async fn run(&self, mode: Mode, input: &Path, output: &Path, passphrase: &Passphrase) -> Result<()> {
        let handshake = self.handshake(mode);
        let partial = PartialOutput::new(output);
        let Pty { master, slave } = Pty::open().map_err(|e| Error::io("cannot allocate pseudo-terminal", e))?;

        let mut command = self.tool.command(Self::arguments(mode, input, output));
        command.stdin(Stdio::from(slave)).stdout(Stdio::piped()).stderr(Stdio::piped());
        // SAFETY: only async-signal-safe calls run between fork and exec.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                // Best effort: tools that only read stdin still work without a controlling terminal.
                libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY, 0);
                Ok(())
            });
        }

        let child = self.tool.spawn(&mut command)?;
        drop(command);
        debug!(tool = %self.tool.name(), %mode, pid = child.id(), "tool attached to pseudo-terminal");

        let mut terminal = tokio::fs::File::from_std(File::from(master));
        tokio::time::sleep(handshake.settle).await;
        for entry in 0..handshake.entries {
            if entry > 0 {
                tokio::time::sleep(handshake.gap).await;
            }
            let line = passphrase.line();
            if let Err(e) = async {
                terminal.write_all(&line).await?;
                terminal.flush().await
            }
            .await
            {
                debug!(tool = %self.tool.name(), entry, error = %e, "terminal write failed");
                break;
            }
        }

        let outcome = self.tool.collect(child, Some(self.timeout)).await;
        drop(terminal);

        let captured = outcome?.ensure_success(&self.tool).inspect_err(|e| warn!(%mode, error = %e, "tool exited with failure"))?;

        if !partial.path().exists() {
            warn!(tool = %self.tool.name(), %mode, output = %output.display(), "tool reported success without output");
            return Err(Error::ProcessFailure { tool: self.tool.name(), code: captured.status.code(), detail: "no output file produced".to_owned() });
        }

        let output = partial.keep();
        info!(%mode, output = %output.display(), "passphrase handshake completed");
        Ok(())
    }
}
