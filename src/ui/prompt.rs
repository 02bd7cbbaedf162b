//! Terminal implementation of [`Host`] plus the interactive pickers.

use std::cell::RefCell;
use std::io::Write;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Result, anyhow, ensure};
use console::style;
use inquire::{Confirm, InquireError, MultiSelect, Password, PasswordDisplayMode, Select};
use strum::IntoEnumIterator;
use tracing::{debug, warn};

use crate::config::CLIPBOARD_TIMEOUT;
use crate::host::{EncryptChoice, Host};
use crate::secret::Passphrase;
use crate::tool::Tool;
use crate::types::{Mode, Target};
use crate::ui::progress::Spinner;

const KEEP: &str = "Encrypt and keep originals";
const DELETE: &str = "Encrypt and securely delete originals";
const CANCEL: &str = "Cancel";

pub struct TerminalHost {
    clipboard: Tool,
    spinner: RefCell<Option<Spinner>>,
}

impl TerminalHost {
    pub fn new(clipboard: Tool) -> Self {
        Self { clipboard, spinner: RefCell::new(None) }
    }

    pub fn select_mode(&self) -> Result<Mode> {
        let modes: Vec<Mode> = Mode::iter().collect();
        Select::new("Select operation", modes).prompt().map_err(|e| anyhow!("mode selection failed: {e}"))
    }

    /// Lets the user tick any number of `targets`.
    pub fn select_targets(&self, targets: Vec<Target>) -> Result<Vec<Target>> {
        ensure!(!targets.is_empty(), "nothing eligible in the current directory");

        let labels: Vec<String> = targets.iter().map(|t| t.path().file_name().map_or_else(|| t.path().display().to_string(), |n| n.to_string_lossy().into_owned())).collect();
        let picked = MultiSelect::new("Select items", labels).raw_prompt().map_err(|e| anyhow!("selection failed: {e}"))?;
        ensure!(!picked.is_empty(), "nothing selected");

        let mut slots: Vec<Option<Target>> = targets.into_iter().map(Some).collect();
        Ok(picked.into_iter().filter_map(|option| slots.get_mut(option.index).and_then(Option::take)).collect())
    }

    fn stop_spinner(&self) {
        self.spinner.borrow_mut().take();
    }

    fn clipboard_copy(&self, secret: &Passphrase) -> std::io::Result<bool> {
        let mut child = self.clipboard.std_command::<[&str; 0], &str>([]).stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(secret.expose_secret().as_bytes())?;
        }

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status.success());
            }
            if started.elapsed() >= CLIPBOARD_TIMEOUT {
                // The helper may keep serving the selection in the foreground.
                warn!(tool = %self.clipboard.name(), "clipboard helper still running, leaving it");
                return Ok(true);
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    }
}

fn cancelled(e: &InquireError) -> bool {
    matches!(e, InquireError::OperationCanceled | InquireError::OperationInterrupted)
}

impl Host for TerminalHost {
    fn ask_secret(&self, prompt: &str) -> Option<Passphrase> {
        self.stop_spinner();
        match Password::new(prompt).without_confirmation().with_display_mode(PasswordDisplayMode::Masked).prompt() {
            Ok(secret) => Some(Passphrase::from_string(secret)),
            Err(e) => {
                if !cancelled(&e) {
                    warn!(error = %e, "passphrase prompt failed");
                }
                None
            }
        }
    }

    fn present_passphrase(&self, passphrase: &Passphrase, selection: &str, copied: bool) -> EncryptChoice {
        self.stop_spinner();
        println!();
        println!("{}", style(selection).bold());
        println!("{}", style("Your passphrase (write it down, it cannot be recovered):").yellow());
        println!();
        println!("  {}", style(passphrase.expose_secret()).cyan().bold());
        println!();
        if copied {
            println!("{}", style("Copied to clipboard.").dim());
        }

        match Select::new("How do you want to proceed?", vec![KEEP, DELETE, CANCEL]).prompt() {
            Ok(KEEP) => EncryptChoice::KeepOriginals,
            Ok(DELETE) => EncryptChoice::DeleteOriginals,
            Ok(_) => EncryptChoice::Cancel,
            Err(e) => {
                debug!(error = %e, "passphrase dialog closed");
                EncryptChoice::Cancel
            }
        }
    }

    fn confirm(&self, question: &str) -> bool {
        self.stop_spinner();
        Confirm::new(question).with_default(false).prompt().unwrap_or(false)
    }

    fn notify(&self, title: &str, message: &str) {
        self.stop_spinner();
        println!("{} {} {}", style("✓").green(), style(title).bold(), message);
    }

    fn show_error(&self, title: &str, message: &str) {
        self.stop_spinner();
        eprintln!("{} {} {}", style("✗").red(), style(title).red().bold(), message);
    }

    fn copy_to_clipboard(&self, secret: &Passphrase) -> bool {
        match self.clipboard_copy(secret) {
            Ok(copied) => copied,
            Err(e) => {
                debug!(tool = %self.clipboard.name(), error = %e, "clipboard unavailable");
                false
            }
        }
    }

    fn busy(&self, label: &str) {
        *self.spinner.borrow_mut() = Some(Spinner::new(label));
    }

    fn idle(&self) {
        self.stop_spinner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clipboard_receives_secret_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("clip");
        let script = dir.path().join("clip.sh");
        std::fs::write(&script, format!("cat > '{}'\n", sink.display())).unwrap();
        let host = TerminalHost::new(Tool::new("sh").with_args([script.into_os_string()]));

        assert!(host.copy_to_clipboard(&Passphrase::new("amber-fox")));
        assert_eq!(std::fs::read_to_string(sink).unwrap(), "amber-fox");
    }

    #[test]
    fn test_missing_clipboard_helper() {
        let host = TerminalHost::new(Tool::new("ageguard-missing-clipboard"));
        assert!(!host.copy_to_clipboard(&Passphrase::new("amber-fox")));
    }
}
