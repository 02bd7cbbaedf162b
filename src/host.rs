//! Interface to whatever presents the orchestrator to a user.
//!
//! The core only ever calls these synchronously and never depends on how
//! they are rendered. [`crate::ui::prompt::TerminalHost`] is the terminal
//! implementation used by the binary.

use crate::secret::Passphrase;

/// Answer to the generated-passphrase dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptChoice {
    KeepOriginals,
    DeleteOriginals,
    Cancel,
}

pub trait Host {
    /// Asks for a secret; `None` means the user cancelled.
    fn ask_secret(&self, prompt: &str) -> Option<Passphrase>;

    /// Shows the generated passphrase and asks how to proceed.
    fn present_passphrase(&self, passphrase: &Passphrase, selection: &str, copied: bool) -> EncryptChoice;

    fn confirm(&self, question: &str) -> bool;

    fn notify(&self, title: &str, message: &str);

    fn show_error(&self, title: &str, message: &str);

    /// Places `secret` on the clipboard, returning whether it worked.
    fn copy_to_clipboard(&self, secret: &Passphrase) -> bool;

    /// Long-running work without user interaction has started.
    fn busy(&self, _label: &str) {}

    /// The work announced by [`Host::busy`] has ended.
    fn idle(&self) {}
}
