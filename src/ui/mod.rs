//! User interface components for terminal interaction.
//!
//! # Modules
//!
//! - [`display`]: banner, discovered items, batch summaries
//! - [`progress`]: spinner shown while external tools run
//! - [`prompt`]: the terminal [`crate::host::Host`] and interactive pickers

pub mod display;
pub mod progress;
pub mod prompt;
