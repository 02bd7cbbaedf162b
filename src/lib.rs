//! ageguard - passphrase-based encryption of files and folders with age.
//!
//! The orchestrator drives external tools and adds the safety the tools
//! themselves do not provide:
//! - passphrases reach `age` only through a pseudo-terminal
//! - archive members are validated before extraction
//! - repeated failed decryptions of a target are rate limited
//! - staged copies can have their metadata scrubbed with `mat2`
//! - originals can be shredded once the artifact exists

pub mod app;
pub mod archive;
pub mod config;
pub mod error;
pub mod file;
pub mod host;
pub mod limiter;
pub mod passphrase;
pub mod processor;
pub mod pty;
pub mod secret;
pub mod tool;
pub mod types;
pub mod ui;
pub mod wordlist;

pub use error::{Error, Result};
