//! Global Configuration Constants
//!
//! Every tunable the orchestrator relies on lives here: the rate-limit
//! policy, the handshake timing used with the encryption tool, the bounded
//! waits for each external process, the artifact naming scheme and the
//! deny-list that protects system directories from destructive operations.
//!
//! ## Timing
//!
//! All external tools are driven with an explicit upper bound except the
//! archiver, which only ever touches a private staging directory and is
//! expected to finish quickly.

use std::time::Duration;

/// Application name used in user interfaces and log targets
pub const APP_NAME: &str = "ageguard";

// === Rate Limiting ===
// Failed decryptions are tracked per target. Once the ledger holds
// `RATE_LIMIT_MAX_ATTEMPTS` failures inside the sliding window, further
// attempts are refused until `RATE_LIMIT_LOCKOUT` has passed since the
// most recent failure.

/// Failures inside the window that trigger a lockout
pub const RATE_LIMIT_MAX_ATTEMPTS: usize = 3;

/// Cool-down measured from the most recent failure
pub const RATE_LIMIT_LOCKOUT: Duration = Duration::from_secs(30);

/// Sliding window; older failures are pruned before counting
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(300);

// === Passphrase Generation ===

/// Number of words in a generated passphrase
///
/// Each draw from the twelve-hundred-word list contributes about ten bits,
/// so 24 words carry roughly 245 bits.
pub const PASSPHRASE_WORDS: usize = 24;

/// Separator placed between passphrase words
pub const PASSPHRASE_SEPARATOR: char = '-';

// === Terminal Handshake ===

/// Pause after spawning the encryption tool before the first write
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Pause between the passphrase entry and its confirmation
pub const CONFIRM_DELAY: Duration = Duration::from_millis(100);

/// Upper bound for a complete encrypt or decrypt run of the tool
pub const CHANNEL_TIMEOUT: Duration = Duration::from_secs(120);

// === Other External Tools ===

/// Upper bound for scrubbing the metadata of a single file
pub const SCRUB_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for `--version` availability probes
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound for handing text to the clipboard helper
pub const CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(1);

/// Overwrite passes used by the secure delete tool
pub const SHRED_PASSES: u32 = 3;

/// Default program names of the external collaborators
pub const AGE_PROGRAM: &str = "age";
pub const TAR_PROGRAM: &str = "tar";
pub const MAT2_PROGRAM: &str = "mat2";
pub const SHRED_PROGRAM: &str = "shred";
pub const CLIPBOARD_PROGRAM: &str = "wl-copy";

// === Artifact Format ===

/// Marker every age file carries in its header line
pub const AGE_MAGIC: &[u8] = b"age-encryption.org/v1";

/// Number of leading bytes searched for [`AGE_MAGIC`]
pub const SIGNATURE_WINDOW: usize = 100;

/// Extension appended to encrypted artifacts
pub const ARTIFACT_EXTENSION: &str = ".age";

/// Extension of the intermediate compressed archive
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Suffix used when a decrypted artifact did not end in [`ARTIFACT_EXTENSION`]
pub const DECRYPTED_SUFFIX: &str = ".decrypted";

/// Name prefix of multi-target bundles, followed by a timestamp
pub const BUNDLE_PREFIX: &str = "encrypted_bundle_";

/// `strftime` layout of the bundle timestamp
pub const BUNDLE_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

/// Prefix of the private staging directories
pub const STAGING_PREFIX: &str = "age_bundle_";

/// Prefix of the scratch directory that receives decrypted payloads
pub const SCRATCH_PREFIX: &str = ".age_scratch_";

/// Leading bytes of a gzip stream
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Size of one tar header block
pub const TAR_BLOCK: usize = 512;

/// Format marker inside a tar header, shared by the ustar, POSIX and GNU formats
pub const TAR_MAGIC: &[u8] = b"ustar";

/// Offset of [`TAR_MAGIC`] within the header block
pub const TAR_MAGIC_OFFSET: usize = 257;

// === Path Safety ===

/// System roots that destructive operations must never touch
///
/// A path is refused when its fully resolved form equals one of these or
/// lives underneath one of them.
pub const SYSTEM_ROOTS: &[&str] = &["/bin", "/sbin", "/usr", "/etc", "/var", "/boot", "/root"];

// === Discovery ===

/// Patterns hidden from the interactive picker
pub const EXCLUDED_PATTERNS: &[&str] = &[
    "target",       // Rust build artifacts
    "node_modules", // Node.js dependencies
    ".git",         // Git repository metadata
    ".cache",       // Application cache files
    ".ssh",         // SSH keys and configuration
    ".gnupg",       // GPG keys and configuration
    "*.tar.gz",     // Leftover intermediates
];
