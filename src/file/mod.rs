//! Filesystem helpers: path safety, artifact naming, deletion and discovery.

pub mod discovery;
pub mod operations;
pub mod validation;

pub use discovery::discover;
pub use operations::{PartialOutput, artifact_path, bundle_name, decrypted_path, is_tar_gzip, remove_original, verify_signature};
pub use validation::PathGuard;
