//! Archive creation and validated extraction, both driven through the external archiver.

pub mod builder;
pub mod extractor;

pub use builder::{Archive, ArchiveBuilder};
pub use extractor::{ArchiveExtractor, check_members, existing_entries};
