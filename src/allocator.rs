//! Global allocator for the binary.
//!
//! Staging copies and archive listings allocate many short-lived buffers;
//! mimalloc handles that pattern well.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
