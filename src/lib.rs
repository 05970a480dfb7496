// Allow pre-existing clippy lints across the codebase
#![allow(
    clippy::collapsible_if,
    clippy::manual_div_ceil,
    clippy::manual_range_contains,
    clippy::needless_range_loop,
    clippy::len_without_is_empty,
    clippy::too_many_arguments
)]

/// Use mimalloc as the global allocator.
/// 2-3x faster than glibc malloc for small allocations,
/// better thread-local caching, and reduced fragmentation.
/// Critical for the shuffle path which materializes many small records.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod buffer;
pub mod common;
pub mod error;
pub mod input;
pub mod job;
pub mod merge;

pub use error::{Error, Result};

/// Engine version reported by `--version` and the startup log.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
