#![doc = include_str!("../README.md")]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]
// If this was in Cargo.toml, it would cover examples as well
#![warn(
    missing_docs,
    clippy::panic_in_result_fn,
    clippy::missing_assert_message
)]

#[macro_use]
mod macros;

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod message_pipe;
pub mod platform_handle;
pub mod raw_channel;
pub mod shared_buffer;
pub mod signals;
pub mod waiter;

/// Platform-specific system calls: platform handle duplication and shared memory.
///
/// This module houses two modules: `unix` and `windows`, although only one at a time will be
/// visible, depending on which platform the documentation was built on. Builds with the nightly-only
/// `doc_cfg` feature enabled have a badge next to everything platform-specific which specifies the
/// `cfg(...)` conditions for that item to be available.
pub mod os {
    #[cfg(unix)]
    #[cfg_attr(feature = "doc_cfg", doc(cfg(unix)))]
    pub mod unix;
    #[cfg(windows)]
    #[cfg_attr(feature = "doc_cfg", doc(cfg(windows)))]
    pub mod windows;
}

pub use error::{Error, Result};

mod misc;

#[cfg(test)]
#[path = "../tests/index.rs"]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects, clippy::indexing_slicing)]
mod tests;
