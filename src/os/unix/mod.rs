//! Unix-specific system calls: descriptor duplication and shared memory.
//!
//! Shared memory objects are anonymous: `memfd_create` on Linux and Android, and an immediately
//! unlinked POSIX shared memory object elsewhere. Either way the descriptor is the only way to reach
//! the object, which is what allows it to be moved across processes as a platform handle.

pub(crate) mod c_wrappers;
pub(crate) mod shared_memory;

use std::os::fd::OwnedFd;

/// The descriptor type moved across a transport.
pub type PlatformHandle = OwnedFd;
