//! Windows-specific system calls: handle duplication and pagefile-backed section objects.
#![cfg_attr(not(windows), allow(warnings))]

pub(crate) mod c_wrappers;
pub(crate) mod shared_memory;

use std::os::windows::io::OwnedHandle;

/// The handle type moved across a transport.
pub type PlatformHandle = OwnedHandle;
