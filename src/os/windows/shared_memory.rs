use super::c_wrappers::page_size;
use std::{
    io,
    os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle},
    ptr::{self, NonNull},
};
use windows_sys::Win32::{
    Foundation::{HANDLE, INVALID_HANDLE_VALUE},
    System::Memory::{
        CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ, FILE_MAP_WRITE,
        MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
    },
};

/// Creates an unnamed, pagefile-backed section of `num_bytes` bytes, zero-filled.
pub(crate) fn create(num_bytes: usize) -> io::Result<OwnedHandle> {
    let num_bytes = num_bytes as u64;
    let handle = unsafe {
        CreateFileMappingW(
            INVALID_HANDLE_VALUE,
            ptr::null(),
            PAGE_READWRITE,
            (num_bytes >> 32) as u32,
            num_bytes as u32,
            ptr::null(),
        )
    };
    // SAFETY: nonzero means a fresh handle owned by nobody else.
    ok_or_ret_errno!(handle != 0 => unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) })
}

/// A raw view of a section. Unmapped by [`unmap`].
#[derive(Debug)]
pub(crate) struct RawMapping {
    pub base: NonNull<u8>,
    pub base_len: usize,
    /// Distance from `base` to the byte the caller asked for.
    pub delta: usize,
}

/// Maps `length` bytes of the section, starting at `offset`, for reading and writing.
pub(crate) fn map(handle: &OwnedHandle, offset: usize, length: usize) -> io::Result<RawMapping> {
    let delta = offset % page_size();
    let aligned_offset = (offset - delta) as u64;
    let base_len = length + delta;
    let view = unsafe {
        MapViewOfFile(
            handle.as_raw_handle() as HANDLE,
            FILE_MAP_READ | FILE_MAP_WRITE,
            (aligned_offset >> 32) as u32,
            aligned_offset as u32,
            base_len,
        )
    };
    let base = NonNull::new(view.Value.cast::<u8>()).ok_or_else(io::Error::last_os_error)?;
    Ok(RawMapping {
        base,
        base_len,
        delta,
    })
}

/// # Safety
/// The mapping must have been produced by [`map`] and not yet unmapped.
pub(crate) unsafe fn unmap(mapping: &RawMapping) {
    let success = unsafe {
        UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
            Value: mapping.base.as_ptr().cast(),
        }) != 0
    };
    debug_assert!(success, "UnmapViewOfFile failed: {}", io::Error::last_os_error());
}
