use std::{
    io,
    os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle},
};
use windows_sys::Win32::{
    Foundation::{DuplicateHandle, DUPLICATE_SAME_ACCESS, HANDLE, INVALID_HANDLE_VALUE},
    System::{SystemInformation::GetSystemInfo, Threading::GetCurrentProcess},
};

/// Duplicates a handle within the current process.
pub(crate) fn duplicate_platform_handle(handle: &OwnedHandle) -> io::Result<OwnedHandle> {
    let mut new_handle = INVALID_HANDLE_VALUE;
    let success = unsafe {
        let proc = GetCurrentProcess();
        DuplicateHandle(
            proc,
            handle.as_raw_handle() as HANDLE,
            proc,
            &mut new_handle,
            0,
            0,
            DUPLICATE_SAME_ACCESS,
        ) != 0
    };
    // SAFETY: DuplicateHandle succeeded, so this is a fresh handle owned by nobody else.
    ok_or_ret_errno!(success => unsafe { OwnedHandle::from_raw_handle(new_handle as RawHandle) })
}

/// The granularity at which views of a section must start.
pub(crate) fn page_size() -> usize {
    let info = unsafe {
        let mut info = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };
    usize::try_from(info.dwAllocationGranularity)
        .ok()
        .filter(|&sz| sz > 0)
        .unwrap_or(64 * 1024)
}
