use super::c_wrappers::page_size;
use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    ptr::{self, NonNull},
};

/// Creates an anonymous shared memory object of `num_bytes` bytes, zero-filled.
pub(crate) fn create(num_bytes: usize) -> io::Result<OwnedFd> {
    let fd = create_anonymous()?;
    let len = libc::off_t::try_from(num_bytes)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let success = unsafe { libc::ftruncate(fd.as_raw_fd(), len) != -1 };
    ok_or_ret_errno!(success => fd)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn create_anonymous() -> io::Result<OwnedFd> {
    let name = b"handlekit-shm\0";
    let (fd, success) = unsafe {
        let fd = libc::memfd_create(name.as_ptr().cast(), libc::MFD_CLOEXEC);
        (fd, fd != -1)
    };
    // SAFETY: freshly created descriptor.
    ok_or_ret_errno!(success => unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn create_anonymous() -> io::Result<OwnedFd> {
    use std::sync::atomic::{AtomicU32, Ordering::Relaxed};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    // The name only has to be unique for the instant between creation and unlinking.
    let name = format!(
        "/handlekit-{}-{}\0",
        std::process::id(),
        COUNTER.fetch_add(1, Relaxed)
    );
    let oflag = libc::O_RDWR | libc::O_CREAT | libc::O_EXCL;
    let fd = unsafe {
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        {
            libc::shm_open(name.as_ptr().cast(), oflag, 0o600 as libc::c_uint)
        }
        #[cfg(not(any(target_os = "macos", target_os = "ios")))]
        {
            libc::shm_open(name.as_ptr().cast(), oflag, 0o600 as libc::mode_t)
        }
    };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: freshly created descriptor.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    // shm_open() sets close-on-exec already.
    unsafe { libc::shm_unlink(name.as_ptr().cast()) };
    Ok(fd)
}

/// A raw view of a shared memory object. Unmapped by [`unmap`].
#[derive(Debug)]
pub(crate) struct RawMapping {
    pub base: NonNull<u8>,
    pub base_len: usize,
    /// Distance from `base` to the byte the caller asked for.
    pub delta: usize,
}

/// Maps `length` bytes of the object, starting at `offset`, for reading and writing.
pub(crate) fn map(fd: &OwnedFd, offset: usize, length: usize) -> io::Result<RawMapping> {
    let delta = offset % page_size();
    let aligned_offset = libc::off_t::try_from(offset - delta)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let base_len = length + delta;
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            base_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            aligned_offset,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    let base = NonNull::new(base.cast::<u8>()).ok_or_else(io::Error::last_os_error)?;
    Ok(RawMapping {
        base,
        base_len,
        delta,
    })
}

/// # Safety
/// The mapping must have been produced by [`map`] and not yet unmapped.
pub(crate) unsafe fn unmap(mapping: &RawMapping) {
    let success = unsafe { libc::munmap(mapping.base.as_ptr().cast(), mapping.base_len) == 0 };
    debug_assert!(success, "munmap failed: {}", io::Error::last_os_error());
}
