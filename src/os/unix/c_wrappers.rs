use libc::c_int;
use std::{
    io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
};

pub(super) unsafe fn fcntl_int(fd: BorrowedFd<'_>, cmd: c_int, val: c_int) -> io::Result<c_int> {
    let val = unsafe { libc::fcntl(fd.as_raw_fd(), cmd, val) };
    ok_or_ret_errno!(val != -1 => val)
}

/// Duplicates a descriptor with the close-on-exec flag set on the copy.
pub(crate) fn duplicate_platform_handle(fd: &OwnedFd) -> io::Result<OwnedFd> {
    let fd = fd.as_fd();
    #[cfg(target_os = "linux")]
    {
        let new_fd = unsafe { fcntl_int(fd, libc::F_DUPFD_CLOEXEC, 0)? };
        // SAFETY: the descriptor was just created by the kernel and is owned by nobody else.
        Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        let (val, success) = unsafe {
            let ret = libc::dup(fd.as_raw_fd());
            (ret, ret != -1)
        };
        let new_fd = ok_or_ret_errno!(success => unsafe { OwnedFd::from_raw_fd(val) })?;
        set_cloexec(new_fd.as_fd())?;
        Ok(new_fd)
    }
}

#[cfg(not(target_os = "linux"))]
fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = unsafe { fcntl_int(fd, libc::F_GETFD, 0)? };
    unsafe { fcntl_int(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC)? };
    Ok(())
}

/// The granularity at which mappings must start.
pub(crate) fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(sz).ok().filter(|&sz| sz > 0).unwrap_or(4096)
}
