//! Result codes shared by every handle operation.
//!
//! Operations in this crate never panic on bad input and never tear down shared state because of
//! a local mistake: they report one of the [`Error`] variants below and leave the handle usable.

/// Alias for `Result` with this crate's [`Error`].
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// The error taxonomy of the handle kernel.
///
/// The type is `Copy` so that it can be stored inside a [`Waiter`](crate::waiter::Waiter) and
/// handed to every thread that observes the same wake-up.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad parameters, or an operation on a handle that has already been closed.
    #[error("invalid argument")]
    InvalidArgument,
    /// The operation is impossible given the current state of the object, e.g. writing to a pipe
    /// whose peer is gone or waiting on a signal that can never be raised.
    #[error("failed precondition")]
    FailedPrecondition,
    /// A conflicting two-phase operation, such as the transit of the handle into a message, is
    /// already in progress.
    #[error("resource busy")]
    Busy,
    /// A limit was exceeded, or the caller-supplied buffer is too small. In the latter case the
    /// required size is reported alongside the error.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// A pending wait was explicitly cancelled.
    #[error("cancelled")]
    Cancelled,
    /// Unknown option flags were supplied.
    #[error("unimplemented")]
    Unimplemented,
    /// The handle kind does not provide this capability.
    #[error("operation not supported by this kind of handle")]
    Unsupported,
    /// The awaited signal is already satisfied.
    #[error("already exists")]
    AlreadyExists,
    /// The deadline elapsed before the wait completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Nothing to do right now; retry after waiting on the corresponding signal.
    #[error("should wait")]
    ShouldWait,
    /// Malformed data from a peer or an unexpected platform failure.
    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// Maps an error reported by the operating system into the taxonomy, logging the original.
    pub(crate) fn from_os(context: &str, e: std::io::Error) -> Self {
        log::error!("{context}: {e}");
        match e.kind() {
            std::io::ErrorKind::OutOfMemory => Self::ResourceExhausted,
            std::io::ErrorKind::InvalidInput => Self::InvalidArgument,
            _ => match e.raw_os_error() {
                #[cfg(unix)]
                Some(libc::ENOMEM | libc::EMFILE | libc::ENFILE | libc::ENOSPC) => {
                    Self::ResourceExhausted
                }
                _ => Self::Unknown,
            },
        }
    }
}
