use std::sync::{Mutex, MutexGuard};

pub(crate) static LOCK_POISON: &str = "unexpected lock poison";

/// Locks a mutex, treating poison as a bug in this crate.
#[inline]
#[track_caller]
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect(LOCK_POISON)
}

/// Wire payloads are padded to this many bytes.
pub(crate) const ALIGNMENT: usize = 8;

/// Rounds `n` up to the next multiple of [`ALIGNMENT`].
#[inline]
pub(crate) const fn align_up(n: usize) -> usize { (n + (ALIGNMENT - 1)) & !(ALIGNMENT - 1) }

pub(crate) trait ToU32 {
    /// Converts to `u32`, saturating; every size this is used on is bounded by the configured
    /// limits, which fit comfortably.
    fn to_u32(self) -> u32;
}
impl ToU32 for usize {
    #[inline(always)]
    fn to_u32(self) -> u32 { u32::try_from(self).unwrap_or(u32::MAX) }
}
