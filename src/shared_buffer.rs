//! Shared memory regions and the handle kind that refers to one.
//!
//! A [`SharedBufferDispatcher`] is a handle to a [`SharedMemoryRegion`]. Duplicating the handle
//! shares the region; mapping it produces a [`SharedBufferMapping`] that stays valid for as long
//! as it exists, regardless of what happens to the handle afterwards. Sent over a channel, the
//! region travels as a platform handle, so both processes see the same memory.

use crate::{
    channel::Channel,
    dispatcher::{Dispatcher, DispatcherImpl, DispatcherType},
    platform_handle::{duplicate_platform_handle, PlatformHandle},
    Error, Result,
};
use std::{
    fmt::{self, Debug, Formatter},
    slice,
    sync::Arc,
};

impmod! {shared_memory, self as os_shm, RawMapping}

/// Options for [`SharedBufferDispatcher::create()`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CreateSharedBufferOptions {
    /// Creation flags. None are currently defined; any bit set yields
    /// [`Unimplemented`](Error::Unimplemented).
    pub flags: u32,
}
impl CreateSharedBufferOptions {
    const KNOWN_FLAGS: u32 = 0;
    fn validate(&self) -> Result {
        if self.flags & !Self::KNOWN_FLAGS != 0 {
            return Err(Error::Unimplemented);
        }
        Ok(())
    }
}

/// Options for [`Dispatcher::duplicate_buffer_handle()`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DuplicateBufferHandleOptions {
    /// Duplication flags. None are currently defined; any bit set yields
    /// [`Unimplemented`](Error::Unimplemented).
    pub flags: u32,
}
impl DuplicateBufferHandleOptions {
    const KNOWN_FLAGS: u32 = 0;
    fn validate(&self) -> Result {
        if self.flags & !Self::KNOWN_FLAGS != 0 {
            return Err(Error::Unimplemented);
        }
        Ok(())
    }
}

/// Flags accepted by [`Dispatcher::map_buffer()`]. None are currently defined.
const KNOWN_MAP_BUFFER_FLAGS: u32 = 0;

/// An OS shared memory object of a fixed size.
pub struct SharedMemoryRegion {
    handle: PlatformHandle,
    num_bytes: usize,
}
impl SharedMemoryRegion {
    /// Creates a zero-filled region of `num_bytes` bytes.
    pub fn create(num_bytes: usize) -> Result<Self> {
        let handle = os_shm::create(num_bytes)
            .map_err(|e| Error::from_os("failed to create shared memory", e))?;
        Ok(Self { handle, num_bytes })
    }
    /// Adopts an existing shared memory object of `num_bytes` bytes.
    pub fn from_platform_handle(num_bytes: usize, handle: PlatformHandle) -> Self {
        Self { handle, num_bytes }
    }

    /// Size of the region.
    #[inline]
    pub fn num_bytes(&self) -> usize { self.num_bytes }

    /// Whether `length` bytes starting at `offset` lie within the region and `length` is nonzero.
    pub fn is_valid_map(&self, offset: usize, length: usize) -> bool {
        length != 0 && offset.checked_add(length).is_some_and(|end| end <= self.num_bytes)
    }
    /// Maps `length` bytes starting at `offset`.
    pub fn map(&self, offset: usize, length: usize) -> Result<SharedBufferMapping> {
        if !self.is_valid_map(offset, length) {
            return Err(Error::InvalidArgument);
        }
        let raw = os_shm::map(&self.handle, offset, length)
            .map_err(|e| Error::from_os("failed to map shared memory", e))?;
        Ok(SharedBufferMapping { raw, length })
    }

    /// Borrows the OS object.
    #[inline]
    pub fn platform_handle(&self) -> &PlatformHandle { &self.handle }
    /// Gives up the OS object.
    #[inline]
    pub fn into_platform_handle(self) -> PlatformHandle { self.handle }
}
impl Debug for SharedMemoryRegion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemoryRegion")
            .field("handle", &self.handle)
            .field("num_bytes", &self.num_bytes)
            .finish()
    }
}

/// A mapped view of a shared memory region. Unmapped when dropped.
pub struct SharedBufferMapping {
    raw: RawMapping,
    length: usize,
}
// SAFETY: the mapping is plain shared memory, not tied to the thread that created it. Access is
// only through `&self`/`&mut self` methods, as for any owned buffer.
unsafe impl Send for SharedBufferMapping {}
unsafe impl Sync for SharedBufferMapping {}
impl SharedBufferMapping {
    /// Length of the mapped range.
    #[inline]
    pub fn len(&self) -> usize { self.length }
    /// Whether the mapped range is empty, which it never is.
    #[inline]
    pub fn is_empty(&self) -> bool { self.length == 0 }
    /// Address of the first mapped byte.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        // SAFETY: `delta` is within the mapped range by construction.
        unsafe { self.raw.base.as_ptr().add(self.raw.delta) }
    }

    /// Copies `bytes` into the mapping at `offset`.
    ///
    /// Other mappings of the same region, in this process or another, may be accessing the same
    /// memory concurrently; no synchronization is performed.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> Result {
        if offset.checked_add(bytes.len()).map_or(true, |end| end > self.length) {
            return Err(Error::InvalidArgument);
        }
        // SAFETY: bounds checked above; the source is a distinct Rust allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.as_ptr().add(offset), bytes.len())
        };
        Ok(())
    }
    /// Copies bytes from the mapping at `offset` into `buffer`.
    pub fn read_at(&self, offset: usize, buffer: &mut [u8]) -> Result {
        if offset.checked_add(buffer.len()).map_or(true, |end| end > self.length) {
            return Err(Error::InvalidArgument);
        }
        // SAFETY: as above.
        unsafe {
            let src = self.as_ptr().add(offset);
            std::ptr::copy_nonoverlapping(src, buffer.as_mut_ptr(), buffer.len());
        };
        Ok(())
    }
    /// Views the mapping as a byte slice.
    ///
    /// # Safety
    /// Nothing may write to the mapped memory, through any mapping in any process, while the slice
    /// is alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.as_ptr(), self.length) }
    }
}
impl Drop for SharedBufferMapping {
    fn drop(&mut self) {
        // SAFETY: produced by `map` and unmapped only here.
        unsafe { os_shm::unmap(&self.raw) };
    }
}
impl Debug for SharedBufferMapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBufferMapping")
            .field("address", &self.as_ptr())
            .field("length", &self.length)
            .finish()
    }
}

const SERIALIZED_SIZE: usize = std::mem::size_of::<u64>();

/// A handle to a shared memory region.
#[derive(Debug)]
pub struct SharedBufferDispatcher {
    region: Option<Arc<SharedMemoryRegion>>,
}
impl SharedBufferDispatcher {
    /// Creates a zero-filled region of `num_bytes` bytes and returns a handle to it.
    ///
    /// Fails with [`InvalidArgument`](Error::InvalidArgument) for an empty region, with
    /// [`ResourceExhausted`](Error::ResourceExhausted) above the configured maximum size, and with
    /// [`Unimplemented`](Error::Unimplemented) for unknown flags.
    pub fn create(
        options: &CreateSharedBufferOptions,
        num_bytes: usize,
    ) -> Result<Arc<Dispatcher>> {
        options.validate()?;
        if num_bytes == 0 {
            return Err(Error::InvalidArgument);
        }
        if num_bytes > crate::config::get().max_shared_memory_num_bytes {
            return Err(Error::ResourceExhausted);
        }
        let region = SharedMemoryRegion::create(num_bytes)?;
        Ok(Self::from_region(Arc::new(region)))
    }
    /// Wraps an existing shared memory object of `num_bytes` bytes.
    pub fn create_from_platform_handle(
        num_bytes: usize,
        handle: PlatformHandle,
    ) -> Result<Arc<Dispatcher>> {
        if num_bytes == 0 {
            return Err(Error::InvalidArgument);
        }
        let region = SharedMemoryRegion::from_platform_handle(num_bytes, handle);
        Ok(Self::from_region(Arc::new(region)))
    }
    fn from_region(region: Arc<SharedMemoryRegion>) -> Arc<Dispatcher> {
        Dispatcher::new(Box::new(Self {
            region: Some(region),
        }))
    }

    pub(crate) fn deserialize(
        _channel: &Arc<Channel>,
        source: &[u8],
        platform_handles: Vec<PlatformHandle>,
    ) -> Option<Arc<Dispatcher>> {
        let num_bytes = source
            .get(..SERIALIZED_SIZE)
            .and_then(|raw| raw.try_into().ok())
            .map(u64::from_le_bytes)
            .and_then(|n| usize::try_from(n).ok());
        let (Some(num_bytes), 1) = (num_bytes, platform_handles.len()) else {
            log::warn!(
                "invalid serialized shared buffer ({} bytes, {} platform handles)",
                source.len(),
                platform_handles.len()
            );
            return None;
        };
        let handle = platform_handles.into_iter().next()?;
        match Self::create_from_platform_handle(num_bytes, handle) {
            Ok(dispatcher) => Some(dispatcher),
            Err(e) => {
                log::warn!("failed to reconstitute shared buffer: {e}");
                None
            }
        }
    }

    fn region(&self) -> Result<&Arc<SharedMemoryRegion>> {
        self.region.as_ref().ok_or(Error::InvalidArgument)
    }
}
impl DispatcherImpl for SharedBufferDispatcher {
    fn dispatcher_type(&self) -> DispatcherType { DispatcherType::SharedBuffer }
    fn close(&mut self) { self.region = None; }
    fn create_equivalent_and_close(&mut self) -> Box<dyn DispatcherImpl> {
        Box::new(Self {
            region: self.region.take(),
        })
    }

    fn duplicate_buffer_handle(
        &mut self,
        options: &DuplicateBufferHandleOptions,
    ) -> Result<Box<dyn DispatcherImpl>> {
        options.validate()?;
        Ok(Box::new(Self {
            region: Some(Arc::clone(self.region()?)),
        }))
    }
    fn map_buffer(
        &mut self,
        offset: usize,
        length: usize,
        flags: u32,
    ) -> Result<SharedBufferMapping> {
        if flags & !KNOWN_MAP_BUFFER_FLAGS != 0 {
            return Err(Error::Unimplemented);
        }
        if length > crate::config::get().max_mapping_size {
            return Err(Error::ResourceExhausted);
        }
        self.region()?.map(offset, length)
    }

    fn start_serialize(&self, _channel: &Arc<Channel>) -> (usize, usize) { (SERIALIZED_SIZE, 1) }
    fn end_serialize_and_close(
        &mut self,
        _channel: &Arc<Channel>,
        destination: &mut [u8],
        platform_handles: &mut Vec<PlatformHandle>,
    ) -> Option<usize> {
        let region = self.region.take()?;
        let num_bytes = region.num_bytes() as u64;
        // Sole owner: the OS object itself can go. Otherwise other handles still need it.
        let handle = match Arc::try_unwrap(region) {
            Ok(region) => region.into_platform_handle(),
            Err(shared) => match duplicate_platform_handle(shared.platform_handle()) {
                Ok(handle) => handle,
                Err(e) => {
                    log::warn!("failed to duplicate shared buffer for transit: {e}");
                    return None;
                }
            },
        };
        destination
            .get_mut(..SERIALIZED_SIZE)?
            .copy_from_slice(&num_bytes.to_le_bytes());
        platform_handles.push(handle);
        Some(SERIALIZED_SIZE)
    }
}
