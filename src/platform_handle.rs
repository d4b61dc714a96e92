//! Raw OS handles, and the handle kind that carries one.

use crate::{
    channel::Channel,
    dispatcher::{Dispatcher, DispatcherImpl, DispatcherType},
    Error, Result,
};
use std::{io, sync::Arc};

impmod! {c_wrappers, duplicate_platform_handle as duplicate_raw}

/// An owned OS handle that can travel alongside a message: a file descriptor on Unix, a `HANDLE`
/// on Windows.
#[cfg(unix)]
pub type PlatformHandle = crate::os::unix::PlatformHandle;
/// An owned OS handle that can travel alongside a message: a file descriptor on Unix, a `HANDLE`
/// on Windows.
#[cfg(windows)]
pub type PlatformHandle = crate::os::windows::PlatformHandle;

/// Creates another handle to the same OS object. On Unix, the copy has the close-on-exec flag
/// set.
pub fn duplicate_platform_handle(handle: &PlatformHandle) -> io::Result<PlatformHandle> {
    duplicate_raw(handle)
}

/// A handle wrapping a raw OS handle, so that it can be attached to messages.
#[derive(Debug)]
pub struct PlatformHandleDispatcher {
    handle: Option<PlatformHandle>,
}
impl PlatformHandleDispatcher {
    /// Wraps `handle`.
    pub fn create(handle: PlatformHandle) -> Arc<Dispatcher> {
        Dispatcher::new(Box::new(Self {
            handle: Some(handle),
        }))
    }

    pub(crate) fn deserialize(
        _channel: &Arc<Channel>,
        source: &[u8],
        platform_handles: Vec<PlatformHandle>,
    ) -> Option<Arc<Dispatcher>> {
        if !source.is_empty() || platform_handles.len() != 1 {
            log::warn!(
                "invalid serialized platform handle ({} bytes, {} platform handles)",
                source.len(),
                platform_handles.len()
            );
            return None;
        }
        platform_handles.into_iter().next().map(Self::create)
    }
}
impl DispatcherImpl for PlatformHandleDispatcher {
    fn dispatcher_type(&self) -> DispatcherType { DispatcherType::PlatformHandle }
    fn close(&mut self) { self.handle = None; }
    fn create_equivalent_and_close(&mut self) -> Box<dyn DispatcherImpl> {
        Box::new(Self {
            handle: self.handle.take(),
        })
    }
    fn pass_platform_handle(&mut self) -> Result<PlatformHandle> {
        self.handle.take().ok_or(Error::InvalidArgument)
    }
    fn start_serialize(&self, _channel: &Arc<Channel>) -> (usize, usize) { (0, 1) }
    fn end_serialize_and_close(
        &mut self,
        _channel: &Arc<Channel>,
        _destination: &mut [u8],
        platform_handles: &mut Vec<PlatformHandle>,
    ) -> Option<usize> {
        platform_handles.push(self.handle.take()?);
        Some(0)
    }
}
