//! The handle abstraction.
//!
//! A [`Dispatcher`] is the reference-counted, lockable body behind every user-visible handle. It
//! owns the bookkeeping every handle kind shares (whether it is closed, whether it is currently
//! being moved into a message) and forwards everything else to the kind-specific implementation,
//! which only overrides the operations it actually supports. The rest report
//! [`Unsupported`](Error::Unsupported).
//!
//! ## Transit
//! Attaching a handle to a message moves it: the handle the caller holds ends up closed, and a
//! fresh dispatcher with the same underlying state travels with the message. Since any number of
//! threads may hold the same `Arc<Dispatcher>`, the move is split into phases to make sure exactly
//! one of them wins: [`begin_transit()`](Dispatcher::begin_transit) marks the handle (failing with
//! [`Busy`](Error::Busy) if another thread got there first), and the returned
//! [`DispatcherTransport`] then either [completes](DispatcherTransport::complete_transit_and_close)
//! the move or [cancels](DispatcherTransport::cancel_transit) it.

use crate::{
    channel::Channel,
    message_pipe::{MessagePipe, MessagePipeDispatcher},
    misc::lock,
    platform_handle::{PlatformHandle, PlatformHandleDispatcher},
    shared_buffer::{DuplicateBufferHandleOptions, SharedBufferDispatcher, SharedBufferMapping},
    signals::{HandleSignals, HandleSignalsState},
    waiter::Waiter,
    Error, Result,
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, Mutex, PoisonError},
};

wire_enum! {
    /// The kind of a handle, as recorded in serialized handle tables.
    pub enum DispatcherType: u32 {
        /// One endpoint of a message pipe.
        MessagePipe = 1,
        /// A shared memory region.
        SharedBuffer = 4,
        /// A raw platform handle.
        PlatformHandle = 5,
    }
}

bitflags::bitflags! {
    /// Options for [`Dispatcher::read_message()`].
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ReadMessageFlags: u32 {
        /// If the message at the head of the queue does not fit, drop it instead of leaving it
        /// there for a retry with a bigger buffer.
        const MAY_DISCARD = 1 << 0;
    }
}

/// Sizes of a message, as reported by [`Dispatcher::read_message()`].
///
/// Filled in on success and when the buffer is too small, so that the caller can retry with
/// enough room.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageSize {
    /// Payload length in bytes.
    pub num_bytes: usize,
    /// Number of attached handles.
    pub num_handles: usize,
}

/// The operations a kind of handle may implement.
///
/// Every method is called with the dispatcher's lock held and only while the dispatcher is open
/// and not in transit; the defaults are what a handle kind gets for a capability it lacks.
pub(crate) trait DispatcherImpl: Send + Debug {
    fn dispatcher_type(&self) -> DispatcherType;

    /// Wakes every registered waiter with [`Cancelled`](Error::Cancelled).
    fn cancel_all_waiters(&mut self) {}
    /// Releases the underlying resources.
    fn close(&mut self) {}
    /// Moves the underlying resources into a new implementation, leaving `self` an empty husk that
    /// will never be called again.
    fn create_equivalent_and_close(&mut self) -> Box<dyn DispatcherImpl>;

    fn write_message(&mut self, _bytes: &[u8], _transports: Vec<DispatcherTransport>) -> Result {
        Err(Error::Unsupported)
    }
    fn read_message(
        &mut self,
        _buffer: &mut [u8],
        _size: &mut MessageSize,
        _max_handles: usize,
        _flags: ReadMessageFlags,
    ) -> Result<Vec<Option<Arc<Dispatcher>>>> {
        Err(Error::Unsupported)
    }

    fn write_data(&mut self, _bytes: &[u8], _all_or_none: bool) -> Result<usize> {
        Err(Error::Unsupported)
    }
    fn begin_write_data(&mut self, _min_num_bytes: usize) -> Result<usize> {
        Err(Error::Unsupported)
    }
    fn end_write_data(&mut self, _num_bytes_written: usize) -> Result { Err(Error::Unsupported) }
    fn read_data(&mut self, _buffer: &mut [u8], _all_or_none: bool) -> Result<usize> {
        Err(Error::Unsupported)
    }
    fn begin_read_data(&mut self, _min_num_bytes: usize) -> Result<usize> {
        Err(Error::Unsupported)
    }
    fn end_read_data(&mut self, _num_bytes_read: usize) -> Result { Err(Error::Unsupported) }

    fn duplicate_buffer_handle(
        &mut self,
        _options: &DuplicateBufferHandleOptions,
    ) -> Result<Box<dyn DispatcherImpl>> {
        Err(Error::Unsupported)
    }
    fn map_buffer(
        &mut self,
        _offset: usize,
        _length: usize,
        _flags: u32,
    ) -> Result<SharedBufferMapping> {
        Err(Error::Unsupported)
    }
    /// Gives up the platform handle. The dispatcher is closed afterwards.
    fn pass_platform_handle(&mut self) -> Result<PlatformHandle> { Err(Error::Unsupported) }

    fn add_waiter(&mut self, _waiter: &Arc<Waiter>, _signals: HandleSignals, _ctx: u32) -> Result {
        Err(Error::FailedPrecondition)
    }
    fn remove_waiter(&mut self, _waiter: &Arc<Waiter>) {}
    fn signals_state(&self) -> HandleSignalsState { HandleSignalsState::never() }

    /// The message pipe behind this handle, if it is a message pipe endpoint.
    fn message_pipe(&self) -> Option<&Arc<MessagePipe>> { None }

    /// Upper bounds on the payload size and platform handle count serialization will produce.
    fn start_serialize(&self, _channel: &Arc<Channel>) -> (usize, usize) { (0, 0) }
    /// Writes the payload into `destination`, appends platform handles, and returns the number of
    /// bytes written, or `None` on failure. The resources are consumed either way.
    fn end_serialize_and_close(
        &mut self,
        _channel: &Arc<Channel>,
        _destination: &mut [u8],
        _platform_handles: &mut Vec<PlatformHandle>,
    ) -> Option<usize> {
        None
    }
}

struct Inner {
    is_closed: bool,
    in_transit: bool,
    imp: Box<dyn DispatcherImpl>,
}
impl Inner {
    /// Fails if the handle may not be operated on right now.
    fn check_usable(&self) -> Result {
        if self.is_closed {
            Err(Error::InvalidArgument)
        } else if self.in_transit {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }
    fn close(&mut self) {
        self.is_closed = true;
        self.imp.cancel_all_waiters();
        self.imp.close();
    }
}

/// A handle: the shared body behind one message pipe endpoint, shared buffer or platform handle.
///
/// Every operation takes the handle's own lock and fails with
/// [`InvalidArgument`](Error::InvalidArgument) once the handle is closed, and with
/// [`Busy`](Error::Busy) while it is being moved into a message.
pub struct Dispatcher {
    inner: Mutex<Inner>,
}
impl Dispatcher {
    pub(crate) fn new(imp: Box<dyn DispatcherImpl>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                is_closed: false,
                in_transit: false,
                imp,
            }),
        })
    }

    /// Locks the handle and hands the implementation to `f` if the handle is usable.
    fn with_impl<T>(&self, f: impl FnOnce(&mut dyn DispatcherImpl) -> Result<T>) -> Result<T> {
        let mut inner = lock(&self.inner);
        inner.check_usable()?;
        f(&mut *inner.imp)
    }

    /// The kind of handle. Remains available after the handle is closed.
    pub fn dispatcher_type(&self) -> DispatcherType { lock(&self.inner).imp.dispatcher_type() }

    /// Closes the handle, waking every waiter registered on it with
    /// [`Cancelled`](Error::Cancelled).
    pub fn close(&self) -> Result {
        let mut inner = lock(&self.inner);
        inner.check_usable()?;
        inner.close();
        Ok(())
    }

    /// Whether the handle has been closed, explicitly or by being moved into a message.
    pub fn is_closed(&self) -> bool { lock(&self.inner).is_closed }

    /// Writes a message, moving every handle in `handles` into it.
    ///
    /// If any of the handles cannot be moved (it is this very handle, it is already being moved by
    /// another thread, or it is closed), nothing is written and all handles stay as they were.
    pub fn write_message(&self, bytes: &[u8], handles: &[Arc<Dispatcher>]) -> Result {
        let mut transports = Vec::with_capacity(handles.len());
        for handle in handles {
            if std::ptr::eq(Arc::as_ptr(handle), self) {
                return Err(Error::Busy);
            }
            // Dropping the transports gathered so far cancels them.
            transports.push(handle.begin_transit()?);
        }
        self.with_impl(|imp| imp.write_message(bytes, transports))
    }

    /// Reads the message at the head of the queue into `buffer`, returning its handles.
    ///
    /// `size` receives the size of the message. If the payload does not fit in `buffer` or it
    /// carries more than `max_handles` handles, fails with
    /// [`ResourceExhausted`](Error::ResourceExhausted) and leaves the message queued, unless
    /// [`MAY_DISCARD`](ReadMessageFlags::MAY_DISCARD) is given. An empty queue yields
    /// [`ShouldWait`](Error::ShouldWait) while the peer is open, and
    /// [`FailedPrecondition`](Error::FailedPrecondition) once it is gone.
    pub fn read_message(
        &self,
        buffer: &mut [u8],
        size: &mut MessageSize,
        max_handles: usize,
        flags: ReadMessageFlags,
    ) -> Result<Vec<Option<Arc<Dispatcher>>>> {
        self.with_impl(|imp| imp.read_message(buffer, size, max_handles, flags))
    }

    /// Writes bytes into a data pipe producer, returning how many were written.
    pub fn write_data(&self, bytes: &[u8], all_or_none: bool) -> Result<usize> {
        self.with_impl(|imp| imp.write_data(bytes, all_or_none))
    }
    /// Starts a two-phase write, returning the number of bytes that may be written.
    pub fn begin_write_data(&self, min_num_bytes: usize) -> Result<usize> {
        self.with_impl(|imp| imp.begin_write_data(min_num_bytes))
    }
    /// Completes a two-phase write.
    pub fn end_write_data(&self, num_bytes_written: usize) -> Result {
        self.with_impl(|imp| imp.end_write_data(num_bytes_written))
    }
    /// Reads bytes from a data pipe consumer, returning how many were read.
    pub fn read_data(&self, buffer: &mut [u8], all_or_none: bool) -> Result<usize> {
        self.with_impl(|imp| imp.read_data(buffer, all_or_none))
    }
    /// Starts a two-phase read, returning the number of bytes available.
    pub fn begin_read_data(&self, min_num_bytes: usize) -> Result<usize> {
        self.with_impl(|imp| imp.begin_read_data(min_num_bytes))
    }
    /// Completes a two-phase read.
    pub fn end_read_data(&self, num_bytes_read: usize) -> Result {
        self.with_impl(|imp| imp.end_read_data(num_bytes_read))
    }

    /// Creates another handle to the same shared buffer.
    pub fn duplicate_buffer_handle(
        &self,
        options: &DuplicateBufferHandleOptions,
    ) -> Result<Arc<Dispatcher>> {
        self.with_impl(|imp| imp.duplicate_buffer_handle(options))
            .map(Dispatcher::new)
    }
    /// Maps `length` bytes of a shared buffer, starting at `offset`. The mapping stays valid after
    /// the handle is closed.
    pub fn map_buffer(
        &self,
        offset: usize,
        length: usize,
        flags: u32,
    ) -> Result<SharedBufferMapping> {
        self.with_impl(|imp| imp.map_buffer(offset, length, flags))
    }

    /// Takes the platform handle out of a platform handle dispatcher, closing the dispatcher.
    pub fn pass_platform_handle(&self) -> Result<PlatformHandle> {
        let mut inner = lock(&self.inner);
        inner.check_usable()?;
        let handle = inner.imp.pass_platform_handle()?;
        inner.close();
        Ok(handle)
    }

    /// Registers `waiter` to be woken with `context` when any of `signals` is raised or can no
    /// longer be raised.
    ///
    /// Fails with [`AlreadyExists`](Error::AlreadyExists) if one of the signals is raised already
    /// and with [`FailedPrecondition`](Error::FailedPrecondition) if none of them can ever be; the
    /// waiter is not registered in either case.
    pub fn add_waiter(&self, waiter: &Arc<Waiter>, signals: HandleSignals, context: u32) -> Result {
        self.with_impl(|imp| imp.add_waiter(waiter, signals, context))
    }
    /// Unregisters `waiter`. Does nothing if it is not registered or the handle is closed.
    pub fn remove_waiter(&self, waiter: &Arc<Waiter>) {
        let mut inner = lock(&self.inner);
        if !inner.is_closed {
            inner.imp.remove_waiter(waiter);
        }
    }
    /// The signals currently raised on the handle and the ones that may still be.
    pub fn signals_state(&self) -> Result<HandleSignalsState> {
        let inner = lock(&self.inner);
        if inner.is_closed {
            return Err(Error::InvalidArgument);
        }
        Ok(inner.imp.signals_state())
    }

    /// Marks the handle as being moved into a message.
    ///
    /// Fails with [`Busy`](Error::Busy) if another transit is in progress and with
    /// [`InvalidArgument`](Error::InvalidArgument) if the handle is closed.
    pub fn begin_transit(self: &Arc<Self>) -> Result<DispatcherTransport> {
        let mut inner = lock(&self.inner);
        inner.check_usable()?;
        inner.in_transit = true;
        Ok(DispatcherTransport {
            dispatcher: Arc::clone(self),
            completed: false,
        })
    }

    pub(crate) fn start_serialize(&self, channel: &Arc<Channel>) -> (usize, usize) {
        let inner = lock(&self.inner);
        if inner.is_closed {
            return (0, 0);
        }
        inner.imp.start_serialize(channel)
    }
    /// Serializes the handle for transmission over `channel`, closing it regardless of the outcome.
    pub(crate) fn end_serialize_and_close(
        &self,
        channel: &Arc<Channel>,
        destination: &mut [u8],
        platform_handles: &mut Vec<PlatformHandle>,
    ) -> Option<usize> {
        let mut inner = lock(&self.inner);
        if inner.is_closed {
            log::error!("attempted to serialize a closed handle");
            return None;
        }
        inner.is_closed = true;
        inner.imp.cancel_all_waiters();
        inner
            .imp
            .end_serialize_and_close(channel, destination, platform_handles)
    }

    /// Reconstitutes a handle received over `channel`.
    pub(crate) fn deserialize(
        channel: &Arc<Channel>,
        dispatcher_type: DispatcherType,
        source: &[u8],
        platform_handles: Vec<PlatformHandle>,
    ) -> Option<Arc<Dispatcher>> {
        match dispatcher_type {
            DispatcherType::MessagePipe => {
                MessagePipeDispatcher::deserialize(channel, source, platform_handles)
            }
            DispatcherType::SharedBuffer => {
                SharedBufferDispatcher::deserialize(channel, source, platform_handles)
            }
            DispatcherType::PlatformHandle => {
                PlatformHandleDispatcher::deserialize(channel, source, platform_handles)
            }
        }
    }
}
impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Dispatcher")
            .field("is_closed", &inner.is_closed)
            .field("in_transit", &inner.in_transit)
            .field("imp", &inner.imp)
            .finish()
    }
}
impl Drop for Dispatcher {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !inner.is_closed {
            log::warn!(
                "{:?} handle dropped without being closed",
                inner.imp.dispatcher_type()
            );
            inner.close();
        }
    }
}

/// Exclusive permission to move a handle into a message, obtained from
/// [`Dispatcher::begin_transit()`].
///
/// Dropping the transport without completing it cancels the transit.
#[derive(Debug)]
pub struct DispatcherTransport {
    dispatcher: Arc<Dispatcher>,
    completed: bool,
}
impl DispatcherTransport {
    /// The handle being moved.
    #[inline]
    pub fn handle(&self) -> &Arc<Dispatcher> { &self.dispatcher }
    /// The kind of the handle being moved.
    pub fn dispatcher_type(&self) -> DispatcherType {
        lock(&self.dispatcher.inner).imp.dispatcher_type()
    }
    /// Whether the handle is an endpoint of `pipe`.
    pub(crate) fn is_endpoint_of(&self, pipe: &Arc<MessagePipe>) -> bool {
        let inner = lock(&self.dispatcher.inner);
        inner.imp.message_pipe().is_some_and(|p| Arc::ptr_eq(p, pipe))
    }

    /// Finishes the move: the original handle is closed and an equivalent one is returned.
    ///
    /// Waiters registered on the original are woken with [`Cancelled`](Error::Cancelled).
    pub fn complete_transit_and_close(mut self) -> Arc<Dispatcher> {
        self.completed = true;
        let mut inner = lock(&self.dispatcher.inner);
        debug_assert!(inner.in_transit && !inner.is_closed, "transit state out of sync");
        inner.in_transit = false;
        inner.is_closed = true;
        inner.imp.cancel_all_waiters();
        Dispatcher::new(inner.imp.create_equivalent_and_close())
    }
    /// Abandons the move, leaving the handle as it was.
    #[inline]
    pub fn cancel_transit(self) {}
}
impl Drop for DispatcherTransport {
    fn drop(&mut self) {
        if !self.completed {
            let mut inner = self.dispatcher.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.in_transit = false;
        }
    }
}
