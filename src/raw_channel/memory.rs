//! An in-process transport.
//!
//! The two ends returned by [`pair()`] behave like the two ends of a stream socket: bytes written to
//! one end come out of the other in order, possibly split into arbitrary chunks, with platform
//! handles traveling out of band. Each end reads on a thread of its own, from which it calls its
//! delegate, just as a transport built on an OS primitive would.

use super::{FatalError, RawChannel, RawChannelDelegate};
use crate::{
    message::{MessageInTransit, MessageView, HEADER_SIZE},
    platform_handle::PlatformHandle,
};
use std::{
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::*},
        mpsc::{self, Receiver, Sender},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
};

enum Frame {
    Data {
        bytes: Vec<u8>,
        platform_handles: Vec<PlatformHandle>,
    },
    /// The other end shut down.
    Closed,
    /// This end shut down; stops the reader.
    Shutdown,
}

/// Creates two connected ends of an in-process transport.
pub fn pair() -> (MemoryRawChannel, MemoryRawChannel) { pair_with_chunk_size(None) }

/// Like [`pair()`], but splits every message into chunks of at most `chunk_size` bytes on the way,
/// as a stream transport may.
pub fn pair_with_chunk_size(
    chunk_size: Option<NonZeroUsize>,
) -> (MemoryRawChannel, MemoryRawChannel) {
    let (a_tx, a_rx) = mpsc::channel();
    let (b_tx, b_rx) = mpsc::channel();
    let a_to_b = Arc::new(AtomicUsize::new(0));
    let b_to_a = Arc::new(AtomicUsize::new(0));
    let a = MemoryRawChannel::new(a_tx.clone(), b_tx.clone(), a_rx, chunk_size, &a_to_b, &b_to_a);
    let b = MemoryRawChannel::new(b_tx, a_tx, b_rx, chunk_size, &b_to_a, &a_to_b);
    (a, b)
}

/// One end of an in-process transport. See the [module-level documentation](self).
pub struct MemoryRawChannel {
    own: Sender<Frame>,
    peer: Sender<Frame>,
    incoming: Option<Receiver<Frame>>,
    chunk_size: Option<NonZeroUsize>,
    /// Frames written by this end and not yet taken by the other.
    outgoing_in_flight: Arc<AtomicUsize>,
    /// Frames written by the other end and not yet taken by this one.
    incoming_in_flight: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    is_shut_down: bool,
}
impl MemoryRawChannel {
    fn new(
        own: Sender<Frame>,
        peer: Sender<Frame>,
        incoming: Receiver<Frame>,
        chunk_size: Option<NonZeroUsize>,
        outgoing_in_flight: &Arc<AtomicUsize>,
        incoming_in_flight: &Arc<AtomicUsize>,
    ) -> Self {
        Self {
            own,
            peer,
            incoming: Some(incoming),
            chunk_size,
            outgoing_in_flight: Arc::clone(outgoing_in_flight),
            incoming_in_flight: Arc::clone(incoming_in_flight),
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
            is_shut_down: false,
        }
    }

    fn send(&self, frame: Frame) -> bool {
        self.outgoing_in_flight.fetch_add(1, AcqRel);
        if self.peer.send(frame).is_err() {
            self.outgoing_in_flight.fetch_sub(1, AcqRel);
            return false;
        }
        true
    }
}

impl RawChannel for MemoryRawChannel {
    fn init(&mut self, delegate: Weak<dyn RawChannelDelegate>) -> bool {
        let Some(incoming) = self.incoming.take() else {
            log::error!("in-memory transport initialized twice");
            return false;
        };
        let reader = Reader {
            incoming,
            delegate,
            in_flight: Arc::clone(&self.incoming_in_flight),
            stop: Arc::clone(&self.stop),
            buffer: Vec::new(),
            platform_handles: VecDeque::new(),
        };
        match thread::Builder::new()
            .name("handlekit memory transport".to_owned())
            .spawn(move || reader.run())
        {
            Ok(handle) => {
                self.reader = Some(handle);
                true
            }
            Err(e) => {
                log::error!("failed to spawn transport reader thread: {e}");
                false
            }
        }
    }

    fn write_message(&mut self, message: MessageInTransit) -> bool {
        if self.is_shut_down {
            return false;
        }
        let (bytes, platform_handles) = message.into_wire();
        let Some(chunk_size) = self.chunk_size else {
            return self.send(Frame::Data {
                bytes,
                platform_handles,
            });
        };
        // Handles ride along with the first chunk of their message.
        let mut platform_handles = Some(platform_handles);
        bytes.chunks(chunk_size.get()).all(|chunk| {
            self.send(Frame::Data {
                bytes: chunk.to_vec(),
                platform_handles: platform_handles.take().unwrap_or_default(),
            })
        })
    }

    fn is_write_buffer_empty(&self) -> bool { self.outgoing_in_flight.load(Acquire) == 0 }

    fn shutdown(&mut self) {
        if self.is_shut_down {
            return;
        }
        self.is_shut_down = true;
        self.stop.store(true, Release);
        let _ = self.peer.send(Frame::Closed);
        let _ = self.own.send(Frame::Shutdown);
        if let Some(reader) = self.reader.take() {
            // Shutting down from within a delegate callback: the reader stops once it returns.
            if reader.thread().id() != thread::current().id() {
                let _ = reader.join();
            }
        }
    }
}
impl Drop for MemoryRawChannel {
    fn drop(&mut self) { self.shutdown(); }
}
impl Debug for MemoryRawChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRawChannel")
            .field("chunk_size", &self.chunk_size)
            .field("is_shut_down", &self.is_shut_down)
            .finish_non_exhaustive()
    }
}

struct Reader {
    incoming: Receiver<Frame>,
    delegate: Weak<dyn RawChannelDelegate>,
    in_flight: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    buffer: Vec<u8>,
    platform_handles: VecDeque<PlatformHandle>,
}
impl Reader {
    fn run(mut self) {
        while let Ok(frame) = self.incoming.recv() {
            if self.stop.load(Acquire) {
                return;
            }
            match frame {
                Frame::Data {
                    bytes,
                    platform_handles,
                } => {
                    self.in_flight.fetch_sub(1, AcqRel);
                    self.buffer.extend_from_slice(&bytes);
                    self.platform_handles.extend(platform_handles);
                    if let Err(reason) = self.dispatch() {
                        log::warn!("in-memory transport read malformed data: {reason}");
                        self.fail();
                        return;
                    }
                }
                Frame::Closed => {
                    log::debug!("other end of in-memory transport shut down");
                    self.fail();
                    return;
                }
                Frame::Shutdown => return,
            }
        }
    }

    /// Delivers every complete message in the buffer.
    fn dispatch(&mut self) -> Result<(), &'static str> {
        loop {
            if self.stop.load(Acquire) {
                return Ok(());
            }
            let Some(size) = MessageView::next_message_size(&self.buffer) else {
                return Ok(());
            };
            if size < HEADER_SIZE {
                return Err("message shorter than its header");
            }
            if size > self.buffer.len() {
                return Ok(());
            }
            {
                let view = MessageView::new(&self.buffer[..size])?;
                let num_platform_handles = view.num_platform_handles();
                if num_platform_handles > self.platform_handles.len() {
                    return Err("message refers to platform handles that were not sent");
                }
                let platform_handles =
                    self.platform_handles.drain(..num_platform_handles).collect();
                let Some(delegate) = self.delegate.upgrade() else {
                    return Ok(());
                };
                delegate.on_read_message(&view, platform_handles);
            }
            self.buffer.drain(..size);
        }
    }

    fn fail(&self) {
        if self.stop.load(Acquire) {
            return;
        }
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_fatal_error(FatalError::Read);
        }
    }
}
