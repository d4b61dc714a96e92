//! The physical transport beneath a [`Channel`](crate::channel::Channel).
//!
//! A raw channel moves serialized messages, along with the platform handles they carry, to the
//! other end and hands incoming ones to its [delegate](RawChannelDelegate). How it does so is up
//! to the implementation: the only one in this crate is the in-process [`memory`] transport, while
//! embedders plug in sockets, pipes or whatever else connects their processes.

pub mod memory;

use crate::{
    message::{MessageInTransit, MessageView},
    platform_handle::PlatformHandle,
};
use std::sync::Weak;

/// Which direction of a transport failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FatalError {
    /// Reading failed, the other end hung up, or it sent something malformed. No more messages
    /// will be read.
    Read,
    /// Writing failed. No more messages will be written.
    Write,
}

/// Receives what a [`RawChannel`] reads.
///
/// Callbacks come from the transport's own I/O thread, one at a time.
pub trait RawChannelDelegate: Send + Sync {
    /// A complete, validated message arrived, along with the platform handles its handle table
    /// refers to.
    fn on_read_message(&self, view: &MessageView<'_>, platform_handles: Vec<PlatformHandle>);
    /// The transport failed. Delivered at most once per direction; no message is delivered after
    /// a [`Read`](FatalError::Read) failure.
    fn on_fatal_error(&self, error: FatalError);
}

/// A duplex transport for messages and platform handles.
pub trait RawChannel: Send {
    /// Starts reading, delivering to `delegate`. Returns `false` if the transport cannot start.
    ///
    /// Must be called exactly once, before any other method.
    fn init(&mut self, delegate: Weak<dyn RawChannelDelegate>) -> bool;
    /// Queues a message for writing. Returns `false` if the transport can no longer write.
    fn write_message(&mut self, message: MessageInTransit) -> bool;
    /// Whether everything written so far has been taken by the other end.
    fn is_write_buffer_empty(&self) -> bool;
    /// Stops reading and writing. No delegate callbacks are made once this returns, except if it
    /// is called from a delegate callback, in which case that callback is the last one.
    fn shutdown(&mut self);
}
