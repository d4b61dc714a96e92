//! Test utilities for connecting channels and moving messages through handles.
#![allow(dead_code, unused_macros)]

#[macro_use]
mod eyre;
mod wdt;

#[allow(unused_imports)]
pub use eyre::*;

use crate::{
    channel::Channel,
    dispatcher::{Dispatcher, MessageSize, ReadMessageFlags},
    message::BOOTSTRAP_ENDPOINT_ID,
    message_pipe::{MessagePipe, MessagePipeDispatcher},
    raw_channel::memory,
    signals::HandleSignals,
    waiter, Error,
};
pub use color_eyre::eyre::{bail, ensure};
use std::{
    num::NonZeroUsize,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

/// How long a test is willing to wait for something to arrive from the other side of a channel.
pub const PATIENCE: Duration = Duration::from_secs(10);

pub fn test_wrapper(f: impl (FnOnce() -> TestResult) + Send + 'static) -> TestResult {
    eyre::install();
    self::wdt::run_under_wachdog(f)
}

/// Two channels talking to each other over the in-memory transport.
pub fn connected_channels(
    chunk_size: Option<NonZeroUsize>,
) -> TestResult<(Arc<Channel>, Arc<Channel>)> {
    let (a, b) = memory::pair_with_chunk_size(chunk_size);
    let (ca, cb) = (Channel::new(), Channel::new());
    ensure!(ca.init(Box::new(a)), "first channel failed to start");
    ensure!(cb.init(Box::new(b)), "second channel failed to start");
    Ok((ca, cb))
}

/// Attaches and runs the bootstrap endpoint of `channel`, returning the local handle of its pipe.
pub fn bootstrap(channel: &Arc<Channel>) -> TestResult<Arc<Dispatcher>> {
    let pipe = MessagePipe::new_local_proxy();
    let id = channel.attach_message_pipe_endpoint(&pipe, 1);
    ensure_eq!(id, BOOTSTRAP_ENDPOINT_ID);
    ensure!(
        channel.run_message_pipe_endpoint(id, BOOTSTRAP_ENDPOINT_ID),
        "bootstrap endpoint vanished before it could run"
    );
    Ok(MessagePipeDispatcher::new(pipe, 0))
}

/// Waits for a message on `handle` and reads it whole.
pub fn read_next(handle: &Dispatcher) -> TestResult<(Vec<u8>, Vec<Option<Arc<Dispatcher>>>)> {
    waiter::wait(handle, HandleSignals::READABLE, Some(PATIENCE))?;
    let mut buffer = vec![0; 4096];
    let mut size = MessageSize::default();
    let handles = handle.read_message(&mut buffer, &mut size, 64, ReadMessageFlags::empty())?;
    buffer.truncate(size.num_bytes);
    Ok((buffer, handles))
}

/// Like [`read_next()`], for messages that carry exactly one handle.
pub fn read_with_handle(handle: &Dispatcher) -> TestResult<(Vec<u8>, Arc<Dispatcher>)> {
    let (bytes, mut handles) = read_next(handle)?;
    ensure_eq!(handles.len(), 1);
    match handles.pop().flatten() {
        Some(received) => Ok((bytes, received)),
        None => bail!("attached handle did not survive the trip"),
    }
}

/// Asserts that nothing more will ever arrive on `handle`.
pub fn ensure_peer_closed(handle: &Dispatcher) -> TestResult {
    let result = waiter::wait(handle, HandleSignals::READABLE, Some(PATIENCE));
    ensure_eq!(result, Err(Error::FailedPrecondition));
    Ok(())
}

/// Polls `condition` until it holds, failing after [`PATIENCE`].
pub fn eventually(what: &str, mut condition: impl FnMut() -> bool) -> TestResult {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > PATIENCE {
            bail!("gave up waiting until {what}");
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
