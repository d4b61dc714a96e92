use crate::{
    dispatcher::{DispatcherType, MessageSize, ReadMessageFlags},
    message_pipe::MessagePipeDispatcher,
    platform_handle::{duplicate_platform_handle, PlatformHandleDispatcher},
    shared_buffer::SharedMemoryRegion,
    tests::util::*,
    Error,
};
use std::sync::Arc;

/// A shared memory object with `contents` at its start serves as an OS object that can be
/// recognized after the trip.
fn marked_region(contents: &[u8]) -> TestResult<SharedMemoryRegion> {
    let region = SharedMemoryRegion::create(64)?;
    region.map(0, 64)?.write_at(0, contents)?;
    Ok(region)
}

fn read_mark(region: &SharedMemoryRegion, len: usize) -> TestResult<Vec<u8>> {
    let mut out = vec![0; len];
    region.map(0, 64)?.read_at(0, &mut out)?;
    Ok(out)
}

#[test]
fn pass_platform_handle() -> TestResult {
    test_wrapper(|| {
        let region = marked_region(b"mark")?;
        let handle = PlatformHandleDispatcher::create(region.into_platform_handle());
        ensure_eq!(handle.dispatcher_type(), DispatcherType::PlatformHandle);
        let mut size = MessageSize::default();
        let read = handle.read_message(&mut [0u8; 0], &mut size, 0, ReadMessageFlags::empty());
        ensure_eq!(read.map(drop), Err(Error::Unsupported));

        let raw = handle.pass_platform_handle()?;
        ensure!(handle.is_closed(), "dispatcher stayed open after giving up its handle");
        ensure_eq!(handle.pass_platform_handle().map(drop), Err(Error::InvalidArgument));

        let duplicate = duplicate_platform_handle(&raw)?;
        let region = SharedMemoryRegion::from_platform_handle(64, duplicate);
        ensure_eq!(read_mark(&region, 4)?, b"mark");
        Ok(())
    })
}

#[test]
fn pass_over_channel() -> TestResult {
    test_wrapper(|| {
        let (ca, cb) = connected_channels(None)?;
        let a = bootstrap(&ca)?;
        let b = bootstrap(&cb)?;

        let region = marked_region(b"traveled")?;
        let handle = PlatformHandleDispatcher::create(region.into_platform_handle());
        a.write_message(b"os handle", &[Arc::clone(&handle)])?;
        ensure!(handle.is_closed());

        let (bytes, received) = read_with_handle(&b)?;
        ensure_eq!(bytes, b"os handle");
        ensure_eq!(received.dispatcher_type(), DispatcherType::PlatformHandle);
        let region = SharedMemoryRegion::from_platform_handle(64, received.pass_platform_handle()?);
        ensure_eq!(read_mark(&region, 8)?, b"traveled");
        Ok(())
    })
}

#[test]
fn pass_locally() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        let region = marked_region(b"local")?;
        a.write_message(b"", &[PlatformHandleDispatcher::create(region.into_platform_handle())])?;
        let (_, received) = read_with_handle(&b)?;
        let region = SharedMemoryRegion::from_platform_handle(64, received.pass_platform_handle()?);
        ensure_eq!(read_mark(&region, 5)?, b"local");
        Ok(())
    })
}
