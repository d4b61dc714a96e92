use crate::{
    dispatcher::{Dispatcher, DispatcherType},
    message_pipe::MessagePipeDispatcher,
    shared_buffer::{
        CreateSharedBufferOptions, DuplicateBufferHandleOptions, SharedBufferDispatcher,
        SharedMemoryRegion,
    },
    signals::HandleSignalsState,
    tests::util::*,
    Error,
};
use std::sync::Arc;

fn create(num_bytes: usize) -> crate::Result<Arc<Dispatcher>> {
    SharedBufferDispatcher::create(&CreateSharedBufferOptions::default(), num_bytes)
}

#[test]
fn create_limits() -> TestResult {
    test_wrapper(|| {
        ensure_eq!(create(0).map(drop), Err(Error::InvalidArgument));
        ensure_eq!(create(usize::MAX).map(drop), Err(Error::ResourceExhausted));
        let unknown = CreateSharedBufferOptions { flags: 1 };
        ensure_eq!(
            SharedBufferDispatcher::create(&unknown, 64).map(drop),
            Err(Error::Unimplemented)
        );

        let buffer = create(100)?;
        ensure_eq!(buffer.dispatcher_type(), DispatcherType::SharedBuffer);
        ensure_eq!(buffer.signals_state()?, HandleSignalsState::never());
        ensure_eq!(buffer.write_message(b"", &[]), Err(Error::Unsupported));
        Ok(())
    })
}

#[test]
fn map_and_duplicate() -> TestResult {
    test_wrapper(|| {
        let buffer = create(4096)?;
        ensure_eq!(buffer.map_buffer(0, 0, 0).map(drop), Err(Error::InvalidArgument));
        ensure_eq!(buffer.map_buffer(4000, 100, 0).map(drop), Err(Error::InvalidArgument));
        ensure_eq!(buffer.map_buffer(0, 16, 1).map(drop), Err(Error::Unimplemented));

        let mapping = buffer.map_buffer(0, 4096, 0)?;
        ensure_eq!(mapping.len(), 4096);
        let mut fresh = [0xff; 8];
        mapping.read_at(4088, &mut fresh)?;
        ensure_eq!(fresh, [0u8; 8]);
        mapping.write_at(1000, b"shared")?;
        ensure_eq!(mapping.write_at(4095, b"xy"), Err(Error::InvalidArgument));

        let unknown = DuplicateBufferHandleOptions { flags: 4 };
        ensure_eq!(buffer.duplicate_buffer_handle(&unknown).map(drop), Err(Error::Unimplemented));
        let duplicate = buffer.duplicate_buffer_handle(&DuplicateBufferHandleOptions::default())?;
        buffer.close()?;
        ensure_eq!(buffer.map_buffer(0, 1, 0).map(drop), Err(Error::InvalidArgument));

        // Unaligned offset into the region.
        let view = duplicate.map_buffer(998, 10, 0)?;
        let mut read = [0; 6];
        view.read_at(2, &mut read)?;
        ensure_eq!(&read, b"shared");

        // The mapping outlives every handle.
        duplicate.close()?;
        mapping.write_at(0, b"still mapped")?;
        let mut read = [0; 12];
        mapping.read_at(0, &mut read)?;
        ensure_eq!(&read, b"still mapped");
        Ok(())
    })
}

#[test]
fn region_bounds() -> TestResult {
    test_wrapper(|| {
        let region = SharedMemoryRegion::create(64)?;
        ensure_eq!(region.num_bytes(), 64);
        ensure!(region.is_valid_map(0, 64));
        ensure!(region.is_valid_map(63, 1));
        ensure!(!region.is_valid_map(0, 0));
        ensure!(!region.is_valid_map(1, 64));
        ensure!(!region.is_valid_map(usize::MAX, 2));
        let mapping = region.map(8, 8)?;
        ensure!(!mapping.is_empty());
        Ok(())
    })
}

#[test]
fn pass_locally() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        let buffer = create(32)?;
        buffer.map_buffer(0, 32, 0)?.write_at(0, b"in the buffer")?;
        a.write_message(b"", &[Arc::clone(&buffer)])?;
        ensure!(buffer.is_closed());

        let (_, received) = read_with_handle(&b)?;
        ensure_eq!(received.dispatcher_type(), DispatcherType::SharedBuffer);
        let mut read = [0; 13];
        received.map_buffer(0, 32, 0)?.read_at(0, &mut read)?;
        ensure_eq!(&read, b"in the buffer");
        Ok(())
    })
}

#[test]
fn pass_over_channel() -> TestResult {
    test_wrapper(|| {
        let (ca, cb) = connected_channels(None)?;
        let a = bootstrap(&ca)?;
        let b = bootstrap(&cb)?;

        let buffer = create(256)?;
        let mapping = buffer.map_buffer(0, 256, 0)?;
        mapping.write_at(100, b"across")?;
        // Keep a duplicate, so that the region is duplicated for transit rather than moved.
        let kept = buffer.duplicate_buffer_handle(&DuplicateBufferHandleOptions::default())?;
        a.write_message(b"buffer", &[buffer])?;

        let (bytes, received) = read_with_handle(&b)?;
        ensure_eq!(bytes, b"buffer");
        let remote = received.map_buffer(0, 256, 0)?;
        let mut read = [0; 6];
        remote.read_at(100, &mut read)?;
        ensure_eq!(&read, b"across");

        // Same memory on both sides.
        remote.write_at(0, b"back")?;
        let mut read = [0; 4];
        kept.map_buffer(0, 4, 0)?.read_at(0, &mut read)?;
        ensure_eq!(&read, b"back");
        Ok(())
    })
}
