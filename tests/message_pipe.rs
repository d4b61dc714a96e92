use crate::{
    dispatcher::{DispatcherType, MessageSize, ReadMessageFlags},
    message_pipe::{EndpointType, MessagePipe, MessagePipeDispatcher},
    signals::HandleSignals,
    tests::util::*,
    Error,
};
use color_eyre::eyre::eyre;
use std::{sync::Arc, thread};

#[test]
fn round_trip() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        ensure_eq!(a.dispatcher_type(), DispatcherType::MessagePipe);
        a.write_message(b"hello", &[])?;

        let mut buffer = [0; 16];
        let mut size = MessageSize::default();
        let handles = b.read_message(&mut buffer, &mut size, 0, ReadMessageFlags::empty())?;
        ensure_eq!(size, MessageSize { num_bytes: 5, num_handles: 0 });
        ensure_eq!(&buffer[..5], b"hello");
        ensure!(handles.is_empty());

        ensure_eq!(
            b.read_message(&mut buffer, &mut size, 0, ReadMessageFlags::empty()).map(drop),
            Err(Error::ShouldWait)
        );
        // And the other way around.
        b.write_message(b"", &[])?;
        let (bytes, _) = read_next(&a)?;
        ensure!(bytes.is_empty());
        Ok(())
    })
}

#[test]
fn drain_after_peer_close() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        for msg in [&b"first"[..], b"second", b"third"] {
            a.write_message(msg, &[])?;
        }
        a.close()?;
        ensure_eq!(a.close(), Err(Error::InvalidArgument));

        let state = b.signals_state()?;
        ensure_eq!(state.satisfied, HandleSignals::READABLE);
        ensure_eq!(state.satisfiable, HandleSignals::READABLE);

        for expected in [&b"first"[..], b"second", b"third"] {
            let (bytes, _) = read_next(&b)?;
            ensure_eq!(bytes, expected);
        }
        ensure_peer_closed(&b)?;
        let mut size = MessageSize::default();
        ensure_eq!(
            b.read_message(&mut [0; 8], &mut size, 0, ReadMessageFlags::empty()).map(drop),
            Err(Error::FailedPrecondition)
        );
        ensure_eq!(b.write_message(b"anyone?", &[]), Err(Error::FailedPrecondition));
        Ok(())
    })
}

#[test]
fn too_small_buffer() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        let (x, y) = MessagePipeDispatcher::create_pair();
        a.write_message(b"0123456789", &[])?;
        a.write_message(b"with a handle", &[Arc::clone(&x)])?;
        a.write_message(b"last", &[])?;

        let mut small = [0; 4];
        let mut size = MessageSize::default();
        ensure_eq!(
            b.read_message(&mut small, &mut size, 0, ReadMessageFlags::empty()).map(drop),
            Err(Error::ResourceExhausted)
        );
        ensure_eq!(size, MessageSize { num_bytes: 10, num_handles: 0 });
        // Still there.
        let (bytes, _) = read_next(&b)?;
        ensure_eq!(bytes, b"0123456789");

        let mut buffer = [0; 32];
        ensure_eq!(
            b.read_message(&mut buffer, &mut size, 0, ReadMessageFlags::empty()).map(drop),
            Err(Error::ResourceExhausted)
        );
        ensure_eq!(size, MessageSize { num_bytes: 13, num_handles: 1 });
        ensure_eq!(
            b.read_message(&mut buffer, &mut size, 0, ReadMessageFlags::MAY_DISCARD).map(drop),
            Err(Error::ResourceExhausted)
        );
        // The discarded message took the other end of the pipe with it.
        ensure_peer_closed(&y)?;

        let (bytes, _) = read_next(&b)?;
        ensure_eq!(bytes, b"last");
        Ok(())
    })
}

#[test]
fn pass_handle_locally() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        let (x, y) = MessagePipeDispatcher::create_pair();
        a.write_message(b"here you go", &[Arc::clone(&y)])?;
        ensure!(y.is_closed(), "sent handle remained open");
        ensure_eq!(y.write_message(b"", &[]), Err(Error::InvalidArgument));

        let (bytes, received) = read_with_handle(&b)?;
        ensure_eq!(bytes, b"here you go");
        ensure!(!Arc::ptr_eq(&received, &y), "handle was not replaced");
        x.write_message(b"through the new handle", &[])?;
        let (bytes, _) = read_next(&received)?;
        ensure_eq!(bytes, b"through the new handle");
        Ok(())
    })
}

#[test]
fn sending_own_pipe_fails() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        ensure_eq!(a.write_message(b"", &[Arc::clone(&a)]), Err(Error::Busy));
        ensure_eq!(a.write_message(b"", &[Arc::clone(&b)]), Err(Error::InvalidArgument));
        // Nothing was consumed by the failed attempts.
        ensure!(!a.is_closed() && !b.is_closed());
        a.write_message(b"still fine", &[])?;
        let (bytes, _) = read_next(&b)?;
        ensure_eq!(bytes, b"still fine");
        Ok(())
    })
}

#[test]
fn failed_write_keeps_handles() -> TestResult {
    test_wrapper(|| {
        for _ in 0..2000 {
            let (a, b) = MessagePipeDispatcher::create_pair();
            let (x, _y) = MessagePipeDispatcher::create_pair();
            let closer = thread::spawn(move || b.close());
            match a.write_message(b"h", &[Arc::clone(&x)]) {
                Ok(()) => ensure!(x.is_closed(), "sent handle remained open"),
                Err(e) => {
                    ensure_eq!(e, Error::FailedPrecondition);
                    ensure!(!x.is_closed(), "failed write consumed the handle");
                    // Still usable for another try.
                    x.write_message(b"", &[])?;
                }
            }
            closer.join().map_err(|_| eyre!("closer panicked"))??;
        }
        Ok(())
    })
}

#[test]
fn transit_is_exclusive() -> TestResult {
    test_wrapper(|| {
        let (a, _b) = MessagePipeDispatcher::create_pair();
        let (x, _y) = MessagePipeDispatcher::create_pair();
        let transport = x.begin_transit()?;
        ensure_eq!(transport.dispatcher_type(), DispatcherType::MessagePipe);
        ensure_eq!(x.begin_transit().map(drop), Err(Error::Busy));
        ensure_eq!(a.write_message(b"", &[Arc::clone(&x)]), Err(Error::Busy));
        ensure_eq!(x.write_message(b"", &[]), Err(Error::Busy));

        transport.cancel_transit();
        ensure!(!x.is_closed());
        x.write_message(b"", &[])?;

        let transport = x.begin_transit()?;
        let replacement = transport.complete_transit_and_close();
        ensure!(x.is_closed(), "original survived its transit");
        ensure!(!replacement.is_closed());
        replacement.close()?;
        Ok(())
    })
}

#[test]
fn unsupported_operations() -> TestResult {
    test_wrapper(|| {
        let (a, _b) = MessagePipeDispatcher::create_pair();
        ensure_eq!(a.write_data(b"bytes", false), Err(Error::Unsupported));
        ensure_eq!(a.begin_read_data(0), Err(Error::Unsupported));
        ensure_eq!(a.map_buffer(0, 1, 0).map(drop), Err(Error::Unsupported));
        ensure_eq!(a.pass_platform_handle().map(drop), Err(Error::Unsupported));
        ensure!(!a.is_closed());
        Ok(())
    })
}

#[test]
fn proxy_endpoint_pauses_until_attached() -> TestResult {
    test_wrapper(|| {
        let pipe = MessagePipe::new_local_proxy();
        ensure_eq!(pipe.endpoint_type(0), Some(EndpointType::Local));
        ensure_eq!(pipe.endpoint_type(1), Some(EndpointType::Proxy));
        let handle = MessagePipeDispatcher::new(Arc::clone(&pipe), 0);
        // Queued by the unattached proxy.
        handle.write_message(b"queued", &[])?;
        handle.close()?;
        ensure_eq!(pipe.endpoint_type(0), None);
        ensure_eq!(pipe.endpoint_type(1), Some(EndpointType::Proxy));
        pipe.close(1);
        ensure_eq!(pipe.endpoint_type(1), None);
        Ok(())
    })
}
