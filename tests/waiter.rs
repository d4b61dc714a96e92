use crate::{
    message_pipe::MessagePipeDispatcher,
    signals::{HandleSignals, HandleSignalsState},
    tests::util::*,
    waiter::{self, Awakening, WaitManyError, Waiter, WaiterList},
    Error,
};
use std::{sync::Arc, thread, time::Duration};

#[test]
fn first_awakening_wins() -> TestResult {
    test_wrapper(|| {
        let waiter = Arc::new(Waiter::new());
        let notifier = {
            let waiter = Arc::clone(&waiter);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                waiter.awake(Ok(()), 1);
                waiter.awake(Err(Error::Cancelled), 2);
            })
        };
        let awakening = waiter.wait(None)?;
        ensure_eq!(awakening, Awakening { result: Ok(()), context: 1 });
        notifier.join().unwrap();
        // Later calls changed nothing.
        ensure_eq!(waiter.wait(Some(Duration::ZERO))?.context, 1);
        Ok(())
    })
}

#[test]
fn deadline() -> TestResult {
    test_wrapper(|| {
        let waiter = Waiter::new();
        ensure_eq!(waiter.wait(Some(Duration::ZERO)), Err(Error::DeadlineExceeded));
        ensure_eq!(waiter.wait(Some(Duration::from_millis(10))), Err(Error::DeadlineExceeded));

        waiter.awake(Err(Error::FailedPrecondition), 7);
        let awakening = waiter.wait(Some(Duration::ZERO))?;
        ensure_eq!(awakening.result, Err(Error::FailedPrecondition));
        ensure_eq!(awakening.context, 7);

        waiter.init();
        ensure_eq!(waiter.wait(Some(Duration::ZERO)), Err(Error::DeadlineExceeded));
        Ok(())
    })
}

#[test]
fn list_wakes_on_state_change() -> TestResult {
    test_wrapper(|| {
        let (readable, writable) = (Arc::new(Waiter::new()), Arc::new(Waiter::new()));
        let mut list = WaiterList::new();
        list.add_waiter(&readable, HandleSignals::READABLE, 1);
        list.add_waiter(&writable, HandleSignals::WRITABLE, 2);

        let all = HandleSignals::READABLE | HandleSignals::WRITABLE;
        list.awake_waiters_for_state_change(&HandleSignalsState::new(HandleSignals::WRITABLE, all));
        ensure_eq!(readable.wait(Some(Duration::ZERO)), Err(Error::DeadlineExceeded));
        ensure_eq!(writable.wait(Some(Duration::ZERO))?, Awakening { result: Ok(()), context: 2 });
        // Woken waiters stay registered until their owner removes them.
        ensure_eq!(list.len(), 2);

        list.awake_waiters_for_state_change(&HandleSignalsState::never());
        ensure_eq!(
            readable.wait(Some(Duration::ZERO))?,
            Awakening { result: Err(Error::FailedPrecondition), context: 1 },
        );
        Ok(())
    })
}

#[test]
fn list_cancel_and_remove() -> TestResult {
    test_wrapper(|| {
        let (a, b) = (Arc::new(Waiter::new()), Arc::new(Waiter::new()));
        let mut list = WaiterList::new();
        list.add_waiter(&a, HandleSignals::READABLE, 0);
        list.add_waiter(&a, HandleSignals::WRITABLE, 1);
        list.add_waiter(&b, HandleSignals::READABLE, 2);
        ensure_eq!(list.len(), 3);

        list.remove_waiter(&a);
        ensure_eq!(list.len(), 1);

        list.cancel_all_waiters();
        ensure!(list.is_empty());
        ensure_eq!(b.wait(Some(Duration::ZERO))?.result, Err(Error::Cancelled));
        ensure_eq!(a.wait(Some(Duration::ZERO)), Err(Error::DeadlineExceeded));
        Ok(())
    })
}

#[test]
fn wait_on_pipe() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        ensure_eq!(
            waiter::wait(&b, HandleSignals::READABLE, Some(Duration::ZERO)),
            Err(Error::DeadlineExceeded)
        );
        // Writable right away.
        waiter::wait(&b, HandleSignals::WRITABLE, Some(Duration::ZERO))?;

        let writer = {
            let a = Arc::clone(&a);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                a.write_message(b"wake up", &[])
            })
        };
        waiter::wait(&b, HandleSignals::READABLE, Some(PATIENCE))?;
        writer.join().unwrap()?;
        Ok(())
    })
}

#[test]
fn close_cancels_wait() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        let waiting = {
            let b = Arc::clone(&b);
            thread::spawn(move || waiter::wait(&b, HandleSignals::READABLE, Some(PATIENCE)))
        };
        thread::sleep(Duration::from_millis(20));
        b.close()?;
        let result = waiting.join().unwrap();
        // Depending on timing, the wait either registered and got cancelled, or found the handle
        // already closed.
        ensure!(
            matches!(result, Err(Error::Cancelled | Error::InvalidArgument)),
            "unexpected wait result {result:?}"
        );
        a.close()?;
        Ok(())
    })
}

#[test]
fn wait_many_reports_index() -> TestResult {
    test_wrapper(|| {
        let (a1, b1) = MessagePipeDispatcher::create_pair();
        let (a2, b2) = MessagePipeDispatcher::create_pair();
        a2.write_message(b"second", &[])?;
        let readable = [HandleSignals::READABLE; 2];
        ensure_eq!(waiter::wait_many(&[&b1, &b2], &readable, Some(PATIENCE)), Ok(1));

        ensure_eq!(
            waiter::wait_many(&[&b1], &readable, None),
            Err(WaitManyError { error: Error::InvalidArgument, index: None })
        );

        a1.close()?;
        b1.close()?;
        ensure_eq!(
            waiter::wait_many(&[&b1, &b2], &readable, Some(PATIENCE)),
            Err(WaitManyError { error: Error::InvalidArgument, index: Some(0) })
        );
        Ok(())
    })
}

#[test]
fn unsatisfiable_wait_fails() -> TestResult {
    test_wrapper(|| {
        let (a, b) = MessagePipeDispatcher::create_pair();
        a.close()?;
        ensure_eq!(
            waiter::wait(&b, HandleSignals::READABLE | HandleSignals::WRITABLE, None),
            Err(Error::FailedPrecondition)
        );
        Ok(())
    })
}
