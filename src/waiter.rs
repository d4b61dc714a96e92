//! Blocking on signal-state changes.
//!
//! A [`Waiter`] is a one-shot rendezvous between the thread that parks on it and whichever thread
//! first reports an outcome through [`awake()`](Waiter::awake). A [`WaiterList`] attaches many
//! waiters to one stateful object (such as the local endpoint of a message pipe) and wakes the ones
//! whose requested signals became satisfied or unsatisfiable.
//!
//! Waiting is the only blocking operation in the crate. Everything else reports
//! [`ShouldWait`](Error::ShouldWait) and leaves it to the caller to come back here.

mod list;
pub use list::*;

use crate::{dispatcher::Dispatcher, misc::lock, signals::HandleSignals, Error, Result};
use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

/// The outcome recorded by the first [`awake()`](Waiter::awake) call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Awakening {
    /// `Ok` if the awaited signal was raised, otherwise the reason the wait ended.
    pub result: Result<()>,
    /// The context value registered alongside the waiter.
    pub context: u32,
}

#[derive(Debug, Default)]
struct WaiterState {
    awakening: Option<Awakening>,
}

/// A one-shot, thread-safe blocking primitive.
///
/// Only the first [`awake()`](Self::awake) after construction or [`init()`](Self::init) has any
/// effect; later calls are ignored, so racing notifiers cannot overwrite the outcome the waiting
/// thread observes.
#[derive(Debug, Default)]
pub struct Waiter {
    state: Mutex<WaiterState>,
    cv: Condvar,
}
impl Waiter {
    /// Creates a waiter, ready to be waited on.
    pub fn new() -> Self { Self::default() }
    /// Rearms the waiter, discarding any previously recorded outcome.
    ///
    /// Must not be called while the waiter is registered with any [`WaiterList`].
    pub fn init(&self) { lock(&self.state).awakening = None; }
    /// Blocks until [`awake()`](Self::awake) is called or the deadline elapses.
    ///
    /// A deadline of `Some(Duration::ZERO)` only polls; `None` waits indefinitely. Returns
    /// [`DeadlineExceeded`](Error::DeadlineExceeded) on timeout, and otherwise the outcome of the
    /// first awakening.
    pub fn wait(&self, deadline: Option<Duration>) -> Result<Awakening> {
        let end = deadline.and_then(|d| Instant::now().checked_add(d));
        let mut state = lock(&self.state);
        loop {
            if let Some(awakening) = state.awakening {
                return Ok(awakening);
            }
            state = match (deadline, end) {
                (Some(_), Some(end)) => {
                    let now = Instant::now();
                    if now >= end {
                        return Err(Error::DeadlineExceeded);
                    }
                    self.cv
                        .wait_timeout(state, end - now)
                        .expect(crate::misc::LOCK_POISON)
                        .0
                }
                // Either no deadline, or one so far away that `Instant` cannot represent it.
                _ => self.cv.wait(state).expect(crate::misc::LOCK_POISON),
            };
        }
    }
    /// Records an outcome and wakes the waiting thread, unless an outcome was already recorded.
    ///
    /// Safe to call from any thread, concurrently with [`wait()`](Self::wait).
    pub fn awake(&self, result: Result<()>, context: u32) {
        let mut state = lock(&self.state);
        if state.awakening.is_some() {
            return;
        }
        state.awakening = Some(Awakening { result, context });
        drop(state);
        self.cv.notify_all();
    }
}

/// The reason [`wait_many()`] returned without any handle satisfying its signals.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("waiting on handle {index:?} failed: {error}")]
pub struct WaitManyError {
    /// The error itself.
    pub error: Error,
    /// The handle that caused the failure, if a single one is responsible (deadline expiry and
    /// argument validation are not attributed to any handle).
    pub index: Option<usize>,
}
impl From<Error> for WaitManyError {
    #[inline]
    fn from(error: Error) -> Self { Self { error, index: None } }
}

/// Waits until `dispatcher` raises any of `signals`.
///
/// Returns `Ok` once raised, [`FailedPrecondition`](Error::FailedPrecondition) if that can never
/// happen, [`Cancelled`](Error::Cancelled) if the handle was closed during the wait, or
/// [`DeadlineExceeded`](Error::DeadlineExceeded).
pub fn wait(
    dispatcher: &Dispatcher,
    signals: HandleSignals,
    deadline: Option<Duration>,
) -> Result<()> {
    wait_many(&[dispatcher], &[signals], deadline)
        .map(drop)
        .map_err(|e| e.error)
}

/// Waits until any of `dispatchers[i]` raises any of the corresponding `signals[i]`, returning the
/// index of the first one that did.
pub fn wait_many(
    dispatchers: &[&Dispatcher],
    signals: &[HandleSignals],
    deadline: Option<Duration>,
) -> Result<usize, WaitManyError> {
    if dispatchers.len() != signals.len() || dispatchers.is_empty() {
        return Err(Error::InvalidArgument.into());
    }
    if dispatchers.len() > crate::config::get().max_wait_many_num_handles {
        return Err(Error::ResourceExhausted.into());
    }

    let waiter = Arc::new(Waiter::new());
    let mut num_added = 0;
    let mut outcome = None;
    for (i, (dispatcher, &sig)) in dispatchers.iter().zip(signals).enumerate() {
        match dispatcher.add_waiter(&waiter, sig, i.try_into().unwrap_or(u32::MAX)) {
            Ok(()) => num_added += 1,
            // Already raised; nothing to wait for.
            Err(Error::AlreadyExists) => {
                outcome = Some(Ok(i));
                break;
            }
            Err(error) => {
                outcome = Some(Err(WaitManyError {
                    error,
                    index: Some(i),
                }));
                break;
            }
        }
    }
    let outcome = outcome.unwrap_or_else(|| match waiter.wait(deadline) {
        Ok(Awakening { result, context }) => {
            let index = context as usize;
            result.map(|()| index).map_err(|error| WaitManyError {
                error,
                index: Some(index),
            })
        }
        Err(error) => Err(error.into()),
    });
    for dispatcher in dispatchers.iter().take(num_added) {
        dispatcher.remove_waiter(&waiter);
    }
    outcome
}
