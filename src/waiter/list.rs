use super::Waiter;
use crate::{
    signals::{HandleSignals, HandleSignalsState},
    Error,
};
use std::sync::Arc;

#[derive(Debug)]
struct WaiterInfo {
    waiter: Arc<Waiter>,
    signals: HandleSignals,
    context: u32,
}

/// The waiters attached to one stateful object.
///
/// Not synchronized by itself: the owning object keeps it under the same lock as the state the
/// waiters observe, so that a state change and the corresponding wake-up are atomic with respect to
/// newly added waiters.
#[derive(Debug, Default)]
pub struct WaiterList {
    waiters: Vec<WaiterInfo>,
}
impl WaiterList {
    /// Creates an empty list.
    #[inline]
    pub fn new() -> Self { Self::default() }
    /// Registers `waiter` to be woken with `context` once `signals` is satisfied or becomes
    /// unsatisfiable.
    ///
    /// The same waiter may be registered more than once with different signal sets.
    pub fn add_waiter(&mut self, waiter: &Arc<Waiter>, signals: HandleSignals, context: u32) {
        self.waiters.push(WaiterInfo {
            waiter: Arc::clone(waiter),
            signals,
            context,
        });
    }
    /// Unregisters every registration of `waiter`.
    pub fn remove_waiter(&mut self, waiter: &Arc<Waiter>) {
        self.waiters.retain(|info| !Arc::ptr_eq(&info.waiter, waiter));
    }
    /// Wakes the waiters whose signals are satisfied (with `Ok`) or can no longer be satisfied
    /// (with [`FailedPrecondition`](Error::FailedPrecondition)). The rest stay registered.
    ///
    /// Woken waiters are not removed: the waiting side removes its own registrations once it
    /// returns from the wait.
    pub fn awake_waiters_for_state_change(&self, state: &HandleSignalsState) {
        for info in &self.waiters {
            if state.satisfies(info.signals) {
                info.waiter.awake(Ok(()), info.context);
            } else if !state.can_satisfy(info.signals) {
                info.waiter.awake(Err(Error::FailedPrecondition), info.context);
            }
        }
    }
    /// Wakes every waiter with [`Cancelled`](Error::Cancelled) and empties the list.
    pub fn cancel_all_waiters(&mut self) {
        for info in self.waiters.drain(..) {
            info.waiter.awake(Err(Error::Cancelled), info.context);
        }
    }
    /// Number of registrations.
    #[inline]
    pub fn len(&self) -> usize { self.waiters.len() }
    /// Whether there are no registrations.
    #[inline]
    pub fn is_empty(&self) -> bool { self.waiters.is_empty() }
}
