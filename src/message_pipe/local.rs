use super::Garbage;
use crate::{
    dispatcher::{Dispatcher, MessageSize, ReadMessageFlags},
    message::MessageInTransit,
    signals::{HandleSignals, HandleSignalsState},
    waiter::{Waiter, WaiterList},
    Error, Result,
};
use std::{collections::VecDeque, sync::Arc};

/// An endpoint read from and written to by a handle in this process.
#[derive(Debug)]
pub(crate) struct LocalEndpoint {
    is_peer_open: bool,
    queue: VecDeque<MessageInTransit>,
    waiters: WaiterList,
}
impl LocalEndpoint {
    pub fn new() -> Self {
        Self {
            is_peer_open: true,
            queue: VecDeque::new(),
            waiters: WaiterList::new(),
        }
    }
    /// Gives up the unread messages, for a proxy taking this endpoint's place.
    pub fn into_queue(mut self) -> VecDeque<MessageInTransit> {
        self.waiters.cancel_all_waiters();
        std::mem::take(&mut self.queue)
    }

    pub fn close(&mut self) -> Garbage {
        self.waiters.cancel_all_waiters();
        self.queue.drain(..).collect()
    }
    /// A local endpoint outlives its peer: whatever is queued stays readable.
    pub fn on_peer_close(&mut self) -> bool {
        self.is_peer_open = false;
        self.waiters
            .awake_waiters_for_state_change(&self.signals_state());
        true
    }
    pub fn enqueue_message(&mut self, message: MessageInTransit) {
        self.queue.push_back(message);
        self.waiters
            .awake_waiters_for_state_change(&self.signals_state());
    }

    pub fn read_message(
        &mut self,
        buffer: &mut [u8],
        size: &mut MessageSize,
        max_handles: usize,
        flags: ReadMessageFlags,
        discarded: &mut Option<MessageInTransit>,
    ) -> Result<Vec<Option<Arc<Dispatcher>>>> {
        let Some(front) = self.queue.front() else {
            return Err(if self.is_peer_open {
                Error::ShouldWait
            } else {
                Error::FailedPrecondition
            });
        };
        *size = MessageSize {
            num_bytes: front.num_bytes(),
            num_handles: front.num_handles(),
        };
        if size.num_bytes > buffer.len() || size.num_handles > max_handles {
            if flags.contains(ReadMessageFlags::MAY_DISCARD) {
                *discarded = self.queue.pop_front();
                self.on_dequeue();
            }
            return Err(Error::ResourceExhausted);
        }

        let mut message = self.queue.pop_front().ok_or(Error::ShouldWait)?;
        buffer[..size.num_bytes].copy_from_slice(message.bytes());
        let dispatchers = message.take_dispatchers();
        self.on_dequeue();
        Ok(dispatchers)
    }
    fn on_dequeue(&mut self) {
        // Draining the last message of a pipe whose peer is gone makes READABLE unreachable.
        if self.queue.is_empty() {
            self.waiters
                .awake_waiters_for_state_change(&self.signals_state());
        }
    }

    pub fn signals_state(&self) -> HandleSignalsState {
        let mut satisfied = HandleSignals::empty();
        let mut satisfiable = HandleSignals::empty();
        if !self.queue.is_empty() {
            satisfied |= HandleSignals::READABLE;
            satisfiable |= HandleSignals::READABLE;
        }
        if self.is_peer_open {
            satisfied |= HandleSignals::WRITABLE;
            satisfiable |= HandleSignals::READABLE | HandleSignals::WRITABLE;
        }
        HandleSignalsState::new(satisfied, satisfiable)
    }
    pub fn add_waiter(
        &mut self,
        waiter: &Arc<Waiter>,
        signals: HandleSignals,
        context: u32,
    ) -> Result {
        let state = self.signals_state();
        if state.satisfies(signals) {
            return Err(Error::AlreadyExists);
        }
        if !state.can_satisfy(signals) {
            return Err(Error::FailedPrecondition);
        }
        self.waiters.add_waiter(waiter, signals, context);
        Ok(())
    }
    pub fn remove_waiter(&mut self, waiter: &Arc<Waiter>) { self.waiters.remove_waiter(waiter); }
    pub fn cancel_all_waiters(&mut self) { self.waiters.cancel_all_waiters(); }
}
