use super::{local::LocalEndpoint, Garbage};
use crate::{
    channel::Channel,
    message::{EndpointId, MessageInTransit, INVALID_ENDPOINT_ID},
};
use std::{collections::VecDeque, sync::Arc};

/// An endpoint standing in for one in another process.
///
/// Goes through four stages: unattached (no channel), attached but not running (has a local id on
/// a channel, still buffering), running (knows the remote id and forwards immediately), and
/// detached, after which it is dropped from its slot.
#[derive(Debug)]
pub(crate) struct ProxyEndpoint {
    channel: Option<Arc<Channel>>,
    local_id: EndpointId,
    remote_id: EndpointId,
    is_peer_open: bool,
    paused_queue: VecDeque<MessageInTransit>,
}
impl ProxyEndpoint {
    pub fn new() -> Self {
        Self {
            channel: None,
            local_id: INVALID_ENDPOINT_ID,
            remote_id: INVALID_ENDPOINT_ID,
            is_peer_open: true,
            paused_queue: VecDeque::new(),
        }
    }
    /// Takes the place of `local`, forwarding its unread messages once running.
    pub fn from_local(local: LocalEndpoint, is_peer_open: bool) -> Self {
        Self {
            is_peer_open,
            paused_queue: local.into_queue(),
            ..Self::new()
        }
    }

    #[inline]
    fn is_attached(&self) -> bool { self.channel.is_some() }
    #[inline]
    fn is_running(&self) -> bool { self.remote_id != INVALID_ENDPOINT_ID }

    pub fn close(&mut self) -> Garbage {
        self.detach();
        self.paused_queue.drain(..).collect()
    }
    pub fn on_peer_close(&mut self, garbage: &mut Garbage) -> bool {
        self.is_peer_open = false;
        if !self.paused_queue.is_empty() {
            // Stays until running, so that the buffered messages reach the other side.
            return true;
        }
        if self.is_attached() && !self.is_running() {
            // The other side still has to be told to run before it can be told to go away.
            return true;
        }
        self.detach();
        garbage.extend(self.paused_queue.drain(..));
        false
    }

    pub fn enqueue_message(&mut self, message: MessageInTransit) {
        if self.is_running() {
            self.send(message);
        } else {
            self.paused_queue.push_back(message);
        }
    }
    fn send(&self, mut message: MessageInTransit) {
        let Some(channel) = &self.channel else {
            log::error!("running proxy endpoint has no channel");
            return;
        };
        message.set_source_id(self.local_id);
        message.set_destination_id(self.remote_id);
        message.serialize_and_close_dispatchers(channel);
        if !channel.write_message(message) {
            log::warn!(
                "failed to forward message from endpoint {} to {}",
                self.local_id,
                self.remote_id
            );
        }
    }

    pub fn attach(&mut self, channel: &Arc<Channel>, local_id: EndpointId) {
        debug_assert!(!self.is_attached(), "proxy endpoint attached twice");
        self.channel = Some(Arc::clone(channel));
        self.local_id = local_id;
    }
    /// Starts forwarding to `remote_id`, flushing everything buffered so far. Returns whether the
    /// endpoint stays in its slot.
    pub fn run(&mut self, remote_id: EndpointId, garbage: &mut Garbage) -> bool {
        if !self.is_attached() {
            log::error!("running an unattached proxy endpoint");
            return true;
        }
        if self.is_running() {
            log::warn!(
                "endpoint {} told to run twice, keeping remote {}",
                self.local_id,
                self.remote_id
            );
            return true;
        }
        self.remote_id = remote_id;
        while let Some(message) = self.paused_queue.pop_front() {
            self.send(message);
        }
        if self.is_peer_open {
            return true;
        }
        self.detach();
        garbage.extend(self.paused_queue.drain(..));
        false
    }
    /// The remote endpoint went away.
    pub fn on_remove(&mut self) -> Garbage {
        self.detach();
        self.paused_queue.drain(..).collect()
    }

    fn detach(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.detach_message_pipe_endpoint(self.local_id, self.remote_id);
        }
        self.local_id = INVALID_ENDPOINT_ID;
        self.remote_id = INVALID_ENDPOINT_ID;
    }
}
