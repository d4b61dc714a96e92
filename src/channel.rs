//! Multiplexing message pipe endpoints over one transport.
//!
//! A [`Channel`] owns one [`RawChannel`] and a table of the proxy endpoints attached to it, each
//! under a local id unique within the channel. Messages on the wire are addressed by those ids, and
//! a small control protocol, carried in [`Channel`](MessageType::Channel)-typed messages, manages
//! the lifecycle of each entry:
//!
//! - **Run**: sent by the side that received an endpoint, once it has attached its own proxy for
//!   it. Tells the sending side which remote id to forward to.
//! - **Remove**: sent when a proxy detaches. The other side detaches its proxy too and replies
//!   with...
//! - **Remove ack**: ...after which both table entries are gone.
//!
//! An entry that is waiting for its half of the removal handshake is a *zombie*: it no longer
//! refers to a pipe, and data addressed to it is dropped.

use crate::{
    message::{
        ChannelSubtype, EndpointId, MessageInTransit, MessageType, MessageView,
        BOOTSTRAP_ENDPOINT_ID, INVALID_ENDPOINT_ID, SUBTYPE_ENDPOINT_DATA,
    },
    message_pipe::{peer_port, MessagePipe},
    misc::lock,
    platform_handle::PlatformHandle,
    raw_channel::{FatalError, RawChannel, RawChannelDelegate},
};
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{Arc, Mutex, Weak},
};

/// Where an endpoint table entry is in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Attached to a live pipe.
    Normal,
    /// The remote side asked for removal and was acknowledged; waiting for the local proxy to
    /// detach.
    WaitLocalDetach,
    /// The local proxy detached and asked for removal; waiting for the remote side's
    /// acknowledgement.
    WaitRemoteRemoveAck,
    /// Both of the above at once.
    WaitLocalDetachAndRemoteRemoveAck,
}

#[derive(Debug)]
struct EndpointInfo {
    state: EndpointState,
    /// `None` for zombies.
    message_pipe: Option<Arc<MessagePipe>>,
    port: usize,
}

#[derive(Debug)]
struct EndpointTable {
    is_running: bool,
    next_local_id: EndpointId,
    endpoints: HashMap<EndpointId, EndpointInfo>,
}
impl EndpointTable {
    fn allocate_id(&mut self) -> EndpointId {
        loop {
            let id = self.next_local_id;
            self.next_local_id = self.next_local_id.wrapping_add(1);
            if id != INVALID_ENDPOINT_ID && !self.endpoints.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Carries any number of message pipe endpoints over one [`RawChannel`].
///
/// Lock order: a message pipe may call into its channel while locked, but the channel never calls
/// into a message pipe while holding its own endpoint table lock.
pub struct Channel {
    this: Weak<Channel>,
    table: Mutex<EndpointTable>,
    /// Also serves as the write lock.
    transport: Mutex<Option<Box<dyn RawChannel>>>,
}
impl Channel {
    /// Creates a channel with no transport. Call [`init()`](Self::init) before use.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: Weak::clone(this),
            table: Mutex::new(EndpointTable {
                is_running: true,
                next_local_id: BOOTSTRAP_ENDPOINT_ID,
                endpoints: HashMap::new(),
            }),
            transport: Mutex::new(None),
        })
    }

    /// Starts the channel on `raw_channel`. Returns `false` if the transport fails to start.
    pub fn init(&self, mut raw_channel: Box<dyn RawChannel>) -> bool {
        let delegate: Weak<dyn RawChannelDelegate> = self.this.clone();
        // Held across initialization so that messages read right away can already be answered.
        let mut transport = lock(&self.transport);
        if transport.is_some() {
            log::error!("channel initialized twice");
            return false;
        }
        if !raw_channel.init(delegate) {
            log::warn!("transport failed to initialize");
            return false;
        }
        *transport = Some(raw_channel);
        true
    }

    /// Attaches the proxy at `port` of `message_pipe`, returning the id it got. The first endpoint
    /// attached to a fresh channel gets [`BOOTSTRAP_ENDPOINT_ID`].
    ///
    /// Returns [`INVALID_ENDPOINT_ID`] if the endpoint went away before it could be attached, or
    /// the channel is shut down.
    pub fn attach_message_pipe_endpoint(
        &self,
        message_pipe: &Arc<MessagePipe>,
        port: usize,
    ) -> EndpointId {
        let Some(this) = self.this.upgrade() else {
            return INVALID_ENDPOINT_ID;
        };
        let local_id = {
            let mut table = lock(&self.table);
            if !table.is_running {
                log::warn!("attaching an endpoint to a channel that is shut down");
                return INVALID_ENDPOINT_ID;
            }
            let local_id = table.allocate_id();
            table.endpoints.insert(
                local_id,
                EndpointInfo {
                    state: EndpointState::Normal,
                    message_pipe: Some(Arc::clone(message_pipe)),
                    port,
                },
            );
            local_id
        };

        if !message_pipe.attach(port, &this, local_id) {
            // Lost the race with the closing of the endpoint's peer.
            lock(&self.table).endpoints.remove(&local_id);
            return INVALID_ENDPOINT_ID;
        }
        log::debug!("attached endpoint {local_id}");
        local_id
    }

    /// Lets the endpoint attached as `local_id` start forwarding to `remote_id`.
    ///
    /// Succeeds without doing anything if the entry is a zombie, since its removal is already
    /// underway. Fails if there is no such entry.
    pub fn run_message_pipe_endpoint(&self, local_id: EndpointId, remote_id: EndpointId) -> bool {
        let (message_pipe, port) = {
            let table = lock(&self.table);
            let Some(info) = table.endpoints.get(&local_id) else {
                return false;
            };
            match (&info.message_pipe, info.state) {
                (Some(pipe), EndpointState::Normal) => (Arc::clone(pipe), info.port),
                _ => return true,
            }
        };
        log::debug!("running endpoint {local_id} toward {remote_id}");
        message_pipe.run(port, remote_id)
    }

    /// Called by a proxy endpoint when it detaches from the channel.
    pub(crate) fn detach_message_pipe_endpoint(&self, local_id: EndpointId, remote_id: EndpointId) {
        debug_assert_ne!(local_id, INVALID_ENDPOINT_ID, "detaching the invalid endpoint id");
        {
            let mut table = lock(&self.table);
            if !table.is_running {
                return;
            }
            let Some(info) = table.endpoints.get_mut(&local_id) else {
                log::error!("detaching unknown endpoint {local_id}");
                return;
            };
            match info.state {
                EndpointState::Normal => {
                    info.state = EndpointState::WaitRemoteRemoveAck;
                    info.message_pipe = None;
                    if remote_id == INVALID_ENDPOINT_ID {
                        // Never ran, so the other side has no entry to remove.
                        return;
                    }
                }
                EndpointState::WaitLocalDetachAndRemoteRemoveAck => {
                    // Our remove is already on its way.
                    info.state = EndpointState::WaitRemoteRemoveAck;
                    info.message_pipe = None;
                    return;
                }
                EndpointState::WaitLocalDetach => {
                    table.endpoints.remove(&local_id);
                    log::debug!("endpoint {local_id} removed");
                    return;
                }
                EndpointState::WaitRemoteRemoveAck => {
                    log::error!("endpoint {local_id} detached twice");
                    return;
                }
            }
        }
        log::debug!("detached endpoint {local_id}, asking {remote_id} to remove");
        self.send_control_message(ChannelSubtype::RemoveMessagePipeEndpoint, local_id, remote_id);
    }

    /// Writes a message to the transport. Fails once the channel is shut down.
    pub fn write_message(&self, message: MessageInTransit) -> bool {
        let mut transport = lock(&self.transport);
        match transport.as_mut() {
            Some(raw_channel) => raw_channel.write_message(message),
            None => {
                log::debug!("dropping message written to a channel that is shut down");
                false
            }
        }
    }
    /// Whether everything written so far has left the transport.
    pub fn is_write_buffer_empty(&self) -> bool {
        lock(&self.transport)
            .as_ref()
            .map_or(true, |raw_channel| raw_channel.is_write_buffer_empty())
    }

    /// Shuts the transport down and removes every endpoint, telling the live ones that their
    /// remote side is gone.
    pub fn shutdown(&self) {
        let raw_channel = lock(&self.transport).take();
        if let Some(mut raw_channel) = raw_channel {
            raw_channel.shutdown();
        }

        let endpoints = {
            let mut table = lock(&self.table);
            table.is_running = false;
            std::mem::take(&mut table.endpoints)
        };
        let (mut num_live, mut num_zombies) = (0usize, 0usize);
        for info in endpoints.into_values() {
            match (info.message_pipe, info.state) {
                (Some(pipe), EndpointState::Normal) => {
                    num_live += 1;
                    pipe.on_remove(info.port);
                }
                _ => num_zombies += 1,
            }
        }
        log::debug!("channel shut down with {num_live} live and {num_zombies} zombie endpoints");
    }

    /// The state of the entry for `local_id`, if there is one.
    pub fn endpoint_state(&self, local_id: EndpointId) -> Option<EndpointState> {
        lock(&self.table).endpoints.get(&local_id).map(|info| info.state)
    }
    #[cfg(test)]
    pub(crate) fn set_endpoint_state(&self, local_id: EndpointId, state: EndpointState) {
        if let Some(info) = lock(&self.table).endpoints.get_mut(&local_id) {
            info.state = state;
        }
    }

    fn send_control_message(
        &self,
        subtype: ChannelSubtype,
        local_id: EndpointId,
        remote_id: EndpointId,
    ) -> bool {
        let sent = self.write_message(MessageInTransit::new_control(subtype, local_id, remote_id));
        if !sent {
            log::warn!("failed to send {subtype:?} from {local_id} to {remote_id}");
        }
        sent
    }

    fn on_read_downstream(&self, view: &MessageView<'_>, platform_handles: Vec<PlatformHandle>) {
        if view.message_type() == Some(MessageType::MessagePipeEndpoint)
            && view.subtype() != SUBTYPE_ENDPOINT_DATA
        {
            log::warn!("dropping endpoint message with unknown subtype {}", view.subtype());
            return;
        }
        let local_id = view.destination_id();
        let (message_pipe, port) = {
            let table = lock(&self.table);
            let Some(info) = table.endpoints.get(&local_id) else {
                log::warn!("dropping message for unknown endpoint {local_id}");
                return;
            };
            let Some(pipe) = &info.message_pipe else {
                log::debug!("dropping message for zombie endpoint {local_id}");
                return;
            };
            (Arc::clone(pipe), info.port)
        };
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let mut message = MessageInTransit::from_view(view, platform_handles);
        message.deserialize_dispatchers(&this);
        if let Err(e) = message_pipe.enqueue_message(peer_port(port), message) {
            log::debug!("failed to deliver message to endpoint {local_id}: {e}");
        }
    }

    fn on_read_control(&self, view: &MessageView<'_>, platform_handles: Vec<PlatformHandle>) {
        if !platform_handles.is_empty() || !view.handle_table().is_empty() {
            log::warn!("ignoring control message carrying handles");
            return;
        }
        let (local_id, remote_id) = (view.destination_id(), view.source_id());
        match ChannelSubtype::from_wire(view.subtype()) {
            Some(ChannelSubtype::RunMessagePipeEndpoint) => {
                if !self.run_message_pipe_endpoint(local_id, remote_id) {
                    log::warn!("received run message for unknown endpoint {local_id}");
                }
            }
            Some(
                ChannelSubtype::RemoveMessagePipeEndpoint
                | ChannelSubtype::RemoveMessagePipeEndpointAck,
            ) => self.on_remove_message_pipe_endpoint(local_id, remote_id),
            None => {
                log::warn!("received control message with unknown subtype {}", view.subtype());
                self.on_fatal_error(FatalError::Read);
            }
        }
    }

    fn on_remove_message_pipe_endpoint(&self, local_id: EndpointId, remote_id: EndpointId) {
        let (message_pipe, port) = {
            let mut table = lock(&self.table);
            let Some(info) = table.endpoints.get_mut(&local_id) else {
                log::warn!("received remove message for unknown endpoint {local_id}");
                return;
            };
            match info.state {
                EndpointState::WaitRemoteRemoveAck => {
                    table.endpoints.remove(&local_id);
                    log::debug!("endpoint {local_id} removed");
                    return;
                }
                EndpointState::Normal => {
                    info.state = EndpointState::WaitLocalDetach;
                    let Some(pipe) = info.message_pipe.take() else {
                        log::error!("live endpoint {local_id} has no message pipe");
                        return;
                    };
                    (pipe, info.port)
                }
                EndpointState::WaitLocalDetach
                | EndpointState::WaitLocalDetachAndRemoteRemoveAck => {
                    log::warn!("received duplicate remove message for endpoint {local_id}");
                    return;
                }
            }
        };
        self.send_control_message(
            ChannelSubtype::RemoveMessagePipeEndpointAck,
            local_id,
            remote_id,
        );
        message_pipe.on_remove(port);
    }
}

impl RawChannelDelegate for Channel {
    fn on_read_message(&self, view: &MessageView<'_>, platform_handles: Vec<PlatformHandle>) {
        match view.message_type() {
            Some(MessageType::MessagePipeEndpoint | MessageType::MessagePipe) => {
                self.on_read_downstream(view, platform_handles)
            }
            Some(MessageType::Channel) => self.on_read_control(view, platform_handles),
            None => {
                log::warn!("received message of unknown type {}", view.header().message_type);
                self.on_fatal_error(FatalError::Read);
            }
        }
    }
    fn on_fatal_error(&self, error: FatalError) {
        log::warn!("channel transport failed ({error:?}), shutting down");
        self.shutdown();
    }
}

impl Debug for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = lock(&self.table);
        f.debug_struct("Channel")
            .field("is_running", &table.is_running)
            .field("num_endpoints", &table.endpoints.len())
            .finish_non_exhaustive()
    }
}
