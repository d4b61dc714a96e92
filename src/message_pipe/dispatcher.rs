use super::{peer_port, MessagePipe};
use crate::{
    channel::Channel,
    dispatcher::{
        Dispatcher, DispatcherImpl, DispatcherTransport, DispatcherType, MessageSize,
        ReadMessageFlags,
    },
    message::{ChannelSubtype, EndpointId, MessageInTransit, INVALID_ENDPOINT_ID},
    platform_handle::PlatformHandle,
    signals::{HandleSignals, HandleSignalsState},
    waiter::Waiter,
    Error, Result,
};
use std::sync::Arc;

const SERIALIZED_SIZE: usize = std::mem::size_of::<EndpointId>();

/// A handle to one endpoint of a [`MessagePipe`].
#[derive(Debug)]
pub struct MessagePipeDispatcher {
    pipe: Option<Arc<MessagePipe>>,
    port: usize,
}
impl MessagePipeDispatcher {
    /// Creates a pipe and returns handles to both of its ends.
    pub fn create_pair() -> (Arc<Dispatcher>, Arc<Dispatcher>) {
        let pipe = MessagePipe::new_local_local();
        (Self::new(Arc::clone(&pipe), 0), Self::new(pipe, 1))
    }
    /// Wraps the local endpoint at `port` of an existing pipe into a handle.
    pub fn new(pipe: Arc<MessagePipe>, port: usize) -> Arc<Dispatcher> {
        debug_assert!(port < 2, "message pipes have two ports");
        Dispatcher::new(Box::new(Self {
            pipe: Some(pipe),
            port,
        }))
    }

    /// Reconstitutes a handle sent as `source`: a fresh pipe whose far side is a proxy attached to
    /// `channel` and running toward the sender's endpoint.
    pub(crate) fn deserialize(
        channel: &Arc<Channel>,
        source: &[u8],
        _platform_handles: Vec<PlatformHandle>,
    ) -> Option<Arc<Dispatcher>> {
        let Some(remote_id) = source
            .get(..SERIALIZED_SIZE)
            .and_then(|raw| raw.try_into().ok())
            .map(EndpointId::from_le_bytes)
        else {
            log::warn!("invalid serialized message pipe endpoint ({} bytes)", source.len());
            return None;
        };

        if remote_id == INVALID_ENDPOINT_ID {
            // The sender's endpoint lost its peer before it could be attached; what arrives is an
            // endpoint whose peer is already closed.
            let pipe = MessagePipe::new_local_local();
            pipe.close(peer_port(0));
            return Some(Self::new(pipe, 0));
        }

        let pipe = MessagePipe::new_local_proxy();
        let local_id = channel.attach_message_pipe_endpoint(&pipe, 1);
        if local_id == INVALID_ENDPOINT_ID {
            log::error!("failed to attach received message pipe endpoint");
            pipe.close(1);
            return Some(Self::new(pipe, 0));
        }
        if !channel.run_message_pipe_endpoint(local_id, remote_id) {
            log::error!("failed to run received message pipe endpoint {local_id}");
        }
        let run = MessageInTransit::new_control(
            ChannelSubtype::RunMessagePipeEndpoint,
            local_id,
            remote_id,
        );
        if !channel.write_message(run) {
            log::warn!("failed to tell endpoint {remote_id} to run");
        }
        Some(Self::new(pipe, 0))
    }
}

impl DispatcherImpl for MessagePipeDispatcher {
    fn dispatcher_type(&self) -> DispatcherType { DispatcherType::MessagePipe }

    fn cancel_all_waiters(&mut self) {
        if let Some(pipe) = &self.pipe {
            pipe.cancel_all_waiters(self.port);
        }
    }
    fn close(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            pipe.close(self.port);
        }
    }
    fn create_equivalent_and_close(&mut self) -> Box<dyn DispatcherImpl> {
        Box::new(Self {
            pipe: self.pipe.take(),
            port: self.port,
        })
    }

    fn write_message(&mut self, bytes: &[u8], transports: Vec<DispatcherTransport>) -> Result {
        let pipe = self.pipe.as_ref().ok_or(Error::InvalidArgument)?;
        let config = crate::config::get();
        if bytes.len() > config.max_message_num_bytes
            || transports.len() > config.max_message_num_handles
        {
            return Err(Error::ResourceExhausted);
        }
        if transports.iter().any(|t| t.is_endpoint_of(pipe)) {
            // Neither end of a pipe may travel through the pipe itself.
            return Err(Error::InvalidArgument);
        }
        pipe.write_message(self.port, bytes, transports)
    }
    fn read_message(
        &mut self,
        buffer: &mut [u8],
        size: &mut MessageSize,
        max_handles: usize,
        flags: ReadMessageFlags,
    ) -> Result<Vec<Option<Arc<Dispatcher>>>> {
        let pipe = self.pipe.as_ref().ok_or(Error::InvalidArgument)?;
        pipe.read_message(self.port, buffer, size, max_handles, flags)
    }

    fn add_waiter(&mut self, waiter: &Arc<Waiter>, signals: HandleSignals, context: u32) -> Result {
        let pipe = self.pipe.as_ref().ok_or(Error::InvalidArgument)?;
        pipe.add_waiter(self.port, waiter, signals, context)
    }
    fn remove_waiter(&mut self, waiter: &Arc<Waiter>) {
        if let Some(pipe) = &self.pipe {
            pipe.remove_waiter(self.port, waiter);
        }
    }
    fn signals_state(&self) -> HandleSignalsState {
        self.pipe
            .as_ref()
            .map_or_else(HandleSignalsState::never, |pipe| pipe.signals_state(self.port))
    }

    fn message_pipe(&self) -> Option<&Arc<MessagePipe>> { self.pipe.as_ref() }

    fn start_serialize(&self, _channel: &Arc<Channel>) -> (usize, usize) { (SERIALIZED_SIZE, 0) }
    fn end_serialize_and_close(
        &mut self,
        channel: &Arc<Channel>,
        destination: &mut [u8],
        _platform_handles: &mut Vec<PlatformHandle>,
    ) -> Option<usize> {
        let pipe = self.pipe.take()?;
        pipe.convert_local_to_proxy(self.port);
        // An invalid id is still sent; the receiver turns it into an endpoint with a closed peer.
        let local_id = channel.attach_message_pipe_endpoint(&pipe, self.port);
        if local_id == INVALID_ENDPOINT_ID && pipe.endpoint_type(self.port).is_some() {
            // Never attached, so close the proxy here and let its local peer see it gone.
            pipe.close(self.port);
        }
        destination
            .get_mut(..SERIALIZED_SIZE)?
            .copy_from_slice(&local_id.to_le_bytes());
        Some(SERIALIZED_SIZE)
    }
}
