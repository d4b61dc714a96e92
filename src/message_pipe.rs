//! Message pipes: two endpoints, each of which receives what is written into the other.
//!
//! Either endpoint is [`Local`](EndpointType::Local), backing a handle in this process, or a
//! [`Proxy`](EndpointType::Proxy) that forwards across a [`Channel`] to an endpoint in another
//! process. A local endpoint turns into a proxy when its handle is sent over a channel.
//!
//! One lock covers both endpoints, since closing one of them always touches the other.

mod dispatcher;
mod endpoint;
mod local;
mod proxy;

pub use dispatcher::MessagePipeDispatcher;

use crate::{
    channel::Channel,
    dispatcher::{Dispatcher, DispatcherTransport, MessageSize, ReadMessageFlags},
    message::{EndpointId, MessageInTransit, MessageType},
    misc::lock,
    signals::{HandleSignals, HandleSignalsState},
    waiter::Waiter,
    Error, Result,
};
use endpoint::Endpoint;
use local::LocalEndpoint;
use proxy::ProxyEndpoint;
use std::sync::{Arc, Mutex};

/// Which of the two variants an endpoint is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EndpointType {
    /// Has a message queue and backs a handle in this process.
    Local,
    /// Forwards to and from another process through a [`Channel`].
    Proxy,
}

/// Returns the other port of a pipe.
#[inline]
pub const fn peer_port(port: usize) -> usize { port ^ 1 }

/// Messages, and therefore handles, that have to be dropped once the pipe lock is released.
///
/// Dropping a message closes the handles it carries, which may lock other pipes.
type Garbage = Vec<MessageInTransit>;

/// A two-endpoint message pipe.
#[derive(Debug)]
pub struct MessagePipe {
    endpoints: Mutex<[Option<Endpoint>; 2]>,
}
impl MessagePipe {
    /// Creates a pipe with two local endpoints.
    pub fn new_local_local() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new([
                Some(Endpoint::Local(LocalEndpoint::new())),
                Some(Endpoint::Local(LocalEndpoint::new())),
            ]),
        })
    }
    /// Creates a pipe whose port 0 is local and whose port 1 is a proxy, yet to be attached to a
    /// channel. This is how both ends of a freshly connected channel get their bootstrap pipe.
    pub fn new_local_proxy() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new([
                Some(Endpoint::Local(LocalEndpoint::new())),
                Some(Endpoint::Proxy(ProxyEndpoint::new())),
            ]),
        })
    }

    /// The variant of the endpoint at `port`, or `None` if it is gone.
    pub fn endpoint_type(&self, port: usize) -> Option<EndpointType> {
        lock(&self.endpoints)[port].as_ref().map(Endpoint::endpoint_type)
    }

    /// Closes the endpoint at `port` and lets its peer know.
    pub fn close(&self, port: usize) {
        let mut garbage = Garbage::new();
        {
            let mut endpoints = lock(&self.endpoints);
            let Some(mut endpoint) = endpoints[port].take() else {
                log::error!("closing port {port} of a message pipe twice");
                return;
            };
            garbage.extend(endpoint.close());
            Self::notify_peer_closed(&mut endpoints, peer_port(port), &mut garbage);
        }
        drop(garbage);
    }

    fn notify_peer_closed(
        endpoints: &mut [Option<Endpoint>; 2],
        peer: usize,
        garbage: &mut Garbage,
    ) {
        if let Some(endpoint) = endpoints[peer].as_mut() {
            if !endpoint.on_peer_close(garbage) {
                endpoints[peer] = None;
            }
        }
    }

    /// Delivers `bytes`, along with the handles in `transports`, written on `port` to its peer.
    ///
    /// Fails with [`FailedPrecondition`](Error::FailedPrecondition) if the peer is gone. The
    /// transits are then left uncompleted, so dropping them cancels them and every handle stays
    /// open.
    pub(crate) fn write_message(
        &self,
        port: usize,
        bytes: &[u8],
        transports: Vec<DispatcherTransport>,
    ) -> Result {
        let mut endpoints = lock(&self.endpoints);
        debug_assert!(endpoints[port].is_some(), "writing on a closed port");
        let Some(peer) = endpoints[peer_port(port)].as_mut() else {
            drop(endpoints);
            drop(transports);
            return Err(Error::FailedPrecondition);
        };
        let mut message = MessageInTransit::new_data(bytes.to_vec());
        if !transports.is_empty() {
            let dispatchers = transports
                .into_iter()
                .map(|t| Some(t.complete_transit_and_close()))
                .collect();
            message.set_dispatchers(dispatchers);
        }
        peer.enqueue_message(message);
        Ok(())
    }

    /// Reads from the local endpoint at `port`.
    pub(crate) fn read_message(
        &self,
        port: usize,
        buffer: &mut [u8],
        size: &mut MessageSize,
        max_handles: usize,
        flags: ReadMessageFlags,
    ) -> Result<Vec<Option<Arc<Dispatcher>>>> {
        let mut discarded = None;
        let ret = match lock(&self.endpoints)[port].as_mut() {
            Some(Endpoint::Local(local)) => {
                local.read_message(buffer, size, max_handles, flags, &mut discarded)
            }
            Some(Endpoint::Proxy(..)) => Err(Error::Unsupported),
            None => Err(Error::InvalidArgument),
        };
        drop(discarded);
        ret
    }

    /// Current signals of the endpoint at `port`.
    pub fn signals_state(&self, port: usize) -> HandleSignalsState {
        match lock(&self.endpoints)[port].as_ref() {
            Some(Endpoint::Local(local)) => local.signals_state(),
            _ => HandleSignalsState::never(),
        }
    }
    pub(crate) fn add_waiter(
        &self,
        port: usize,
        waiter: &Arc<Waiter>,
        signals: HandleSignals,
        context: u32,
    ) -> Result {
        match lock(&self.endpoints)[port].as_mut() {
            Some(Endpoint::Local(local)) => local.add_waiter(waiter, signals, context),
            _ => Err(Error::FailedPrecondition),
        }
    }
    pub(crate) fn remove_waiter(&self, port: usize, waiter: &Arc<Waiter>) {
        if let Some(Endpoint::Local(local)) = lock(&self.endpoints)[port].as_mut() {
            local.remove_waiter(waiter);
        }
    }
    pub(crate) fn cancel_all_waiters(&self, port: usize) {
        if let Some(Endpoint::Local(local)) = lock(&self.endpoints)[port].as_mut() {
            local.cancel_all_waiters();
        }
    }

    /// Replaces the local endpoint at `port` with an unattached proxy that inherits its unread
    /// messages. Used right before the endpoint's handle is sent over a channel.
    pub(crate) fn convert_local_to_proxy(&self, port: usize) {
        let mut endpoints = lock(&self.endpoints);
        let is_peer_open = endpoints[peer_port(port)].is_some();
        match endpoints[port].take() {
            Some(Endpoint::Local(local)) => {
                let proxy = ProxyEndpoint::from_local(local, is_peer_open);
                endpoints[port] = Some(Endpoint::Proxy(proxy));
            }
            other => {
                log::error!("converting a non-local endpoint to a proxy");
                endpoints[port] = other;
            }
        }
    }

    /// Delivers a message straight into the endpoint at `port`. Used by channels for inbound
    /// traffic, which is addressed to the receiving endpoint rather than the sending one.
    pub(crate) fn enqueue_message(&self, port: usize, message: MessageInTransit) -> Result {
        if message.message_type() == Some(MessageType::MessagePipe) {
            log::warn!("dropping unrecognized message pipe control message");
            return Err(Error::InvalidArgument);
        }
        let mut endpoints = lock(&self.endpoints);
        let Some(endpoint) = endpoints[port].as_mut() else {
            drop(endpoints);
            drop(message);
            return Err(Error::FailedPrecondition);
        };
        endpoint.enqueue_message(message);
        Ok(())
    }

    /// Attaches the proxy at `port` to `channel` under `local_id`. Fails if the endpoint is gone,
    /// which happens when its peer closed before the attachment.
    pub(crate) fn attach(&self, port: usize, channel: &Arc<Channel>, local_id: EndpointId) -> bool {
        match lock(&self.endpoints)[port].as_mut() {
            Some(Endpoint::Proxy(proxy)) => {
                proxy.attach(channel, local_id);
                true
            }
            Some(Endpoint::Local(..)) => {
                log::error!("attaching a local endpoint to a channel");
                false
            }
            None => false,
        }
    }

    /// Starts forwarding from the proxy at `port` to `remote_id`.
    pub(crate) fn run(&self, port: usize, remote_id: EndpointId) -> bool {
        let mut garbage = Garbage::new();
        let ret = {
            let mut endpoints = lock(&self.endpoints);
            match endpoints[port].as_mut() {
                Some(Endpoint::Proxy(proxy)) => {
                    if !proxy.run(remote_id, &mut garbage) {
                        endpoints[port] = None;
                    }
                    true
                }
                Some(Endpoint::Local(..)) => {
                    log::error!("running a local endpoint");
                    false
                }
                None => false,
            }
        };
        drop(garbage);
        ret
    }

    /// Handles the removal of the remote endpoint the proxy at `port` forwards to: the proxy goes
    /// away and its peer learns that it has been closed.
    pub(crate) fn on_remove(&self, port: usize) {
        let mut garbage = Garbage::new();
        {
            let mut endpoints = lock(&self.endpoints);
            match endpoints[port].take() {
                Some(Endpoint::Proxy(mut proxy)) => {
                    garbage.extend(proxy.on_remove());
                    Self::notify_peer_closed(&mut endpoints, peer_port(port), &mut garbage);
                }
                Some(local @ Endpoint::Local(..)) => {
                    log::error!("removing a local endpoint");
                    endpoints[port] = Some(local);
                }
                None => {}
            }
        }
        drop(garbage);
    }
}
