use super::{local::LocalEndpoint, proxy::ProxyEndpoint, EndpointType, Garbage};
use crate::message::MessageInTransit;

/// The content of one slot of a [`MessagePipe`](super::MessagePipe).
#[derive(Debug)]
pub(crate) enum Endpoint {
    Local(LocalEndpoint),
    Proxy(ProxyEndpoint),
}
impl Endpoint {
    pub fn endpoint_type(&self) -> EndpointType {
        match self {
            Self::Local(..) => EndpointType::Local,
            Self::Proxy(..) => EndpointType::Proxy,
        }
    }
    /// Shuts the endpoint down, returning the messages it still held.
    pub fn close(&mut self) -> Garbage {
        match self {
            Self::Local(local) => local.close(),
            Self::Proxy(proxy) => proxy.close(),
        }
    }
    /// Tells the endpoint its peer is gone. Returns whether the endpoint stays in its slot.
    pub fn on_peer_close(&mut self, garbage: &mut Garbage) -> bool {
        match self {
            Self::Local(local) => local.on_peer_close(),
            Self::Proxy(proxy) => proxy.on_peer_close(garbage),
        }
    }
    pub fn enqueue_message(&mut self, message: MessageInTransit) {
        match self {
            Self::Local(local) => local.enqueue_message(message),
            Self::Proxy(proxy) => proxy.enqueue_message(message),
        }
    }
}
