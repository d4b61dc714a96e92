//! Messages as they travel between endpoints, and their wire format.
//!
//! ## Wire format
//! Every message starts with a fixed 24-byte header, all fields little-endian:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0  | 4 | total size of the message, header included |
//! | 4  | 2 | [type](MessageType) |
//! | 6  | 2 | subtype, meaningful for [`Channel`](MessageType::Channel) messages |
//! | 8  | 4 | source endpoint id |
//! | 12 | 4 | destination endpoint id |
//! | 16 | 4 | payload length in bytes |
//! | 20 | 4 | handle table length in bytes |
//!
//! The payload follows, padded to a multiple of 8 bytes, and then the handle table (see
//! [`transport_data`]). Platform handles referenced by the table travel out of band, alongside the
//! bytes, in whatever way the transport supports.

pub(crate) mod transport_data;

use crate::{
    channel::Channel,
    dispatcher::Dispatcher,
    misc::{align_up, ToU32},
    platform_handle::PlatformHandle,
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use transport_data::TransportData;

/// Identifies one endpoint among those attached to a [`Channel`].
pub type EndpointId = u32;
/// The id that means "no endpoint".
pub const INVALID_ENDPOINT_ID: EndpointId = 0;
/// The id given to the first endpoint attached to a freshly connected channel.
pub const BOOTSTRAP_ENDPOINT_ID: EndpointId = 1;

/// Size of the fixed message header.
pub const HEADER_SIZE: usize = 24;

wire_enum! {
    /// Top-level classification of a message.
    pub enum MessageType: u16 {
        /// User data addressed to a message pipe endpoint.
        MessagePipeEndpoint = 0,
        /// Control message addressed to a message pipe. No such messages are currently defined.
        MessagePipe = 1,
        /// Endpoint lifecycle control message handled by the channel itself.
        Channel = 2,
    }
}

wire_enum! {
    /// Subtypes of [`Channel`](MessageType::Channel) messages.
    pub enum ChannelSubtype: u16 {
        /// "Start forwarding": the destination endpoint may now send to the source endpoint.
        RunMessagePipeEndpoint = 0,
        /// The source endpoint is going away; the destination must detach and acknowledge.
        RemoveMessagePipeEndpoint = 1,
        /// Acknowledges a [`RemoveMessagePipeEndpoint`](Self::RemoveMessagePipeEndpoint).
        RemoveMessagePipeEndpointAck = 2,
    }
}

/// Subtype of [`MessagePipeEndpoint`](MessageType::MessagePipeEndpoint) messages.
pub const SUBTYPE_ENDPOINT_DATA: u16 = 0;

/// The fixed message header.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Size of the whole serialized message.
    pub total_size: u32,
    /// Raw [`MessageType`].
    pub message_type: u16,
    /// Type-specific subtype.
    pub subtype: u16,
    /// Sending endpoint.
    pub source_id: EndpointId,
    /// Receiving endpoint.
    pub destination_id: EndpointId,
    /// Payload length.
    pub num_bytes: u32,
    /// Handle table length.
    pub handle_table_size: u32,
}
impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.total_size.to_le_bytes());
        out[4..6].copy_from_slice(&self.message_type.to_le_bytes());
        out[6..8].copy_from_slice(&self.subtype.to_le_bytes());
        out[8..12].copy_from_slice(&self.source_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.destination_id.to_le_bytes());
        out[16..20].copy_from_slice(&self.num_bytes.to_le_bytes());
        out[20..24].copy_from_slice(&self.handle_table_size.to_le_bytes());
        out
    }
    fn decode(bytes: &[u8]) -> Option<Self> {
        let u32_at = |at: usize| Some(u32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?));
        let u16_at = |at: usize| Some(u16::from_le_bytes(bytes.get(at..at + 2)?.try_into().ok()?));
        Some(Self {
            total_size: u32_at(0)?,
            message_type: u16_at(4)?,
            subtype: u16_at(6)?,
            source_id: u32_at(8)?,
            destination_id: u32_at(12)?,
            num_bytes: u32_at(16)?,
            handle_table_size: u32_at(20)?,
        })
    }
}

/// A validated, borrowed view of one serialized message, as handed out by a transport.
#[derive(Copy, Clone)]
pub struct MessageView<'a> {
    header: Header,
    bytes: &'a [u8],
}
impl<'a> MessageView<'a> {
    /// Returns the size of the message at the start of `buffer`, if enough of the header is there
    /// to tell. Stream transports use this to find message boundaries.
    pub fn next_message_size(buffer: &[u8]) -> Option<usize> {
        let raw = buffer.get(0..4)?;
        Some(u32::from_le_bytes(raw.try_into().ok()?) as usize)
    }
    /// Validates `bytes` as exactly one serialized message.
    ///
    /// On failure, returns a description of what is wrong with it.
    pub fn new(bytes: &'a [u8]) -> Result<Self, &'static str> {
        let header = Header::decode(bytes).ok_or("message shorter than its header")?;
        if header.total_size as usize != bytes.len() {
            return Err("message size does not match its header");
        }
        if bytes.len() % crate::misc::ALIGNMENT != 0 {
            return Err("message size is not properly aligned");
        }
        let num_bytes = header.num_bytes as usize;
        if num_bytes > crate::config::get().max_message_num_bytes {
            return Err("message payload exceeds the configured maximum");
        }
        let table_size = header.handle_table_size as usize;
        let expected = HEADER_SIZE
            .checked_add(align_up(num_bytes))
            .and_then(|n| n.checked_add(table_size))
            .ok_or("message sizes overflow")?;
        if expected != bytes.len() {
            return Err("message sections do not add up to its size");
        }
        let view = Self { header, bytes };
        if table_size != 0 {
            TransportData::validate(view.handle_table())?;
        }
        Ok(view)
    }
    /// The decoded header.
    #[inline]
    pub fn header(&self) -> &Header { &self.header }
    /// The message type, or `None` if it is not one this implementation knows.
    #[inline]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire(self.header.message_type)
    }
    /// The raw subtype.
    #[inline]
    pub fn subtype(&self) -> u16 { self.header.subtype }
    /// Sending endpoint.
    #[inline]
    pub fn source_id(&self) -> EndpointId { self.header.source_id }
    /// Receiving endpoint.
    #[inline]
    pub fn destination_id(&self) -> EndpointId { self.header.destination_id }
    /// The payload.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        let start = HEADER_SIZE;
        &self.bytes[start..start + self.header.num_bytes as usize]
    }
    /// The serialized handle table, empty if the message carries no handles.
    #[inline]
    pub fn handle_table(&self) -> &'a [u8] {
        let start = HEADER_SIZE + align_up(self.header.num_bytes as usize);
        &self.bytes[start..]
    }
    /// The number of platform handles the transport must deliver alongside this message.
    pub fn num_platform_handles(&self) -> usize {
        TransportData::num_platform_handles(self.handle_table())
    }
    /// The whole serialized message.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] { self.bytes }
}
impl Debug for MessageView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageView")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// A message on its way from one endpoint to another.
///
/// Before it reaches a channel, a message carries its handles as live dispatchers. A proxy
/// endpoint serializes them into a handle table (closing them) right before the message is written
/// to the channel; the receiving channel deserializes them back into fresh dispatchers.
pub struct MessageInTransit {
    header: Header,
    payload: Vec<u8>,
    dispatchers: Vec<Option<Arc<Dispatcher>>>,
    transport_data: Option<TransportData>,
}
impl MessageInTransit {
    /// Creates a message with the given payload and no handles.
    pub fn new(message_type: MessageType, subtype: u16, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                total_size: 0,
                message_type: message_type.to_wire(),
                subtype,
                source_id: INVALID_ENDPOINT_ID,
                destination_id: INVALID_ENDPOINT_ID,
                num_bytes: payload.len().to_u32(),
                handle_table_size: 0,
            },
            payload,
            dispatchers: Vec::new(),
            transport_data: None,
        }
    }
    /// Creates a user data message.
    #[inline]
    pub fn new_data(payload: Vec<u8>) -> Self {
        Self::new(MessageType::MessagePipeEndpoint, SUBTYPE_ENDPOINT_DATA, payload)
    }
    /// Creates a channel control message.
    pub(crate) fn new_control(
        subtype: ChannelSubtype,
        source_id: EndpointId,
        destination_id: EndpointId,
    ) -> Self {
        let mut message = Self::new(MessageType::Channel, subtype.to_wire(), Vec::new());
        message.set_source_id(source_id);
        message.set_destination_id(destination_id);
        message
    }
    /// Reconstructs a message received by a transport. Handles stay serialized until
    /// [`deserialize_dispatchers()`](Self::deserialize_dispatchers) is called.
    pub fn from_view(view: &MessageView<'_>, platform_handles: Vec<PlatformHandle>) -> Self {
        let mut header = *view.header();
        header.total_size = 0;
        let table = view.handle_table();
        let transport_data = (!table.is_empty() || !platform_handles.is_empty())
            .then(|| TransportData::from_wire(table.to_vec(), platform_handles));
        Self {
            header,
            payload: view.bytes().to_vec(),
            dispatchers: Vec::new(),
            transport_data,
        }
    }

    /// The raw header. `total_size` is only meaningful on the wire.
    #[inline]
    pub fn header(&self) -> &Header { &self.header }
    /// The message type, if known.
    #[inline]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire(self.header.message_type)
    }
    /// The raw subtype.
    #[inline]
    pub fn subtype(&self) -> u16 { self.header.subtype }
    /// Sending endpoint.
    #[inline]
    pub fn source_id(&self) -> EndpointId { self.header.source_id }
    /// Receiving endpoint.
    #[inline]
    pub fn destination_id(&self) -> EndpointId { self.header.destination_id }
    #[inline]
    pub(crate) fn set_source_id(&mut self, id: EndpointId) { self.header.source_id = id; }
    #[inline]
    pub(crate) fn set_destination_id(&mut self, id: EndpointId) { self.header.destination_id = id; }
    /// The payload.
    #[inline]
    pub fn bytes(&self) -> &[u8] { &self.payload }
    /// Payload length.
    #[inline]
    pub fn num_bytes(&self) -> usize { self.payload.len() }
    /// Number of handles attached, serialized or not.
    pub fn num_handles(&self) -> usize {
        match &self.transport_data {
            Some(td) => self.dispatchers.len() + td.num_handles(),
            None => self.dispatchers.len(),
        }
    }

    /// Attaches live dispatchers to a message that has none yet.
    pub(crate) fn set_dispatchers(&mut self, dispatchers: Vec<Option<Arc<Dispatcher>>>) {
        debug_assert!(
            self.dispatchers.is_empty() && self.transport_data.is_none(),
            "message already carries handles"
        );
        self.dispatchers = dispatchers;
    }
    /// Whether live dispatchers are attached.
    #[inline]
    pub(crate) fn has_dispatchers(&self) -> bool { !self.dispatchers.is_empty() }
    /// Detaches the live dispatchers, handing their ownership to the caller.
    #[inline]
    pub(crate) fn take_dispatchers(&mut self) -> Vec<Option<Arc<Dispatcher>>> {
        std::mem::take(&mut self.dispatchers)
    }

    /// Serializes the attached dispatchers into a handle table for transmission over `channel`.
    /// Every dispatcher ends up closed, whether or not its serialization succeeded.
    pub(crate) fn serialize_and_close_dispatchers(&mut self, channel: &Arc<Channel>) {
        if self.dispatchers.is_empty() {
            return;
        }
        debug_assert!(self.transport_data.is_none(), "handles serialized twice");
        let dispatchers = self.take_dispatchers();
        self.transport_data = Some(TransportData::serialize_and_close(dispatchers, channel));
    }
    /// Turns a received handle table back into dispatchers, attaching any message pipe endpoints it
    /// contains to `channel`. Entries that fail to deserialize become `None`.
    pub(crate) fn deserialize_dispatchers(&mut self, channel: &Arc<Channel>) {
        if let Some(td) = self.transport_data.take() {
            debug_assert!(self.dispatchers.is_empty(), "message already carries live handles");
            self.dispatchers = td.deserialize_dispatchers(channel);
        }
    }

    /// Produces the serialized form of the message, along with the platform handles that must
    /// travel with it.
    ///
    /// Live dispatchers must have been serialized beforehand; any that are still attached are
    /// closed and dropped.
    pub fn into_wire(mut self) -> (Vec<u8>, Vec<PlatformHandle>) {
        if self.has_dispatchers() {
            log::error!("message written to a transport with unserialized handles");
        }
        let (table, platform_handles) = match self.transport_data.take() {
            Some(td) => td.into_parts(),
            None => (Vec::new(), Vec::new()),
        };
        let mut header = self.header;
        header.num_bytes = self.payload.len().to_u32();
        header.handle_table_size = table.len().to_u32();
        let total_size = HEADER_SIZE + align_up(self.payload.len()) + table.len();
        header.total_size = total_size.to_u32();

        let mut bytes = Vec::with_capacity(total_size);
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(&self.payload);
        bytes.resize(HEADER_SIZE + align_up(self.payload.len()), 0);
        bytes.extend_from_slice(&table);
        (bytes, platform_handles)
    }
}
impl Drop for MessageInTransit {
    fn drop(&mut self) {
        // Undelivered handles die with the message.
        for dispatcher in self.dispatchers.drain(..).flatten() {
            let _ = dispatcher.close();
        }
    }
}
impl Debug for MessageInTransit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageInTransit")
            .field("header", &self.header)
            .field("num_bytes", &self.payload.len())
            .field("num_handles", &self.num_handles())
            .finish()
    }
}
