//! The serialized handle table carried at the end of a message.
//!
//! ## Layout
//! ```text
//! num_handles          u32
//! num_platform_handles u32
//! entries              [type u32, offset u32, size u32, num_platform_handles u32; num_handles]
//! payloads             each starting at an 8-byte boundary, at the offset its entry names
//! ```
//! Offsets are relative to the start of the table. Platform handles are consumed in entry order:
//! the first entry takes the first `num_platform_handles` of them, and so on. An entry of type 0
//! stands for a handle that could not be serialized and deserializes to nothing.

use crate::{
    channel::Channel,
    dispatcher::{Dispatcher, DispatcherType},
    misc::{align_up, ToU32},
    platform_handle::PlatformHandle,
};
use std::sync::Arc;

const TABLE_HEADER_SIZE: usize = 8;
const ENTRY_SIZE: usize = 16;
const NO_DISPATCHER: u32 = 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Entry {
    dispatcher_type: u32,
    offset: u32,
    size: u32,
    num_platform_handles: u32,
}
impl Entry {
    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.dispatcher_type.to_le_bytes());
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.num_platform_handles.to_le_bytes());
    }
    fn decode(table: &[u8], index: usize) -> Option<Self> {
        let at = TABLE_HEADER_SIZE.checked_add(index.checked_mul(ENTRY_SIZE)?)?;
        let raw = table.get(at..at.checked_add(ENTRY_SIZE)?)?;
        let field = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Some(Self {
            dispatcher_type: field(0),
            offset: field(4),
            size: field(8),
            num_platform_handles: field(12),
        })
    }
}

fn read_u32(table: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(table.get(at..at + 4)?.try_into().ok()?))
}

/// A message's handles in serialized form.
#[derive(Debug)]
pub(crate) struct TransportData {
    buffer: Vec<u8>,
    platform_handles: Vec<PlatformHandle>,
}
impl TransportData {
    /// Serializes `dispatchers` for transmission over `channel`, closing all of them.
    pub fn serialize_and_close(
        dispatchers: Vec<Option<Arc<Dispatcher>>>,
        channel: &Arc<Channel>,
    ) -> Self {
        let num_handles = dispatchers.len();
        let sizes: Vec<(usize, usize)> = dispatchers
            .iter()
            .map(|d| d.as_ref().map_or((0, 0), |d| d.start_serialize(channel)))
            .collect();

        let entries_end = TABLE_HEADER_SIZE + num_handles * ENTRY_SIZE;
        let buffer_size = entries_end + sizes.iter().map(|&(sz, _)| align_up(sz)).sum::<usize>();
        let mut buffer = vec![0; buffer_size];
        let mut platform_handles =
            Vec::with_capacity(sizes.iter().map(|&(_, n)| n).sum::<usize>());

        let mut offset = entries_end;
        for (i, (dispatcher, (max_size, max_platform_handles))) in
            dispatchers.into_iter().zip(sizes).enumerate()
        {
            let mut entry = Entry {
                dispatcher_type: NO_DISPATCHER,
                offset: offset.to_u32(),
                size: 0,
                num_platform_handles: 0,
            };
            if let Some(dispatcher) = dispatcher {
                let dispatcher_type = dispatcher.dispatcher_type();
                let handles_before = platform_handles.len();
                let dest = &mut buffer[offset..offset + max_size];
                match dispatcher.end_serialize_and_close(channel, dest, &mut platform_handles) {
                    Some(actual) if actual <= max_size => {
                        let num_new = platform_handles.len() - handles_before;
                        if num_new > max_platform_handles {
                            log::error!(
                                "{dispatcher_type:?} produced {num_new} platform handles, \
                                 more than the {max_platform_handles} it announced"
                            );
                        }
                        entry.dispatcher_type = dispatcher_type.to_wire();
                        entry.size = actual.to_u32();
                        entry.num_platform_handles = num_new.to_u32();
                    }
                    _ => {
                        log::warn!("failed to serialize {dispatcher_type:?} for transit");
                        platform_handles.truncate(handles_before);
                    }
                }
            }
            entry.encode(&mut buffer[TABLE_HEADER_SIZE + i * ENTRY_SIZE..][..ENTRY_SIZE]);
            offset += align_up(max_size);
        }

        buffer[0..4].copy_from_slice(&num_handles.to_u32().to_le_bytes());
        buffer[4..8].copy_from_slice(&platform_handles.len().to_u32().to_le_bytes());
        Self {
            buffer,
            platform_handles,
        }
    }

    /// Wraps a received table and the platform handles delivered with it.
    pub fn from_wire(buffer: Vec<u8>, platform_handles: Vec<PlatformHandle>) -> Self {
        Self {
            buffer,
            platform_handles,
        }
    }

    /// Checks a received table for internal consistency.
    pub fn validate(table: &[u8]) -> Result<(), &'static str> {
        if table.len() % crate::misc::ALIGNMENT != 0 {
            return Err("handle table is not properly aligned");
        }
        let num_handles = read_u32(table, 0).ok_or("handle table too short")? as usize;
        let num_platform_handles = read_u32(table, 4).ok_or("handle table too short")? as usize;
        if num_handles > crate::config::get().max_message_num_handles {
            return Err("message carries more handles than the configured maximum");
        }
        let entries_end = num_handles
            .checked_mul(ENTRY_SIZE)
            .and_then(|n| n.checked_add(TABLE_HEADER_SIZE))
            .ok_or("handle table sizes overflow")?;
        if entries_end > table.len() {
            return Err("handle table entries out of bounds");
        }
        let mut platform_handles_claimed = 0usize;
        for i in 0..num_handles {
            let entry = Entry::decode(table, i).ok_or("handle table entries out of bounds")?;
            let (offset, size) = (entry.offset as usize, entry.size as usize);
            if offset < entries_end || offset % crate::misc::ALIGNMENT != 0 {
                return Err("handle table entry has an invalid offset");
            }
            if offset.checked_add(size).map_or(true, |end| end > table.len()) {
                return Err("handle table entry out of bounds");
            }
            platform_handles_claimed = platform_handles_claimed
                .checked_add(entry.num_platform_handles as usize)
                .ok_or("handle table sizes overflow")?;
        }
        if platform_handles_claimed != num_platform_handles {
            return Err("handle table platform handle count mismatch");
        }
        Ok(())
    }

    /// Number of platform handles a validated table refers to.
    pub fn num_platform_handles(table: &[u8]) -> usize {
        read_u32(table, 4).unwrap_or(0) as usize
    }

    /// Number of handles in the table.
    pub fn num_handles(&self) -> usize { read_u32(&self.buffer, 0).unwrap_or(0) as usize }

    /// Reconstitutes the dispatchers. Entries that fail, and entries for which too few platform
    /// handles were delivered, become `None`.
    pub fn deserialize_dispatchers(self, channel: &Arc<Channel>) -> Vec<Option<Arc<Dispatcher>>> {
        let num_handles = self.num_handles();
        if self.platform_handles.len() != Self::num_platform_handles(&self.buffer) {
            log::warn!(
                "received {} platform handles, handle table expects {}",
                self.platform_handles.len(),
                Self::num_platform_handles(&self.buffer)
            );
        }
        let mut platform_handles = self.platform_handles.into_iter();
        (0..num_handles)
            .map(|i| {
                let entry = Entry::decode(&self.buffer, i)?;
                let handles: Vec<PlatformHandle> = platform_handles
                    .by_ref()
                    .take(entry.num_platform_handles as usize)
                    .collect();
                if entry.dispatcher_type == NO_DISPATCHER {
                    return None;
                }
                if handles.len() != entry.num_platform_handles as usize {
                    log::warn!("handle table entry {i} is missing platform handles");
                    return None;
                }
                let Some(dispatcher_type) = DispatcherType::from_wire(entry.dispatcher_type)
                else {
                    log::warn!(
                        "cannot deserialize handle of unknown type {}",
                        entry.dispatcher_type
                    );
                    return None;
                };
                let (offset, size) = (entry.offset as usize, entry.size as usize);
                let source = self.buffer.get(offset..offset + size)?;
                Dispatcher::deserialize(channel, dispatcher_type, source, handles)
            })
            .collect()
    }

    /// Splits into the table bytes and the platform handles.
    pub fn into_parts(self) -> (Vec<u8>, Vec<PlatformHandle>) {
        (self.buffer, self.platform_handles)
    }
}
