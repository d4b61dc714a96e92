use crate::{
    message::{
        ChannelSubtype, MessageInTransit, MessageType, MessageView, HEADER_SIZE,
        INVALID_ENDPOINT_ID,
    },
    tests::util::*,
};
use color_eyre::eyre::eyre;

fn view(bytes: &[u8]) -> TestResult<MessageView<'_>> {
    MessageView::new(bytes).map_err(|e| eyre!(e))
}

/// A data message carrying `table` as its handle table, with the header adjusted to match.
fn with_table(payload: &[u8], table: &[u8]) -> Vec<u8> {
    let (mut bytes, _) = MessageInTransit::new_data(payload.to_vec()).into_wire();
    bytes.extend_from_slice(table);
    let total = bytes.len() as u32;
    bytes[0..4].copy_from_slice(&total.to_le_bytes());
    bytes[20..24].copy_from_slice(&(table.len() as u32).to_le_bytes());
    bytes
}

fn table(entries: &[[u32; 4]], num_platform_handles: u32, payload_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&num_platform_handles.to_le_bytes());
    for field in entries.iter().flatten() {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.resize(out.len() + payload_len, 0);
    out
}

#[test]
fn data_message_layout() -> TestResult {
    test_wrapper(|| {
        let (bytes, platform_handles) = MessageInTransit::new_data(b"abcde".to_vec()).into_wire();
        ensure!(platform_handles.is_empty());
        // Payload padded to 8 bytes.
        ensure_eq!(bytes.len(), HEADER_SIZE + 8);
        ensure_eq!(bytes[0..4], 32u32.to_le_bytes());
        ensure_eq!(bytes[16..20], 5u32.to_le_bytes());
        ensure_eq!(bytes[HEADER_SIZE + 5..], [0u8; 3]);

        ensure_eq!(MessageView::next_message_size(&bytes[..3]), None);
        ensure_eq!(MessageView::next_message_size(&bytes[..4]), Some(32));

        let view = view(&bytes)?;
        ensure_eq!(view.message_type(), Some(MessageType::MessagePipeEndpoint));
        ensure_eq!(view.bytes(), b"abcde");
        ensure!(view.handle_table().is_empty());
        ensure_eq!(view.num_platform_handles(), 0);
        ensure_eq!(view.destination_id(), INVALID_ENDPOINT_ID);
        Ok(())
    })
}

#[test]
fn control_message_ids() -> TestResult {
    test_wrapper(|| {
        let message =
            MessageInTransit::new_control(ChannelSubtype::RemoveMessagePipeEndpoint, 3, 9);
        let (bytes, _) = message.into_wire();
        ensure_eq!(bytes.len(), HEADER_SIZE);
        let view = view(&bytes)?;
        ensure_eq!(view.message_type(), Some(MessageType::Channel));
        ensure_eq!(
            ChannelSubtype::from_wire(view.subtype()),
            Some(ChannelSubtype::RemoveMessagePipeEndpoint)
        );
        ensure_eq!((view.source_id(), view.destination_id()), (3, 9));
        ensure!(view.bytes().is_empty());
        Ok(())
    })
}

#[test]
fn rejects_malformed_messages() -> TestResult {
    test_wrapper(|| {
        let (bytes, _) = MessageInTransit::new_data(b"payload!".to_vec()).into_wire();
        ensure!(MessageView::new(&bytes[..HEADER_SIZE - 1]).is_err());
        // Truncated: the header claims more than there is.
        ensure!(MessageView::new(&bytes[..bytes.len() - 8]).is_err());

        let mut lying = bytes.clone();
        lying[16..20].copy_from_slice(&64u32.to_le_bytes());
        ensure!(MessageView::new(&lying).is_err());

        let mut unaligned = bytes;
        unaligned.push(0);
        let total = unaligned.len() as u32;
        unaligned[0..4].copy_from_slice(&total.to_le_bytes());
        ensure!(MessageView::new(&unaligned).is_err());
        Ok(())
    })
}

#[test]
fn validates_handle_tables() -> TestResult {
    test_wrapper(|| {
        // One platform handle entry (no payload) and one shared buffer entry (8 bytes of payload).
        let good = table(&[[5, 40, 0, 1], [4, 40, 8, 1]], 2, 8);
        let bytes = with_table(b"hi", &good);
        let view = view(&bytes)?;
        ensure_eq!(view.num_platform_handles(), 2);
        ensure_eq!(view.handle_table().len(), good.len());

        let cases = [
            ("platform handle count mismatch", table(&[[5, 24, 0, 1]], 2, 0)),
            ("payload overlapping the entries", table(&[[4, 16, 8, 1]], 1, 8)),
            ("misaligned payload", table(&[[4, 28, 4, 1]], 1, 8)),
            ("payload out of bounds", table(&[[4, 24, 16, 1]], 1, 8)),
            ("entries out of bounds", table(&[[4, 24, 8, 1]], 1, 0)[..16].to_vec()),
        ];
        for (what, bad) in cases {
            let bytes = with_table(b"hi", &bad);
            ensure!(MessageView::new(&bytes).is_err(), "accepted {what}");
        }
        Ok(())
    })
}
