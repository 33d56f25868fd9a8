use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Maximum payload bytes per packet. Must match the server exactly.
pub const BUF_SIZE: usize = 8192;

/// Tag byte plus a full payload.
pub const PACKET_SIZE: usize = BUF_SIZE + 1;

/// Encode one packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────────────────┐
/// │ Tag (1B) │ Payload (0..=BUF_SIZE B) │
/// └──────────┴──────────────────────────┘
/// ```
pub fn encode_packet(tag: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > BUF_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: BUF_SIZE,
        });
    }
    dst.reserve(1 + payload.len());
    dst.put_u8(tag);
    dst.put_slice(payload);
    Ok(())
}

/// Split a received packet into its tag and payload.
///
/// Returns `None` for an empty read.
pub fn split_packet(packet: &[u8]) -> Option<(u8, &[u8])> {
    packet.split_first().map(|(tag, payload)| (*tag, payload))
}
