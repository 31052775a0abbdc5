//! Framed TCP codec for [`Packet`]s via `tokio_util`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FarError;
use crate::header::{HEADER_SIZE, HeaderBytes, PacketHeader};
use crate::packet::{MAX_PAYLOAD_SIZE, Packet};

/// Length-delimited codec: fixed header, then `payload_length` bytes.
#[derive(Debug, Default)]
pub struct FarCodec;

impl Decoder for FarCodec {
    type Item = Packet;
    type Error = FarError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header_bytes: &HeaderBytes = src[..HEADER_SIZE].try_into().unwrap();
        let header = PacketHeader::from_bytes(header_bytes)?;

        let payload_len = header.payload_length() as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(FarError::FrameTooLarge {
                size: HEADER_SIZE + payload_len,
                max: HEADER_SIZE + MAX_PAYLOAD_SIZE,
            });
        }

        let total = HEADER_SIZE + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        let packet = Packet::from_bytes(&frame)?;
        packet.validate()?;
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for FarCodec {
    type Error = FarError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.to_bytes());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
