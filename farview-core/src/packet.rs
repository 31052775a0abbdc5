//! Header + payload pairing, with checksum construction/validation.

use crate::endpoint::EndpointId;
use crate::error::FarError;
use crate::flags::PacketFlags;
use crate::header::{HEADER_SIZE, HeaderBytes, PacketHeader};
use crate::message::MessageKind;

/// Largest payload accepted on the wire. Frames are encoded JPEGs;
/// even lossless 1080p screenshots stay well under this.
pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024 * 1024;

/// Largest whole frame the codec will buffer.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// One protocol packet: routing header plus opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Vec<u8>,
}

impl Packet {
    /// Build a packet addressed `from → to`.
    ///
    /// The checksum is a truncated blake3 hash of the payload; empty
    /// payloads carry checksum 0.
    pub fn new(
        kind: MessageKind,
        from: EndpointId,
        to: EndpointId,
        payload: Vec<u8>,
    ) -> Result<Self, FarError> {
        Self::with_flags(kind, PacketFlags::empty(), from, to, payload)
    }

    /// Build a packet with explicit header flags.
    pub fn with_flags(
        kind: MessageKind,
        flags: PacketFlags,
        from: EndpointId,
        to: EndpointId,
        payload: Vec<u8>,
    ) -> Result<Self, FarError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FarError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut header =
            PacketHeader::new(0, flags, kind, from, to, payload.len() as u32);
        if !payload.is_empty() {
            header.set_checksum(truncated_hash(&payload));
        }

        Ok(Self { header, payload })
    }

    /// A connection-level keep-alive, addressed to the relay.
    pub fn heartbeat(from: EndpointId) -> Self {
        Self {
            header: PacketHeader::new(
                0,
                PacketFlags::empty(),
                MessageKind::Heartbeat,
                from,
                EndpointId::RELAY,
                0,
            ),
            payload: Vec::new(),
        }
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn kind(&self) -> MessageKind {
        self.header.kind()
    }

    pub fn flags(&self) -> PacketFlags {
        self.header.flags()
    }

    pub fn from(&self) -> EndpointId {
        self.header.from()
    }

    pub fn to(&self) -> EndpointId {
        self.header.to()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_length(&self) -> u32 {
        self.header.payload_length()
    }

    /// Re-stamp the sender id. The relay does this on every inbound
    /// packet so recipients see the authoritative connection id, not
    /// whatever the peer claimed.
    pub fn stamp_from(mut self, from: EndpointId) -> Self {
        self.header.set_from(from);
        self
    }

    /// Serialize header + payload for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a complete packet from bytes (exact length required).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FarError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FarError::InvalidHeader("truncated header"));
        }
        let header_bytes: &HeaderBytes = bytes[..HEADER_SIZE].try_into().unwrap();
        let header = PacketHeader::from_bytes(header_bytes)?;

        let expected = HEADER_SIZE + header.payload_length() as usize;
        if bytes.len() != expected {
            return Err(FarError::InvalidHeader("length mismatch"));
        }
        if header.payload_length() as usize > MAX_PAYLOAD_SIZE {
            return Err(FarError::PayloadTooLarge {
                size: header.payload_length() as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            header,
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// Verify the payload against the header checksum.
    pub fn validate(&self) -> Result<(), FarError> {
        if self.payload.is_empty() {
            return Ok(());
        }
        if truncated_hash(&self.payload) != self.header.checksum() {
            return Err(FarError::ChecksumMismatch);
        }
        Ok(())
    }
}

fn truncated_hash(payload: &[u8]) -> u32 {
    let hash = blake3::hash(payload);
    u32::from_le_bytes(hash.as_bytes()[0..4].try_into().unwrap())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_roundtrip() {
        let pkt = Packet::new(
            MessageKind::Frame,
            EndpointId::new(2),
            EndpointId::new(5),
            vec![1, 2, 3, 4],
        )
        .unwrap();

        let bytes = pkt.to_bytes();
        let back = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(pkt, back);
        back.validate().unwrap();
    }

    #[test]
    fn empty_payload_checksum_zero() {
        let pkt = Packet::heartbeat(EndpointId::new(1));
        assert_eq!(pkt.header().checksum(), 0);
        pkt.validate().unwrap();
    }

    #[test]
    fn tampered_payload_fails_validation() {
        let pkt = Packet::new(
            MessageKind::Frame,
            EndpointId::new(1),
            EndpointId::new(2),
            vec![1, 2, 3],
        )
        .unwrap();

        let mut bytes = pkt.to_bytes();
        *bytes.last_mut().unwrap() ^= 0xFF;
        let back = Packet::from_bytes(&bytes).unwrap();
        assert!(matches!(back.validate(), Err(FarError::ChecksumMismatch)));
    }

    #[test]
    fn oversized_payload_rejected() {
        let result = Packet::new(
            MessageKind::Frame,
            EndpointId::new(1),
            EndpointId::new(2),
            vec![0; MAX_PAYLOAD_SIZE + 1],
        );
        assert!(matches!(result, Err(FarError::PayloadTooLarge { .. })));
    }

    #[test]
    fn length_mismatch_rejected() {
        let pkt = Packet::new(
            MessageKind::Frame,
            EndpointId::new(1),
            EndpointId::new(2),
            vec![1, 2, 3],
        )
        .unwrap();

        let mut bytes = pkt.to_bytes();
        bytes.push(0); // trailing garbage
        assert!(Packet::from_bytes(&bytes).is_err());
    }

    #[test]
    fn stamp_from_overwrites_sender() {
        let pkt = Packet::new(
            MessageKind::Interaction,
            EndpointId::new(99), // forged
            EndpointId::new(2),
            vec![],
        )
        .unwrap();
        let stamped = pkt.stamp_from(EndpointId::new(4));
        assert_eq!(stamped.from(), EndpointId::new(4));
    }
}
