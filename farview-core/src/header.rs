//! Fixed-layout packet header.
//!
//! Little-endian, 36 bytes:
//! ```text
//! magic:          u32  (4)  "FAR0"
//! checksum:       u32  (4)  truncated blake3 of the payload
//! flags:          u32  (4)  PacketFlags bits
//! kind:           u32  (4)  MessageKind discriminant
//! from:           u64  (8)  sender endpoint id (0 = relay/unassigned)
//! to:             u64  (8)  target endpoint id (0 = relay)
//! payload_length: u32  (4)
//! ```

use crate::endpoint::EndpointId;
use crate::error::FarError;
use crate::flags::PacketFlags;
use crate::message::MessageKind;

const MAGIC: [u8; 4] = *b"FAR0";

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 36;

pub type HeaderBytes = [u8; HEADER_SIZE];

/// The routing header prepended to every packet. This is the only
/// part of a packet the relay ever inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    checksum: u32,
    flags: PacketFlags,
    kind: MessageKind,
    from: EndpointId,
    to: EndpointId,
    payload_length: u32,
}

impl PacketHeader {
    pub fn new(
        checksum: u32,
        flags: PacketFlags,
        kind: MessageKind,
        from: EndpointId,
        to: EndpointId,
        payload_length: u32,
    ) -> Self {
        Self {
            checksum,
            flags,
            kind,
            from,
            to,
            payload_length,
        }
    }

    pub fn to_bytes(&self) -> HeaderBytes {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..12].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[12..16].copy_from_slice(&(self.kind as u32).to_le_bytes());
        buf[16..24].copy_from_slice(&self.from.raw().to_le_bytes());
        buf[24..32].copy_from_slice(&self.to.raw().to_le_bytes());
        buf[32..36].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &HeaderBytes) -> Result<Self, FarError> {
        if bytes[0..4] != MAGIC {
            return Err(FarError::InvalidMagic);
        }

        // Slices below are fixed-size; try_into cannot fail.
        let field = |range: std::ops::Range<usize>| -> [u8; 4] {
            bytes[range].try_into().unwrap()
        };

        let checksum = u32::from_le_bytes(field(4..8));
        let flags = PacketFlags::from_bits(u32::from_le_bytes(field(8..12)))
            .ok_or(FarError::InvalidHeader("unknown flag bits"))?;
        let kind = MessageKind::try_from(u32::from_le_bytes(field(12..16)))?;
        let from = EndpointId::new(u64::from_le_bytes(bytes[16..24].try_into().unwrap()));
        let to = EndpointId::new(u64::from_le_bytes(bytes[24..32].try_into().unwrap()));
        let payload_length = u32::from_le_bytes(field(32..36));

        Ok(Self {
            checksum,
            flags,
            kind,
            from,
            to,
            payload_length,
        })
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub(crate) fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn from(&self) -> EndpointId {
        self.from
    }

    /// Stamp the true sender id. Only the relay does this — the
    /// `from` field as sent by a peer is never trusted.
    pub(crate) fn set_from(&mut self, from: EndpointId) {
        self.from = from;
    }

    pub fn to(&self) -> EndpointId {
        self.to
    }

    pub fn payload_length(&self) -> u32 {
        self.payload_length
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let hdr = PacketHeader::new(
            0xDEAD_BEEF,
            PacketFlags::STREAMING,
            MessageKind::Frame,
            EndpointId::new(3),
            EndpointId::new(7),
            1024,
        );
        let bytes = hdr.to_bytes();
        let back = PacketHeader::from_bytes(&bytes).unwrap();
        assert_eq!(hdr, back);
    }

    #[test]
    fn bad_magic_rejected() {
        let hdr = PacketHeader::new(
            0,
            PacketFlags::empty(),
            MessageKind::Heartbeat,
            EndpointId::RELAY,
            EndpointId::RELAY,
            0,
        );
        let mut bytes = hdr.to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            PacketHeader::from_bytes(&bytes),
            Err(FarError::InvalidMagic)
        ));
    }

    #[test]
    fn unknown_kind_rejected() {
        let hdr = PacketHeader::new(
            0,
            PacketFlags::empty(),
            MessageKind::Heartbeat,
            EndpointId::RELAY,
            EndpointId::RELAY,
            0,
        );
        let mut bytes = hdr.to_bytes();
        bytes[12..16].copy_from_slice(&0xFFFFu32.to_le_bytes());
        assert!(matches!(
            PacketHeader::from_bytes(&bytes),
            Err(FarError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn unknown_flags_rejected() {
        let hdr = PacketHeader::new(
            0,
            PacketFlags::empty(),
            MessageKind::Heartbeat,
            EndpointId::RELAY,
            EndpointId::RELAY,
            0,
        );
        let mut bytes = hdr.to_bytes();
        bytes[8..12].copy_from_slice(&0x8000_0000u32.to_le_bytes());
        assert!(PacketHeader::from_bytes(&bytes).is_err());
    }
}
