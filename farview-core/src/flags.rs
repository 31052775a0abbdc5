//! Packet header flags.

use bitflags::bitflags;

bitflags! {
    /// Routing hints carried in the packet header.
    ///
    /// The relay never inspects payload bytes, so anything it needs
    /// to know about a packet lives here or in the message kind.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// Part of a continuous stream (frames). Losing one is fine.
        const STREAMING = 0b0001;
        /// Relay-originated fan-out (topology events).
        const BROADCAST = 0b0010;
    }
}
