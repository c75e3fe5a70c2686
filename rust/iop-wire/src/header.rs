use crate::flags::{FrameFlags, Priority};
use crate::limits::{HEADER_LEN, MAX_SLOT};

/// The sentinel command code marking a stream-control frame (§6). The slot
/// field of such a frame carries the sub-op rather than a real slot number.
pub const STREAM_CONTROL_CMD: i32 = i32::MIN + 1;

/// The 12-byte on-wire frame header: three little-endian `u32` words.
///
/// Word 0 packs the 24-bit slot with [`FrameFlags`] and [`Priority`] in its
/// high byte; word 1 is the signed command code; word 2 is the payload
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub slot: u32,
    pub flags: FrameFlags,
    pub priority: Priority,
    pub cmd: i32,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn new(slot: u32, cmd: i32, payload_len: u32) -> Self {
        Self { slot, flags: FrameFlags::empty(), priority: Priority::default(), cmd, payload_len }
    }

    pub fn is_stream_control(&self) -> bool {
        self.cmd == STREAM_CONTROL_CMD
    }

    pub fn is_query(&self) -> bool {
        self.cmd > 0
    }

    pub fn is_reply(&self) -> bool {
        self.cmd <= 0 && !self.is_stream_control()
    }

    /// Encode into the 12 on-wire bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let word0 = (self.slot & MAX_SLOT) | self.flags.bits() | self.priority.to_bits();
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&word0.to_le_bytes());
        out[4..8].copy_from_slice(&self.cmd.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    /// Decode from 12 on-wire bytes. This never fails: unknown flag bits are
    /// preserved so the caller's header-validation pass (in `iop-codec`) can
    /// reject them explicitly, per §4.1.
    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        let word0 = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let cmd = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let payload_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        Self {
            slot: word0 & MAX_SLOT,
            flags: FrameFlags::from_bits_retain(word0 & !MAX_SLOT & !Priority::MASK),
            priority: Priority::from_bits(word0),
            cmd,
            payload_len,
        }
    }

    /// The raw flag bits, including any unknown ones, for validation purposes.
    pub fn raw_flag_bits(&self) -> u32 {
        self.flags.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let h = FrameHeader {
            slot: 0x00ab_cdef & MAX_SLOT,
            flags: FrameFlags::HAS_FD | FrameFlags::HAS_HDR,
            priority: Priority::High,
            cmd: 42,
            payload_len: 128,
        };
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        let back = FrameHeader::from_bytes(&bytes);
        assert_eq!(back, h);
    }

    #[test]
    fn stream_control_and_query_and_reply_are_mutually_exclusive() {
        let q = FrameHeader::new(1, 5, 0);
        assert!(q.is_query() && !q.is_reply() && !q.is_stream_control());

        let r = FrameHeader::new(1, -5, 0);
        assert!(!r.is_query() && r.is_reply() && !r.is_stream_control());

        let sc = FrameHeader::new(1, STREAM_CONTROL_CMD, 0);
        assert!(!sc.is_query() && !sc.is_reply() && sc.is_stream_control());
    }

    #[test]
    fn unknown_flag_bit_survives_decode_for_validation() {
        let word0: u32 = 1 << 30;
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&word0.to_le_bytes());
        let h = FrameHeader::from_bytes(&bytes);
        assert_ne!(h.raw_flag_bits() & (1 << 30), 0);
    }
}
