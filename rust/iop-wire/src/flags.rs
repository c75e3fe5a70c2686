use bitflags::bitflags;

bitflags! {
    /// Flag bits packed into the high byte of header word 0, alongside the
    /// 24-bit slot number.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u32 {
        /// A file descriptor accompanies this frame as `SCM_RIGHTS` ancillary data.
        const HAS_FD = 1 << 24;
        /// The payload is prefixed by schema-header bytes before the value bytes.
        const HAS_HDR = 1 << 25;
        /// This frame should be traced (mirrors the original `IC_TRACE` toggle).
        const IS_TRACED = 1 << 26;
    }
}

impl FrameFlags {
    /// Bits that may legally appear in a header's flag byte once the priority
    /// bits are masked off. Any other set bit makes the header invalid.
    pub const KNOWN: FrameFlags = FrameFlags::HAS_FD
        .union(FrameFlags::HAS_HDR)
        .union(FrameFlags::IS_TRACED);
}

/// Delivery priority, carried in the 2 priority bits of header word 0
/// (bits 27-28).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub const SHIFT: u32 = 27;
    pub const MASK: u32 = 0b11 << Self::SHIFT;

    pub const fn from_bits(word0: u32) -> Self {
        match (word0 & Self::MASK) >> Self::SHIFT {
            0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Critical,
        }
    }

    pub const fn to_bits(self) -> u32 {
        (self as u32) << Self::SHIFT
    }
}
