use crate::limits::MAX_CHANNEL_ID;

/// Per-process channel identifier. Unique for the channel's lifetime and
/// reusable once the channel is wiped and removed from the registry (§3, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl ChannelId {
    pub const fn new(raw: u32) -> Self {
        debug_assert!(raw <= MAX_CHANNEL_ID);
        Self(raw & MAX_CHANNEL_ID)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

/// The two high bits of a [`SlotId`], reserved for distinguishing a native
/// channel reference from an opaque foreign one (e.g. an HTTP-originated
/// slot, out of scope here but reserved so a future adapter can occupy it
/// without changing the wire format — see SPEC_FULL.md §9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Foreignness {
    Native = 0,
    ForeignHttp = 1,
    Reserved2 = 2,
    Reserved3 = 3,
}

impl Foreignness {
    const fn from_bits(bits: u32) -> Self {
        match bits {
            0 => Foreignness::Native,
            1 => Foreignness::ForeignHttp,
            2 => Foreignness::Reserved2,
            _ => Foreignness::Reserved3,
        }
    }
}

/// A 64-bit identifier naming one in-flight query anywhere in the process:
/// high 32 bits = channel id (30 bits) + foreignness class (2 bits), low 32
/// bits = the per-channel 24-bit slot (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

impl SlotId {
    /// All-ones sentinel meaning "no such slot" / an invalid reference.
    pub const ERROR_SENTINEL: SlotId = SlotId(u64::MAX);

    pub fn new(channel: ChannelId, foreignness: Foreignness, slot: u32) -> Self {
        let high = (channel.get() & MAX_CHANNEL_ID) | ((foreignness as u32) << 30);
        Self(((high as u64) << 32) | slot as u64)
    }

    pub fn channel_id(self) -> ChannelId {
        ChannelId::new(((self.0 >> 32) as u32) & MAX_CHANNEL_ID)
    }

    pub fn foreignness(self) -> Foreignness {
        Foreignness::from_bits(((self.0 >> 32) as u32) >> 30)
    }

    pub fn slot(self) -> u32 {
        self.0 as u32
    }

    pub fn is_async(self) -> bool {
        self.slot() == 0
    }

    pub fn is_error_sentinel(self) -> bool {
        self == Self::ERROR_SENTINEL
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}
