/// Stream-control sub-ops, carried in the slot field of a frame whose
/// command is [`crate::STREAM_CONTROL_CMD`] (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StreamControlOp {
    /// Initiate a graceful close; no payload.
    Bye = 1,
    /// Keepalive; no payload.
    Nop = 2,
}

impl StreamControlOp {
    pub const fn from_slot(slot: u32) -> Option<Self> {
        Some(match slot {
            1 => StreamControlOp::Bye,
            2 => StreamControlOp::Nop,
            _ => return None,
        })
    }

    pub const fn as_slot(self) -> u32 {
        self as u32
    }
}
