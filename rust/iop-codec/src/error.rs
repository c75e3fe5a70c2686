use std::fmt;

/// Header or payload rejected a frame received from the wire (§4.1, §7).
///
/// Every variant here is fatal to the channel per §7: the caller must
/// disconnect (and, if configured, reconnect) on any of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// `payload_len` exceeds the configured allocator maximum.
    PayloadTooLarge { len: u32, max: u32 },
    /// Flag bits outside `{HAS_FD, HAS_HDR, IS_TRACED}` were set.
    UnknownFlags { bits: u32 },
    /// A stream-control frame carried a non-empty payload.
    MalformedStreamControl { payload_len: u32 },
    /// A stream-control frame's slot field is not a recognized sub-op.
    UnknownStreamControlOp { slot: u32 },
    /// A reply frame's command does not decode to a known [`iop_wire::Status`].
    UnknownStatus { cmd: i32 },
    /// A reply frame carried a payload for a status that must not have one.
    UnexpectedReplyPayload { payload_len: u32 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::PayloadTooLarge { len, max } => {
                write!(f, "payload length {len} exceeds allocator maximum {max}")
            }
            DecodeError::UnknownFlags { bits } => write!(f, "header flags contain unknown bits: {bits:#x}"),
            DecodeError::MalformedStreamControl { payload_len } => {
                write!(f, "stream-control frame carried a {payload_len}-byte payload, expected none")
            }
            DecodeError::UnknownStreamControlOp { slot } => {
                write!(f, "stream-control sub-op {slot} is not recognized")
            }
            DecodeError::UnknownStatus { cmd } => write!(f, "reply command {cmd} does not decode to a known status"),
            DecodeError::UnexpectedReplyPayload { payload_len } => {
                write!(f, "reply status does not permit a payload, but one of {payload_len} bytes was present")
            }
        }
    }
}

impl std::error::Error for DecodeError {}
