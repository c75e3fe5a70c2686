use std::fmt;

/// Transport-level failure (§4.1, §4.4, §6, §7). Distinct from
/// [`iop_codec::DecodeError`], which rejects a frame's *contents*; this
/// rejects the *channel* carrying it (including a frame a given backend
/// cannot physically carry, such as one too large for a single datagram).
#[derive(Debug)]
pub enum TransportError {
    /// The transport was closed, locally or by the peer, before the
    /// operation completed.
    Closed,
    /// A frame arrived whose `payload_len` exceeds what this backend is
    /// willing to buffer before validation gets a chance to reject it.
    FrameTooLarge { len: u32, max: u32 },
    /// A `HAS_FD` frame arrived on a backend that cannot carry descriptors
    /// (§6: "stream sockets ... FD passing is disallowed").
    FdPassingUnsupported,
    /// More file descriptors were attached to a single send than the
    /// backend's `sendmsg` ancillary buffer can hold.
    TooManyFds { count: usize, max: usize },
    /// The underlying I/O object returned an error.
    Io(std::io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport is closed"),
            TransportError::FrameTooLarge { len, max } => {
                write!(f, "incoming frame of {len} bytes exceeds the {max}-byte buffering limit")
            }
            TransportError::FdPassingUnsupported => {
                write!(f, "this transport backend cannot carry file descriptors")
            }
            TransportError::TooManyFds { count, max } => {
                write!(f, "{count} file descriptors exceeds the per-send maximum of {max}")
            }
            TransportError::Io(e) => write!(f, "transport I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}
