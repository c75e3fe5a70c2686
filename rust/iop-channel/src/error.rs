use std::fmt;

use iop_session::SlotTableExhausted;
use iop_transport::TransportError;

/// Failures surfaced by the public channel API (§10.3). Distinct from
/// [`iop_wire::Status`]: a `Status` is a protocol-level answer delivered
/// through a reply callback, while `ChannelError` means the call itself
/// could not be carried out.
#[derive(Debug)]
pub enum ChannelError {
    /// `query`/`reply`/`bye` called before the channel reached `Connected`,
    /// or after it started closing and `queuable` is false.
    NotConnected,
    /// `connect_stream`/`spawn_seqpacket`/`local_pair` called on a channel
    /// that already has a transport attached.
    AlreadyConnected,
    /// Every one of the channel's 2^24 local slots is occupied.
    SlotsExhausted,
    /// The process-wide channel-id space is exhausted.
    ChannelIdsExhausted,
    /// A peer-credentials verifier rejected the connecting peer (§4.9 "Spawn").
    CredentialsRejected,
    /// The underlying transport failed.
    Transport(TransportError),
    /// A syscall needed to establish the transport failed.
    Io(std::io::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NotConnected => write!(f, "channel is not connected"),
            ChannelError::AlreadyConnected => write!(f, "channel already has a transport attached"),
            ChannelError::SlotsExhausted => write!(f, "channel's local slot table is exhausted"),
            ChannelError::ChannelIdsExhausted => write!(f, "process-wide channel id space is exhausted"),
            ChannelError::CredentialsRejected => write!(f, "peer credentials were rejected"),
            ChannelError::Transport(e) => write!(f, "transport error: {e}"),
            ChannelError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Transport(e) => Some(e),
            ChannelError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ChannelError {
    fn from(e: TransportError) -> Self {
        ChannelError::Transport(e)
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Io(e)
    }
}

impl From<SlotTableExhausted> for ChannelError {
    fn from(_: SlotTableExhausted) -> Self {
        ChannelError::SlotsExhausted
    }
}
