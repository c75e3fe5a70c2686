//! The public-facing IOP-RPC channel (§2, §3, §10.1): lifecycle, the
//! caller-facing `query`/`reply`/`bye` API, and the read/write/watch
//! pipelines that drive a connected [`Channel`]. Everything below this
//! crate — `iop-wire`, `iop-codec`, `iop-registry`, `iop-session`,
//! `iop-transport` — is transport- and lifecycle-agnostic; this crate is
//! where those pieces are wired into something a collaborator actually
//! holds and calls methods on.

mod channel;
mod config;
mod connect;
mod error;
mod events;
mod io;
mod outbound;

pub use channel::{Channel, ChannelPhase};
pub use config::{ChannelConfig, WatchActivity};
pub use connect::ReconnectTarget;
pub use error::ChannelError;
pub use events::{ChannelEvents, NoEvents};
#[cfg(unix)]
pub use events::CredentialsVerifier;
#[cfg(unix)]
pub use iop_transport::PeerCredentials;

/// Convenient one-line import for collaborator code (§10.1 "Re-exports the
/// lower crates' public types behind a `prelude`").
///
/// ```ignore
/// use iop_channel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Channel, ChannelConfig, ChannelError, ChannelEvents, ChannelPhase, WatchActivity};

    pub use iop_registry::{Runtime, RuntimeConfig};
    pub use iop_session::{DispatchEntry, DispatchKind, DispatchTable, Payload, Reply, ReplyBody, RpcDescriptor};
    pub use iop_wire::{ChannelId, Priority, SlotId, Status};

    #[cfg(unix)]
    pub use crate::CredentialsVerifier;
    #[cfg(unix)]
    pub use iop_transport::PeerCredentials;
}
