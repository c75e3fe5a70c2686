use std::sync::Arc;

/// Lifecycle notifications a channel delivers to its owner (§4.9). Every
/// method has a no-op default so a caller only overrides the ones it cares
/// about.
pub trait ChannelEvents: Send + Sync {
    /// A transport was attached and the channel became `Connected`.
    fn on_connected(&self) {}
    /// The transport was lost or closed, whether by request or by error.
    fn on_disconnected(&self) {}
    /// The soft watch-activity timeout elapsed with no frame observed.
    fn on_idle(&self) {}
    /// A frame arrived after `on_idle` had fired, ending the idle period.
    fn on_active(&self) {}
    /// `spawn_seqpacket` captured peer credentials a verifier rejected
    /// (§4.9 "Spawn"). The channel disconnects immediately afterward.
    fn on_credentials_rejected(&self) {}
}

/// No-op implementation for channels that don't need lifecycle callbacks.
pub struct NoEvents;

impl ChannelEvents for NoEvents {}

#[cfg(unix)]
pub type CredentialsVerifier = Arc<dyn Fn(&iop_transport::PeerCredentials) -> bool + Send + Sync>;
