//! Channel lifecycle transitions (§4.9): first connect, reconnect, spawn
//! from an already-accepted descriptor, the local in-process pairing, and
//! teardown. `channel.rs` owns the state the rest of the crate reads;
//! everything here only ever writes it through the methods below.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use iop_registry::Runtime;
use iop_session::{DispatchTable, ReplySink};
use iop_transport::Transport;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::channel::{Channel, ChannelPhase, Tasks};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::events::ChannelEvents;
#[cfg(unix)]
use crate::events::CredentialsVerifier;
use crate::io::{reader_loop, watcher_loop, writer_loop};

/// Where to redial after an unexpected disconnect (§4.9 "Connect"). Stashed
/// only for the two transport kinds that have an address to redial; a local
/// pair or a channel spawned on an already-accepted descriptor has none
/// (§3 invariant (v)).
#[derive(Debug, Clone)]
pub enum ReconnectTarget {
    Tcp(SocketAddr),
    #[cfg(unix)]
    UnixSeqpacket(PathBuf),
}

impl Channel {
    /// Connect over TCP (§4.9 "Connect"). Fails with
    /// [`ChannelError::AlreadyConnected`] if a transport is already attached.
    pub async fn connect_stream(&self, addr: SocketAddr) -> Result<(), ChannelError> {
        self.require_not_connected()?;
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        *self.0.reconnect_target.lock() = Some(ReconnectTarget::Tcp(addr));
        self.attach_transport(Transport::from_stream(stream));
        Ok(())
    }

    /// Connect to an `AF_UNIX SOCK_SEQPACKET` socket bound at `path` (§4.9
    /// "Connect", §6).
    #[cfg(unix)]
    pub async fn connect_seqpacket(&self, path: &Path) -> Result<(), ChannelError> {
        self.require_not_connected()?;
        let path = path.to_path_buf();
        let transport = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || iop_transport::SeqpacketTransport::connect(&path))
                .await
                .map_err(|_| {
                    ChannelError::Io(std::io::Error::new(std::io::ErrorKind::Other, "connect task panicked"))
                })??
        };
        *self.0.peer_credentials.lock() = transport.peer_credentials().ok();
        *self.0.reconnect_target.lock() = Some(ReconnectTarget::UnixSeqpacket(path));
        self.attach_transport(Transport::Seqpacket(transport));
        Ok(())
    }

    /// Adopt an already-accepted byte stream (§4.9 "Spawn"): the TCP/stream
    /// counterpart of [`Channel::spawn_seqpacket`], for a server's accept
    /// loop handing a freshly-accepted connection to a channel instead of
    /// dialing out itself. No reconnect target is set (§3 invariant (v)):
    /// there is no address to redial for a connection the peer initiated.
    pub async fn spawn_stream<S>(&self, stream: S) -> Result<(), ChannelError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        self.require_not_connected()?;
        self.attach_transport(Transport::from_stream(stream));
        Ok(())
    }

    /// Adopt an already-accepted seqpacket descriptor (§4.9 "Spawn"),
    /// capturing and verifying peer credentials before the channel is
    /// allowed to become `Connected`. Never schedules a reconnect: there is
    /// no address to redial (§3 invariant (v)).
    #[cfg(unix)]
    pub async fn spawn_seqpacket(
        &self,
        fd: std::os::fd::OwnedFd,
        verifier: Option<CredentialsVerifier>,
    ) -> Result<(), ChannelError> {
        self.require_not_connected()?;
        let transport = iop_transport::SeqpacketTransport::from_owned_fd(fd)?;
        let credentials = transport.peer_credentials()?;
        if let Some(verify) = verifier {
            if !verify(&credentials) {
                self.0.events.on_credentials_rejected();
                return Err(ChannelError::CredentialsRejected);
            }
        }
        *self.0.peer_credentials.lock() = Some(credentials);
        self.attach_transport(Transport::Seqpacket(transport));
        Ok(())
    }

    /// Wire two freshly `init`ed channels together as a local-mode pair
    /// (§4.6, §9 "Local-mode zero-copy"): no transport, no reconnect target,
    /// queries dispatched directly into the peer's dispatch table.
    pub fn local_pair(
        runtime: Arc<Runtime<dyn ReplySink>>,
        dispatch_a: Arc<DispatchTable>,
        config_a: ChannelConfig,
        dispatch_b: Arc<DispatchTable>,
        config_b: ChannelConfig,
    ) -> Result<(Channel, Channel), ChannelError> {
        let a = Channel::init(runtime.clone(), dispatch_a, config_a)?;
        let b = Channel::init(runtime, dispatch_b, config_b)?;

        *a.0.local_peer.write() = Some(Arc::downgrade(&b.0));
        *b.0.local_peer.write() = Some(Arc::downgrade(&a.0));

        for channel in [&a, &b] {
            channel.0.config.lock().queuable = true;
            *channel.0.last_activity.lock() = Instant::now();
            channel.set_phase(ChannelPhase::Connected);
        }
        a.0.events.on_connected();
        b.0.events.on_connected();
        Ok((a, b))
    }

    fn require_not_connected(&self) -> Result<(), ChannelError> {
        if self.phase() == ChannelPhase::Connected {
            return Err(ChannelError::AlreadyConnected);
        }
        Ok(())
    }

    /// Attach `transport`, recreating the outbound queue fresh (§4.9
    /// "Connect": the paired receiver is consumed exactly once per attach,
    /// so a reconnect needs a new pair rather than the one the previous
    /// writer task took) and spawning the reader/writer/watcher tasks.
    fn attach_transport(&self, transport: Transport) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        *self.0.out_tx.write() = out_tx;
        *self.0.out_rx.lock() = Some(out_rx);

        *self.0.transport.write() = Some(Arc::new(transport));
        self.0.config.lock().queuable = true;
        *self.0.last_activity.lock() = Instant::now();
        self.0.idle_fired.store(false, Ordering::Release);
        self.set_phase(ChannelPhase::Connected);

        let transport = self.0.transport.read().clone().expect("just attached");

        let reader = tokio::spawn(reader_loop(self.clone(), transport.clone()));
        let writer = tokio::spawn(writer_loop(self.clone(), transport.clone()));
        let watcher = self.0.config.lock().watch_activity.keepalive_interval().map(|interval| {
            tokio::spawn(watcher_loop(self.clone(), interval))
        });

        *self.0.tasks.lock() = Tasks { reader: Some(reader), writer: Some(writer), watcher };

        info!(id = self.id().get(), "channel connected");
        self.0.events.on_connected();
    }

    /// Tear the channel down (§4.9 "Disconnect"): abort every background
    /// task, close the transport, abort every in-flight message with
    /// `ABORT`, and — unless this was reached via a graceful BYE — schedule
    /// a reconnect if configured to do so. Idempotent.
    pub fn disconnect(&self) {
        if self.phase() == ChannelPhase::Disconnected {
            return;
        }
        self.set_phase(ChannelPhase::Disconnected);
        self.0.config.lock().queuable = false;

        if let Some(transport) = self.0.transport.write().take() {
            transport.close();
        }

        let tasks = std::mem::take(&mut *self.0.tasks.lock());
        if let Some(h) = tasks.reader {
            h.abort();
        }
        if let Some(h) = tasks.writer {
            h.abort();
        }
        if let Some(h) = tasks.watcher {
            h.abort();
        }

        for msg in self.0.slots.drain() {
            msg.abort();
        }

        warn!(id = self.id().get(), "channel disconnected");

        self.0.in_disconnect_callback.store(true, Ordering::Release);
        self.0.events.on_disconnected();
        self.0.in_disconnect_callback.store(false, Ordering::Release);

        if self.0.config.lock().auto_reconnect {
            if self.0.reconnect_target.lock().is_some() {
                self.schedule_reconnect();
            }
        }
    }

    /// Spawn a task that waits `retry_delay` and then redials whatever
    /// `reconnect_target` names, as long as the channel is still
    /// disconnected when the wait finishes (§4.9 "Connect").
    fn schedule_reconnect(&self) {
        let channel = self.clone();
        let delay = channel.0.config.lock().retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if channel.phase() != ChannelPhase::Disconnected {
                return;
            }
            let target = channel.0.reconnect_target.lock().clone();
            let result = match target {
                Some(ReconnectTarget::Tcp(addr)) => channel.connect_stream(addr).await,
                #[cfg(unix)]
                Some(ReconnectTarget::UnixSeqpacket(path)) => channel.connect_seqpacket(&path).await,
                None => return,
            };
            if let Err(e) = result {
                warn!(id = channel.id().get(), error = %e, "reconnect attempt failed, scheduling another retry");
                if channel.0.config.lock().auto_reconnect && channel.0.reconnect_target.lock().is_some() {
                    channel.schedule_reconnect();
                }
            }
        });
    }

    /// Finish a graceful close (§4.9 "Graceful BYE"): once every query still
    /// in flight when `bye` was called has been answered, disable
    /// reconnection and tear down like any other disconnect.
    pub(crate) fn disconnect_after_bye(&self) {
        *self.0.reconnect_target.lock() = None;
        self.0.config.lock().auto_reconnect = false;
        self.disconnect();
    }

    /// Called after the writer has sent `BYE` and after every reply that
    /// lands while closing (§8 scenario 6: "the three outstanding replies
    /// arrive; then `DISCONNECTED` fires"). Tears down once both are true:
    /// the frame is on the wire and the slot table has nothing left waiting.
    pub(crate) fn maybe_finish_bye(&self) {
        if self.0.bye_sent.load(Ordering::Acquire) && self.0.slots.is_empty() {
            self.disconnect_after_bye();
        }
    }
}
