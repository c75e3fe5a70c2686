use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use iop_registry::Runtime;
use iop_session::{DispatchTable, Payload, ProxyDispatchError, ProxyTarget, Reply, ReplySink, SlotTable};
use iop_transport::Transport;
use iop_wire::{ChannelId, SlotId, Status, StreamControlOp};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::events::{ChannelEvents, NoEvents};
use crate::outbound::Outbound;

/// Coarse lifecycle state (§3 "Lifecycle", §4.9). Stored as a plain `u8` so
/// reads from the hot path (`query`, `send_reply`) don't need a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelPhase {
    Init = 0,
    Connected = 1,
    Closing = 2,
    Disconnected = 3,
}

impl ChannelPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ChannelPhase::Init,
            1 => ChannelPhase::Connected,
            2 => ChannelPhase::Closing,
            _ => ChannelPhase::Disconnected,
        }
    }
}

/// Background tasks a connected channel owns: the reader, the writer, and
/// the watch-activity ticker. Stashed so `disconnect` can abort all three.
#[derive(Default)]
pub(crate) struct Tasks {
    pub reader: Option<JoinHandle<()>>,
    pub writer: Option<JoinHandle<()>>,
    pub watcher: Option<JoinHandle<()>>,
}

/// The IOP-RPC channel (§2, §3): one end of a bidirectional, length-prefixed
/// message transport. Implements [`ReplySink`] (so the dispatch/proxy engine
/// in `iop-session` can deliver replies to it) and [`ProxyTarget`] (so it can
/// be pointed at by another channel's proxy dispatch entries).
///
/// Cheap to clone: internally an `Arc`.
#[derive(Clone)]
pub struct Channel(pub(crate) Arc<Inner>);

pub(crate) struct Inner {
    pub id: ChannelId,
    pub runtime: Arc<Runtime<dyn ReplySink>>,
    pub dispatch: Arc<DispatchTable>,
    pub slots: SlotTable,
    pub transport: RwLock<Option<Arc<Transport>>>,
    /// Replaced wholesale on every `attach_transport` (first connect and
    /// every reconnect): the paired receiver is only ever taken once per
    /// transport attachment, so a fresh pair is needed each time rather than
    /// recovering the one the previous writer task took (§4.9 "Connect").
    pub out_tx: RwLock<mpsc::UnboundedSender<Outbound>>,
    pub out_rx: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    pub config: Mutex<ChannelConfig>,
    pub phase: AtomicU8,
    pub events: Arc<dyn ChannelEvents>,
    pub last_activity: Mutex<Instant>,
    pub idle_fired: AtomicBool,
    pub tasks: Mutex<Tasks>,
    /// Set only for a local-mode channel: the other half of the pair, used
    /// to deliver queries/replies directly without going through a
    /// transport or the codec (§4.6, §9 "Local-mode zero-copy").
    pub local_peer: RwLock<Option<std::sync::Weak<Inner>>>,
    #[cfg(unix)]
    pub peer_credentials: Mutex<Option<iop_transport::PeerCredentials>>,
    /// Descriptors attached to not-yet-dispatched incoming queries, keyed by
    /// local slot (§4.5 "File-descriptor attachment"). A query's handler
    /// retrieves its descriptor through [`ReplySink::take_fd`] before this
    /// entry is ever removed elsewhere.
    #[cfg(unix)]
    pub inbound_fds: Mutex<std::collections::HashMap<u32, std::os::fd::OwnedFd>>,
    /// Where to reconnect to after an unexpected disconnect (§4.9
    /// "Connect"). `None` for a local-mode channel or one `spawn`ed on an
    /// already-accepted fd: neither has an address to redial (§3 invariant
    /// (v): "a local channel ... never goes through reconnection").
    pub reconnect_target: Mutex<Option<crate::connect::ReconnectTarget>>,
    /// Set while a disconnect callback is running, so a reentrant call that
    /// tries to enqueue on the disconnecting channel can be rejected rather
    /// than corrupting queue state (§5 "Reentrancy discipline").
    pub in_disconnect_callback: AtomicBool,
    /// Set once the writer has put the `BYE` frame on the wire (§4.9
    /// "Graceful BYE"). The channel doesn't tear down the moment it's sent:
    /// it waits for every still-in-flight query's reply to arrive first
    /// (§8 scenario 6), so the reader keeps running after the writer is done.
    pub bye_sent: AtomicBool,
}

impl Channel {
    /// Allocate a channel id, register it in `runtime`, and return a channel
    /// in the `Init` phase with no transport attached yet (§4.9 "Init").
    pub fn init(
        runtime: Arc<Runtime<dyn ReplySink>>,
        dispatch: Arc<DispatchTable>,
        config: ChannelConfig,
    ) -> Result<Channel, ChannelError> {
        Self::init_with_events(runtime, dispatch, config, Arc::new(NoEvents))
    }

    pub fn init_with_events(
        runtime: Arc<Runtime<dyn ReplySink>>,
        dispatch: Arc<DispatchTable>,
        config: ChannelConfig,
        events: Arc<dyn ChannelEvents>,
    ) -> Result<Channel, ChannelError> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        // The id and the registry entry must come into existence atomically
        // (§3 invariant (i)): two `init` calls racing on different tasks
        // must never be handed the same id, so the scan-and-insert happens
        // under one lock via `allocate_and_register_with` rather than a
        // separate `allocate_id` followed by `register`.
        let channel = runtime.registry.allocate_and_register_with(|id| {
            let inner = Arc::new(Inner {
                id,
                runtime: runtime.clone(),
                dispatch,
                slots: SlotTable::new(),
                transport: RwLock::new(None),
                out_tx: RwLock::new(out_tx),
                out_rx: Mutex::new(Some(out_rx)),
                config: Mutex::new(config),
                phase: AtomicU8::new(ChannelPhase::Init as u8),
                events,
                last_activity: Mutex::new(Instant::now()),
                idle_fired: AtomicBool::new(false),
                tasks: Mutex::new(Tasks::default()),
                local_peer: RwLock::new(None),
                #[cfg(unix)]
                peer_credentials: Mutex::new(None),
                #[cfg(unix)]
                inbound_fds: Mutex::new(std::collections::HashMap::new()),
                reconnect_target: Mutex::new(None),
                in_disconnect_callback: AtomicBool::new(false),
                bye_sent: AtomicBool::new(false),
            });
            let channel = Channel(inner);
            let sink = Arc::new(channel.clone()) as Arc<dyn ReplySink>;
            (channel, sink)
        });
        channel.ok_or(ChannelError::ChannelIdsExhausted)
    }

    pub fn id(&self) -> ChannelId {
        self.0.id
    }

    pub fn phase(&self) -> ChannelPhase {
        ChannelPhase::from_u8(self.0.phase.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == ChannelPhase::Connected
    }

    pub(crate) fn set_phase(&self, phase: ChannelPhase) {
        self.0.phase.store(phase as u8, Ordering::Release);
    }

    fn queuable(&self) -> bool {
        self.phase() == ChannelPhase::Connected
            && self.0.config.lock().queuable
            && !self.0.in_disconnect_callback.load(Ordering::Acquire)
    }

    #[cfg(unix)]
    pub fn peer_credentials(&self) -> Option<iop_transport::PeerCredentials> {
        *self.0.peer_credentials.lock()
    }

    /// Send a query and wait for its reply (§2, §4.2).
    pub async fn query(
        &self,
        cmd: i32,
        header: Option<Bytes>,
        payload: Payload,
    ) -> Result<Reply, ChannelError> {
        self.query_with_timeout(cmd, header, payload, None).await
    }

    /// Send a query with a per-call timeout (§4.2 "Timeout semantics"): if no
    /// reply arrives within `timeout_ms`, the returned future resolves with
    /// `status = TimedOut` instead of waiting forever. A reply that arrives
    /// after the timeout has already fired is dropped silently, same as a
    /// reply racing an explicit [`Channel::cancel`] (§8 scenario 3).
    pub async fn query_with_timeout(
        &self,
        cmd: i32,
        header: Option<Bytes>,
        payload: Payload,
        timeout_ms: Option<u64>,
    ) -> Result<Reply, ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.query_with_callback(cmd, header, payload, timeout_ms, Box::new(move |reply| {
            let _ = tx.send(reply);
        }))?;
        rx.await.map_err(|_| ChannelError::NotConnected)
    }

    /// Blocking equivalent of [`Channel::query`] for callers outside the
    /// async runtime proper — e.g. a plain worker thread holding only a
    /// `Handle` (§3 "Collaborator interfaces"). Requires a multi-thread
    /// runtime; panics if called from a current-thread one, same as
    /// [`tokio::task::block_in_place`].
    pub fn query_sync(
        &self,
        cmd: i32,
        header: Option<Bytes>,
        payload: Payload,
    ) -> Result<Reply, ChannelError> {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(self.query(cmd, header, payload)))
    }

    /// Fire-and-forget: no reply is ever expected (§3 "Async message").
    pub fn notify(&self, cmd: i32, header: Option<Bytes>, payload: Payload) -> Result<(), ChannelError> {
        if !self.queuable() {
            return Err(ChannelError::NotConnected);
        }

        if let Some(peer) = self.local_peer() {
            return self.dispatch_local_query(&peer, cmd, header, payload, 0);
        }

        let mut msg = iop_session::Message::new(0, cmd, payload, 0);
        msg.header = header;
        let msg = Arc::new(msg);
        self.0
            .out_tx
            .read()
            .send(Outbound::Query(msg, 0))
            .map_err(|_| ChannelError::NotConnected)
    }

    /// Queue a query and hand back the slot it was allocated under before
    /// its reply arrives (§3 "Message", §4.2). Exposed so a caller can race
    /// the returned future against an explicit [`Channel::cancel`] on the
    /// same slot instead of only ever waiting out a timeout (§8 scenario 4).
    pub fn query_with_callback(
        &self,
        cmd: i32,
        header: Option<Bytes>,
        payload: Payload,
        timeout_ms: Option<u64>,
        callback: iop_session::ReplyCallback,
    ) -> Result<u32, ChannelError> {
        if !self.queuable() {
            return Err(ChannelError::NotConnected);
        }
        let scratch = self.0.runtime.messages.take_scratch();
        let mut msg = iop_session::Message::with_scratch(1, cmd, payload, scratch);
        msg.header = header;
        msg.timeout_ms = timeout_ms;
        msg.set_reply_callback(callback);
        let msg = Arc::new(msg);
        let slot = self.0.slots.allocate(msg.clone())?;
        if let Some(ms) = timeout_ms {
            msg.arm_timeout(ms);
        }

        if let Some(peer) = self.local_peer() {
            self.dispatch_local_query(&peer, cmd, msg.header.clone(), msg.payload.clone(), slot)?;
            return Ok(slot);
        }

        self.0
            .out_tx
            .read()
            .send(Outbound::Query(msg, slot))
            .map_err(|_| ChannelError::NotConnected)?;
        Ok(slot)
    }

    /// Cancel an in-flight query previously created through `query`. A no-op
    /// if the slot has already been claimed by a reply, timeout, or an
    /// earlier cancel (§4.2 "Cancel semantics", §8 invariant 6).
    pub fn cancel(&self, slot: u32) {
        if let Some(msg) = self.0.slots.remove(slot) {
            msg.cancel();
        }
    }

    /// Drain the outbound queue: resolves once every item enqueued before
    /// this call has been handed to the transport (§10.6).
    pub async fn flush(&self) -> Result<(), ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.0.out_tx.read().send(Outbound::Flush(tx)).map_err(|_| ChannelError::NotConnected)?;
        rx.await.map_err(|_| ChannelError::NotConnected)
    }

    /// Initiate a graceful close (§4.9 "Graceful BYE"): stop accepting new
    /// queries, tell the peer, and disconnect once in-flight work drains.
    pub fn bye(&self) -> Result<(), ChannelError> {
        if self.phase() != ChannelPhase::Connected {
            return Err(ChannelError::NotConnected);
        }
        self.set_phase(ChannelPhase::Closing);
        self.0.config.lock().queuable = false;
        self.0
            .out_tx
            .read()
            .send(Outbound::Control(StreamControlOp::Bye))
            .map_err(|_| ChannelError::NotConnected)
    }

    /// Send a bare keepalive frame (§4.9 "Watch-activity"). Exposed so a
    /// caller can drive activity itself instead of relying solely on the
    /// watch-activity ticker.
    pub fn nop(&self) -> Result<(), ChannelError> {
        self.send_nop()
    }

    pub(crate) fn send_nop(&self) -> Result<(), ChannelError> {
        self.0.out_tx.read().send(Outbound::Control(StreamControlOp::Nop)).map_err(|_| ChannelError::NotConnected)
    }

    /// Answer a pending query with a successful value (§3 "Collaborator
    /// interfaces"). Thin sugar over [`ReplySink::send_reply`] for handler
    /// code that only has a `Channel`, not a type-erased sink.
    pub fn reply(&self, slot: u32, payload: Payload) {
        ReplySink::send_reply(self, slot, Reply::ok(payload));
    }

    /// Answer a pending query with an application-level exception payload
    /// (§3 "Status", [`Status::Exn`]).
    pub fn throw(&self, slot: u32, payload: Payload) {
        ReplySink::send_reply(self, slot, Reply::exn(payload));
    }

    /// Answer a pending query with a transport-level status that carries no
    /// value (e.g. [`Status::Unimplemented`], [`Status::ServerError`]).
    pub fn reply_err(&self, slot: u32, status: Status) {
        ReplySink::send_reply(self, slot, Reply::status(status));
    }

    pub(crate) fn local_peer(&self) -> Option<Channel> {
        self.0.local_peer.read().as_ref().and_then(|w| w.upgrade()).map(Channel)
    }

    /// Deliver a query directly to a local-mode peer's dispatch table,
    /// bypassing the codec and transport entirely (§4.6, §9).
    fn dispatch_local_query(
        &self,
        peer: &Channel,
        cmd: i32,
        header: Option<Bytes>,
        payload: Payload,
        origin_slot: u32,
    ) -> Result<(), ChannelError> {
        let origin = SlotId::new(self.id(), iop_wire::Foreignness::Native, origin_slot);
        let peer = peer.clone();
        tokio::spawn(async move {
            Channel::dispatch_incoming_query(&peer, cmd, header, payload, origin).await;
        });
        Ok(())
    }

    /// Shared by the read pipeline (for a transport-backed channel) and
    /// local mode: route one incoming query to its dispatch entry (§4.5).
    /// `receiving` is the channel whose dispatch table and reply path
    /// handle this query.
    pub(crate) async fn dispatch_incoming_query(
        receiving: &Channel,
        cmd: i32,
        header: Option<Bytes>,
        payload: Payload,
        origin: SlotId,
    ) {
        let slot = origin.slot();
        let Some(entry) = receiving.0.dispatch.lookup(cmd) else {
            if !origin.is_async() {
                receiving.send_reply(slot, Reply::status(Status::Unimplemented));
            }
            return;
        };

        match &entry.kind {
            iop_session::DispatchKind::Normal(handler) => {
                let sink: Arc<dyn ReplySink> = Arc::new(receiving.clone());

                if let Some(pre) = &entry.pre_hook {
                    let arg = entry.pre_hook_arg.clone().unwrap_or_else(|| Arc::new(()) as Arc<dyn std::any::Any + Send + Sync>);
                    let outcome = (pre.as_ref())(sink.as_ref(), origin, header.as_ref(), arg.as_ref());
                    if outcome == iop_session::PreHookOutcome::RepliedSynchronously {
                        return;
                    }
                }
                if let Some(post) = &entry.post_hook {
                    let arg = entry.post_hook_arg.clone().unwrap_or_else(|| Arc::new(()) as Arc<dyn std::any::Any + Send + Sync>);
                    iop_session::install_hook_context(
                        &receiving.0.runtime.hooks,
                        origin,
                        iop_session::HookContext {
                            slot: origin,
                            descriptor: entry.descriptor,
                            post_hook: post.clone(),
                            post_hook_arg: arg,
                            trailer: Vec::new(),
                        },
                    );
                }
                (handler.as_ref())(sink, origin, header, payload).await;
            }
            iop_session::DispatchKind::StaticProxy { .. }
            | iop_session::DispatchKind::IndirectProxy(_)
            | iop_session::DispatchKind::DynamicProxy { .. } => {
                if let Err(status) = iop_session::relay_query(&entry.kind, cmd, header, payload, origin) {
                    if !origin.is_async() {
                        receiving.send_reply(slot, Reply::status(status));
                    }
                }
            }
            iop_session::DispatchKind::Shared(_) => {
                if !origin.is_async() {
                    receiving.send_reply(slot, Reply::status(Status::Unimplemented));
                }
            }
        }
    }

}

impl ReplySink for Channel {
    fn channel_id(&self) -> ChannelId {
        self.0.id
    }

    #[cfg(unix)]
    fn take_fd(&self, slot: SlotId) -> Option<std::os::fd::OwnedFd> {
        self.0.inbound_fds.lock().remove(&slot.slot())
    }

    /// Run the post-hook (if any) for this slot, then queue the reply
    /// (§4.6 "The post-hook fires immediately before the reply is queued.").
    fn send_reply(&self, slot: u32, reply: Reply) {
        let origin = SlotId::new(self.0.id, iop_wire::Foreignness::Native, slot);
        iop_session::run_post_hook(&self.0.runtime.hooks, origin, reply.status);

        if let Some(peer) = self.local_peer() {
            let peer = peer.clone();
            tokio::spawn(async move {
                peer.deliver_local_reply(slot, reply);
            });
            return;
        }

        let _ = self.0.out_tx.read().send(Outbound::Reply { slot, reply });
    }
}

impl Channel {
    /// Local-mode counterpart of the read pipeline's reply handling: deliver
    /// directly to the querying peer's slot table instead of decoding a
    /// frame (§4.6).
    fn deliver_local_reply(&self, slot: u32, reply: Reply) {
        let Some(msg) = self.0.slots.remove(slot) else { return };
        if let Some(origin) = msg.take_proxy_origin() {
            iop_session::route_proxy_reply(&self.0.runtime.registry, origin, reply);
        } else {
            msg.fire(reply);
        }
        if self.phase() == ChannelPhase::Closing {
            self.maybe_finish_bye();
        }
    }
}

impl ProxyTarget for Channel {
    fn channel_id(&self) -> ChannelId {
        self.0.id
    }

    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    fn send_proxied_query(
        &self,
        cmd: i32,
        header: Option<Bytes>,
        payload: Payload,
        origin: SlotId,
    ) -> Result<(), ProxyDispatchError> {
        if !self.queuable() {
            return Err(ProxyDispatchError::TargetNotReady);
        }
        let scratch = self.0.runtime.messages.take_scratch();
        let mut msg = iop_session::Message::proxy_with_scratch(1, cmd, payload.clone(), origin, scratch);
        msg.header = header.clone();
        let msg = Arc::new(msg);
        let slot = self.0.slots.allocate(msg.clone()).map_err(|_| ProxyDispatchError::TargetNotReady)?;

        if let Some(peer) = self.local_peer() {
            let _ = self.dispatch_local_query(&peer, cmd, header, payload, slot);
            return Ok(());
        }

        self.0
            .out_tx
            .read()
            .send(Outbound::Query(msg, slot))
            .map_err(|_| ProxyDispatchError::TargetNotReady)
    }
}
