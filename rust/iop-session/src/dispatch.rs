use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use iop_wire::SlotId;
use parking_lot::RwLock;

use crate::descriptor::RpcDescriptor;
use crate::hooks::{PostHook, PreHook};
use crate::reply::{Payload, Reply};

/// Future returned by a [`NormalHandler`]; boxed because dispatch entries
/// are stored behind a type-erased table (§3 "Dispatch entry").
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// What a channel does with a decoded reply destined for the caller of
/// `query`/`query_sync` — implemented by `iop-channel`'s `Channel` so that
/// `iop-session` never has to depend on it (mirrors `iop_registry`'s
/// handle-by-trait-object pattern).
pub trait ReplySink: Send + Sync {
    fn channel_id(&self) -> iop_wire::ChannelId;
    /// Queue a reply frame for local slot `slot` (the *caller's* local slot,
    /// already resolved from a [`SlotId`] by the dispatcher).
    fn send_reply(&self, slot: u32, reply: Reply);

    /// Take the file descriptor attached to the query at `slot`, if any
    /// (§4.5 "File-descriptor attachment"). One-shot: a second call returns
    /// `None`. Default implementation for sinks that never carry descriptors.
    #[cfg(unix)]
    fn take_fd(&self, _slot: SlotId) -> Option<std::os::fd::OwnedFd> {
        None
    }
}

/// A proxy/forward target: another channel a query can be relayed to
/// (§4.7). Implemented by `Channel`.
pub trait ProxyTarget: Send + Sync {
    fn channel_id(&self) -> iop_wire::ChannelId;
    fn is_ready(&self) -> bool;
    /// Enqueue a proxied query. `origin` is stashed in the outgoing
    /// message's reply target as the proxy-magic sentinel (§4.2, §4.7) so
    /// the eventual reply is routed back without this target ever seeing
    /// the original caller's identity.
    fn send_proxied_query(
        &self,
        cmd: i32,
        header: Option<Bytes>,
        payload: Payload,
        origin: SlotId,
    ) -> Result<(), ProxyDispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyDispatchError {
    /// The indirect-proxy's pointed channel is not currently set, or a
    /// static/dynamic target reports `is_ready() == false` (§3 "IndirectProxy").
    TargetNotReady,
    /// The dynamic-proxy callback declined to produce a target for this query.
    NoTargetSelected,
}

pub type NormalHandler =
    Arc<dyn Fn(Arc<dyn ReplySink>, SlotId, Option<Bytes>, Payload) -> HandlerFuture + Send + Sync>;

/// `(header, private datum) -> Option<(target, forced header)>` (§3
/// "DynamicProxy").
pub type DynamicProxyFn = Arc<
    dyn Fn(Option<&Bytes>, &(dyn Any + Send + Sync)) -> Option<(Arc<dyn ProxyTarget>, Option<Bytes>)>
        + Send
        + Sync,
>;

/// The five dispatch-entry shapes of §3/§4.5.
pub enum DispatchKind {
    /// A local callback with signature `(channel, slot, arg, hdr)`.
    Normal(NormalHandler),
    /// A fixed target channel, with an optional header supplied when the
    /// incoming query carries none. Per §4.7, an existing incoming header
    /// is never overwritten — "header replacement during proxying is not
    /// supported" means exactly that: this is a default, not an override.
    StaticProxy { target: Arc<dyn ProxyTarget>, forced_header: Option<Bytes> },
    /// A double pointer: the target may be swapped at runtime. `None` means
    /// not currently pointed anywhere, which rejects the query.
    IndirectProxy(Arc<RwLock<Option<Arc<dyn ProxyTarget>>>>),
    /// A callback that returns `(target, header)` per query.
    DynamicProxy { select: DynamicProxyFn, private: Arc<dyn Any + Send + Sync> },
    /// Reserved for the HTTP/SOAP front end (§9 Open Questions (i)); treated
    /// as an opaque black box here, never dispatched to directly.
    Shared(Arc<dyn Any + Send + Sync>),
}

/// A per-RPC record telling the channel how to handle a received query
/// (§3 "Dispatch entry", §4.8 "Hooks").
pub struct DispatchEntry {
    pub descriptor: RpcDescriptor,
    pub kind: DispatchKind,
    pub pre_hook: Option<PreHook>,
    pub pre_hook_arg: Option<Arc<dyn Any + Send + Sync>>,
    pub post_hook: Option<PostHook>,
    pub post_hook_arg: Option<Arc<dyn Any + Send + Sync>>,
}

impl DispatchEntry {
    pub fn normal(descriptor: RpcDescriptor, handler: NormalHandler) -> Self {
        Self {
            descriptor,
            kind: DispatchKind::Normal(handler),
            pre_hook: None,
            pre_hook_arg: None,
            post_hook: None,
            post_hook_arg: None,
        }
    }

    pub fn static_proxy(descriptor: RpcDescriptor, target: Arc<dyn ProxyTarget>) -> Self {
        Self {
            descriptor,
            kind: DispatchKind::StaticProxy { target, forced_header: None },
            pre_hook: None,
            pre_hook_arg: None,
            post_hook: None,
            post_hook_arg: None,
        }
    }

    pub fn with_hooks(
        mut self,
        pre_hook: Option<PreHook>,
        pre_hook_arg: Option<Arc<dyn Any + Send + Sync>>,
        post_hook: Option<PostHook>,
        post_hook_arg: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        self.pre_hook = pre_hook;
        self.pre_hook_arg = pre_hook_arg;
        self.post_hook = post_hook;
        self.post_hook_arg = post_hook_arg;
        self
    }
}

/// Maps a 32-bit command code to its [`DispatchEntry`] (§2, §3, §4.5).
#[derive(Default)]
pub struct DispatchTable {
    entries: RwLock<HashMap<i32, Arc<DispatchEntry>>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, cmd: i32, entry: DispatchEntry) {
        self.entries.write().insert(cmd, Arc::new(entry));
    }

    pub fn unregister(&self, cmd: i32) {
        self.entries.write().remove(&cmd);
    }

    pub fn lookup(&self, cmd: i32) -> Option<Arc<DispatchEntry>> {
        self.entries.read().get(&cmd).cloned()
    }

    pub fn contains(&self, cmd: i32) -> bool {
        self.entries.read().contains_key(&cmd)
    }
}
