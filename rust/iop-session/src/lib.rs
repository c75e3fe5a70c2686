#![forbid(unsafe_code)]

//! Transport-agnostic core logic for the IOP-RPC channel (§2, §4.2-§4.3,
//! §4.5, §4.7-§4.8): the message object, slot table, dispatch table, hooks,
//! and the proxy/forward engine. Knows nothing about sockets or event
//! loops — those live in `iop-transport` and `iop-channel`.

mod descriptor;
mod dispatch;
mod framing;
mod hooks;
mod message;
mod proxy;
mod reply;
mod slot_table;

pub use descriptor::RpcDescriptor;
pub use dispatch::{
    DispatchEntry, DispatchKind, DispatchTable, DynamicProxyFn, HandlerFuture, NormalHandler, ProxyDispatchError,
    ProxyTarget, ReplySink,
};
pub use framing::{join_header_and_value, split_header_and_value};
pub use hooks::{
    install_hook_context, run_post_hook, take_hook_context, HookContext, PostHook, PreHook, PreHookOutcome,
};
pub use message::{Message, ReplyTarget};
pub use proxy::{forward_reply, relay_query, route_proxy_reply, ForwardError};
pub use reply::{Payload, Reply, ReplyBody, ReplyCallback};
pub use slot_table::{SlotTable, SlotTableExhausted};

/// Convenience alias for the process-wide channel registry keyed by
/// [`ReplySink`] trait objects, the shape every channel implementation
/// registers itself under (§9).
pub type SessionRegistry = iop_registry::ChannelRegistry<dyn ReplySink>;
