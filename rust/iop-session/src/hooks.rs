use std::any::Any;
use std::sync::Arc;

use iop_registry::HookContextMap;
use iop_wire::{SlotId, Status};

use crate::descriptor::RpcDescriptor;
use crate::dispatch::ReplySink;

/// What a pre-hook reports back to the read pipeline (§4.5, §4.8): either it
/// left the query for the main handler, or it already replied synchronously
/// — in which case the main handler (and the hook context it would have
/// installed) is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreHookOutcome {
    Continue,
    RepliedSynchronously,
}

pub type PreHook = Arc<
    dyn Fn(&dyn ReplySink, SlotId, Option<&bytes::Bytes>, &(dyn Any + Send + Sync)) -> PreHookOutcome
        + Send
        + Sync,
>;

pub type PostHook =
    Arc<dyn Fn(SlotId, Status, &(dyn Any + Send + Sync), Option<&[u8]>) + Send + Sync>;

/// Per-query state carried from a pre-hook to its matching post-hook,
/// keyed by slot identifier in the process-wide [`HookContextMap`] (§3
/// "Hook context", §4.8).
pub struct HookContext {
    pub slot: SlotId,
    pub descriptor: RpcDescriptor,
    pub post_hook: PostHook,
    pub post_hook_arg: Arc<dyn Any + Send + Sync>,
    /// Caller-defined byte trailer threaded from pre-hook to post-hook.
    pub trailer: Vec<u8>,
}

/// Install `ctx` for `slot` ahead of running the main handler (§4.8). A
/// no-op convenience wrapper over [`HookContextMap::install`] so call sites
/// in the read pipeline don't need to spell out the generic parameter.
pub fn install_hook_context(hooks: &HookContextMap, slot: SlotId, ctx: HookContext) {
    hooks.install(slot.as_u64(), ctx);
}

/// Take the context installed for `slot`, invoked by the post-hook runner
/// just before a reply leaves the channel (§4.8).
pub fn take_hook_context(hooks: &HookContextMap, slot: SlotId) -> Option<HookContext> {
    hooks.take(slot.as_u64())
}

/// Run the post-hook for `slot` if one was installed, then drop the context.
/// Called exactly once per completed query, immediately before the reply is
/// queued (§4.6 "The post-hook fires immediately before the reply is
/// queued.").
pub fn run_post_hook(hooks: &HookContextMap, slot: SlotId, status: Status) {
    if let Some(ctx) = take_hook_context(hooks, slot) {
        (ctx.post_hook.as_ref())(slot, status, ctx.post_hook_arg.as_ref(), Some(&ctx.trailer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn post_hook_runs_once_and_context_is_gone_afterward() {
        let hooks = HookContextMap::new();
        let slot = SlotId::new(iop_wire::ChannelId::new(1), iop_wire::Foreignness::Native, 3);
        let seen = Arc::new(Mutex::new(None));
        let seen_for_hook = seen.clone();
        let post: PostHook = Arc::new(move |_slot, status, _arg, _trailer| {
            *seen_for_hook.lock() = Some(status);
        });
        install_hook_context(
            &hooks,
            slot,
            HookContext {
                slot,
                descriptor: RpcDescriptor::new(5, "Echo"),
                post_hook: post,
                post_hook_arg: Arc::new(()),
                trailer: Vec::new(),
            },
        );
        run_post_hook(&hooks, slot, Status::Ok);
        assert_eq!(*seen.lock(), Some(Status::Ok));

        // Running it again is a silent no-op: context already consumed.
        run_post_hook(&hooks, slot, Status::Ok);
        assert_eq!(*seen.lock(), Some(Status::Ok));
    }
}
