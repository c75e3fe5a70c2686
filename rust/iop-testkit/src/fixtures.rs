//! Shared fixtures for exercising the channel core without a real socket
//! (§8 "End-to-end scenarios"): a connected local-mode pair sharing one
//! [`Runtime`], and a handful of trivial dispatch tables.

use std::sync::Arc;

use bytes::Bytes;
use iop_channel::prelude::*;
use iop_channel::Channel;
use iop_session::{HandlerFuture, NormalHandler, ReplySink};
use iop_wire::SlotId;

/// Command code the echo/throw/silent fixtures register under.
pub const FIXTURE_CMD: i32 = 42;

/// A dispatch table with one entry at [`FIXTURE_CMD`] that immediately
/// replies `OK` with the same payload it received.
pub fn echo_dispatch_table() -> Arc<DispatchTable> {
    let table = DispatchTable::new();
    let handler: NormalHandler = Arc::new(|sink, slot, _header, payload| echo_handler(sink, slot, payload));
    table.register(FIXTURE_CMD, DispatchEntry::normal(RpcDescriptor::new(FIXTURE_CMD, "Echo"), handler));
    Arc::new(table)
}

fn echo_handler(sink: Arc<dyn ReplySink>, slot: SlotId, payload: Payload) -> HandlerFuture {
    Box::pin(async move {
        if !slot.is_async() {
            sink.send_reply(slot.slot(), Reply::ok(payload));
        }
    })
}

/// A dispatch table whose single entry throws a fixed `Exn` payload instead
/// of an `Ok` reply (§8 scenario 2 "Round trip with exception").
pub fn throwing_dispatch_table(exn_payload: Bytes) -> Arc<DispatchTable> {
    let table = DispatchTable::new();
    let handler: NormalHandler =
        Arc::new(move |sink: Arc<dyn ReplySink>, slot: SlotId, _header, _payload| {
            let exn_payload = exn_payload.clone();
            Box::pin(async move {
                if !slot.is_async() {
                    sink.send_reply(slot.slot(), Reply::exn(Payload::Encoded(exn_payload)));
                }
            })
        });
    table.register(FIXTURE_CMD, DispatchEntry::normal(RpcDescriptor::new(FIXTURE_CMD, "Throw"), handler));
    Arc::new(table)
}

/// A dispatch table whose single entry receives the query and never
/// replies, for exercising timeout/cancellation (§8 scenarios 3, 4).
pub fn silent_dispatch_table() -> Arc<DispatchTable> {
    let table = DispatchTable::new();
    let handler: NormalHandler = Arc::new(|_sink, _slot, _header, _payload| Box::pin(async {}));
    table.register(FIXTURE_CMD, DispatchEntry::normal(RpcDescriptor::new(FIXTURE_CMD, "Silent"), handler));
    Arc::new(table)
}

/// A runtime shared by both halves of a [`local_pair`], matching how a real
/// embedding process shares one [`Runtime`] across every channel it owns.
pub fn shared_runtime() -> Arc<Runtime<dyn ReplySink>> {
    Arc::new(Runtime::new(RuntimeConfig::default()))
}

/// A connected local-mode channel pair (§4.6, §9 "Local-mode zero-copy"):
/// `a`'s dispatch table is `dispatch_a`, `b`'s is `dispatch_b`. Both share
/// `runtime`, as two channels in the same process would.
pub fn local_pair(
    runtime: Arc<Runtime<dyn ReplySink>>,
    dispatch_a: Arc<DispatchTable>,
    dispatch_b: Arc<DispatchTable>,
) -> (Channel, Channel) {
    Channel::local_pair(runtime, dispatch_a, ChannelConfig::default(), dispatch_b, ChannelConfig::default())
        .expect("local_pair never fails: no transport to connect, ids always available in a fresh runtime")
}

/// A connected local-mode pair where `a` runs the given dispatch table and
/// `b` has none (the common shape for "client `a` calls into server `b`").
pub fn client_server_pair(dispatch_b: Arc<DispatchTable>) -> (Channel, Channel) {
    local_pair(shared_runtime(), Arc::new(DispatchTable::new()), dispatch_b)
}
