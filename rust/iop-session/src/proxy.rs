use bytes::Bytes;
use iop_registry::ChannelRegistry;
use iop_wire::{Foreignness, SlotId, Status};
use tracing::{debug, warn};

use crate::dispatch::{DispatchKind, ProxyDispatchError, ProxyTarget, ReplySink};
use crate::reply::{Payload, Reply};

/// Resolve which target a dispatch entry's proxy kind points at right now,
/// and the header to use if the incoming query carried none (§3, §4.7).
fn resolve_target(
    kind: &DispatchKind,
    incoming_header: Option<&Bytes>,
    private_datum: Option<&(dyn std::any::Any + Send + Sync)>,
) -> Result<(std::sync::Arc<dyn ProxyTarget>, Option<Bytes>), ProxyDispatchError> {
    match kind {
        DispatchKind::StaticProxy { target, forced_header } => {
            if !target.is_ready() {
                return Err(ProxyDispatchError::TargetNotReady);
            }
            let header = incoming_header.cloned().or_else(|| forced_header.clone());
            Ok((target.clone(), header))
        }
        DispatchKind::IndirectProxy(slot) => {
            let guard = slot.read();
            match guard.as_ref() {
                Some(target) if target.is_ready() => Ok((target.clone(), incoming_header.cloned())),
                _ => Err(ProxyDispatchError::TargetNotReady),
            }
        }
        DispatchKind::DynamicProxy { select, private } => {
            let datum = private_datum.unwrap_or(private.as_ref());
            match (select.as_ref())(incoming_header, datum) {
                Some((target, forced_header)) if target.is_ready() => {
                    let header = incoming_header.cloned().or(forced_header);
                    Ok((target, header))
                }
                Some(_) => Err(ProxyDispatchError::TargetNotReady),
                None => Err(ProxyDispatchError::NoTargetSelected),
            }
        }
        DispatchKind::Normal(_) | DispatchKind::Shared(_) => {
            unreachable!("resolve_target only called for proxy dispatch kinds")
        }
    }
}

/// Relay an incoming query to the target selected by a proxy dispatch entry
/// (§4.7). On success the target channel now owns a stub message carrying
/// `origin` as its proxy-magic sentinel; on failure the caller should reply
/// with the returned status directly (no stub was ever created).
pub fn relay_query(
    kind: &DispatchKind,
    cmd: i32,
    header: Option<Bytes>,
    payload: Payload,
    origin: SlotId,
) -> Result<(), Status> {
    let (target, resolved_header) = resolve_target(kind, header.as_ref(), None).map_err(|e| match e {
        ProxyDispatchError::TargetNotReady => Status::ProxyError,
        ProxyDispatchError::NoTargetSelected => Status::Unimplemented,
    })?;

    target.send_proxied_query(cmd, resolved_header, payload, origin).map_err(|e| {
        debug!(?e, "proxy target rejected relayed query");
        Status::ProxyError
    })
}

/// Route a reply whose originating message was a proxy stub back to the
/// real originator (§4.7): "looks up the originator channel from the
/// stashed slot, builds a reply message on it with the same status and
/// payload ... and enqueues it." Absence of the originator channel (it was
/// wiped in the meantime) is silently absorbed per §7's propagation policy.
pub fn route_proxy_reply(registry: &ChannelRegistry<dyn ReplySink>, origin: SlotId, reply: Reply) {
    let Some(sink) = registry.lookup(origin.channel_id()) else {
        debug!(origin = origin.as_u64(), "proxy reply dropped: originator channel is gone");
        return;
    };
    if sink.channel_id() != origin.channel_id() {
        // The id was recycled out from under us (§4.3): never happens through
        // `ChannelRegistry::lookup` itself, but this guards the invariant
        // explicitly in case a future caller wires things up differently.
        warn!("proxy reply channel id mismatch, dropping");
        return;
    }
    sink.send_reply(origin.slot(), reply);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardError {
    /// The slot has already been consumed by an earlier reply/forward.
    AlreadyConsumed,
    /// Forwarding an HTTP-originated slot is out of scope (§4.7).
    ForeignOrigin,
}

/// Hand off an already-received reply to a different originator slot
/// without re-decoding (§4.7 "forward"): a `memcpy` of header+body onto a
/// fresh outgoing reply, as opposed to the proxy engine's per-query stub
/// bookkeeping.
pub fn forward_reply(
    registry: &ChannelRegistry<dyn ReplySink>,
    new_origin: SlotId,
    status: Status,
    payload: Option<Bytes>,
) -> Result<(), ForwardError> {
    if new_origin.foreignness() != Foreignness::Native {
        return Err(ForwardError::ForeignOrigin);
    }
    if new_origin.is_error_sentinel() {
        return Err(ForwardError::AlreadyConsumed);
    }
    let reply = match (status, payload) {
        (Status::Ok, Some(p)) => Reply::ok(Payload::Encoded(p)),
        (Status::Exn, Some(p)) => Reply::exn(Payload::Encoded(p)),
        (status, _) => Reply::status(status),
    };
    route_proxy_reply(registry, new_origin, reply);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RpcDescriptor;
    use crate::dispatch::{DispatchEntry, NormalHandler};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FakeTarget {
        id: iop_wire::ChannelId,
        ready: bool,
        sent: Mutex<Vec<(i32, SlotId)>>,
    }

    impl ProxyTarget for FakeTarget {
        fn channel_id(&self) -> iop_wire::ChannelId {
            self.id
        }
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn send_proxied_query(
            &self,
            cmd: i32,
            _header: Option<Bytes>,
            _payload: Payload,
            origin: SlotId,
        ) -> Result<(), ProxyDispatchError> {
            self.sent.lock().push((cmd, origin));
            Ok(())
        }
    }

    struct FakeSink {
        id: iop_wire::ChannelId,
        replies: Mutex<Vec<(u32, Status)>>,
    }

    impl ReplySink for FakeSink {
        fn channel_id(&self) -> iop_wire::ChannelId {
            self.id
        }
        fn send_reply(&self, slot: u32, reply: Reply) {
            self.replies.lock().push((slot, reply.status));
        }
    }

    #[test]
    fn static_proxy_relays_to_a_ready_target() {
        let target = Arc::new(FakeTarget { id: iop_wire::ChannelId::new(9), ready: true, sent: Mutex::new(Vec::new()) });
        let kind = DispatchKind::StaticProxy { target: target.clone(), forced_header: None };
        let origin = SlotId::new(iop_wire::ChannelId::new(1), iop_wire::Foreignness::Native, 4);
        relay_query(&kind, 7, None, Payload::encoded(Bytes::new()), origin).unwrap();
        assert_eq!(target.sent.lock().as_slice(), &[(7, origin)]);
    }

    #[test]
    fn static_proxy_rejects_when_target_not_ready() {
        let target = Arc::new(FakeTarget { id: iop_wire::ChannelId::new(9), ready: false, sent: Mutex::new(Vec::new()) });
        let kind = DispatchKind::StaticProxy { target, forced_header: None };
        let origin = SlotId::new(iop_wire::ChannelId::new(1), iop_wire::Foreignness::Native, 4);
        let err = relay_query(&kind, 7, None, Payload::encoded(Bytes::new()), origin).unwrap_err();
        assert_eq!(err, Status::ProxyError);
    }

    #[test]
    fn proxy_reply_routes_back_to_origin_channel() {
        let registry: ChannelRegistry<dyn ReplySink> = ChannelRegistry::new();
        let sink = Arc::new(FakeSink { id: iop_wire::ChannelId::new(1), replies: Mutex::new(Vec::new()) });
        registry.register(iop_wire::ChannelId::new(1), sink.clone());
        let origin = SlotId::new(iop_wire::ChannelId::new(1), iop_wire::Foreignness::Native, 4);
        route_proxy_reply(&registry, origin, Reply::status(Status::Ok));
        assert_eq!(sink.replies.lock().as_slice(), &[(4, Status::Ok)]);
    }

    #[test]
    fn proxy_reply_to_a_wiped_channel_is_silently_dropped() {
        let registry: ChannelRegistry<dyn ReplySink> = ChannelRegistry::new();
        let origin = SlotId::new(iop_wire::ChannelId::new(1), iop_wire::Foreignness::Native, 4);
        route_proxy_reply(&registry, origin, Reply::status(Status::Ok)); // must not panic
    }

    #[test]
    fn forward_rejects_foreign_origin() {
        let registry: ChannelRegistry<dyn ReplySink> = ChannelRegistry::new();
        let foreign = SlotId::new(iop_wire::ChannelId::new(1), Foreignness::ForeignHttp, 4);
        let err = forward_reply(&registry, foreign, Status::Ok, None).unwrap_err();
        assert_eq!(err, ForwardError::ForeignOrigin);
    }

    #[allow(dead_code)]
    fn _type_check_normal_handler_shape(_h: NormalHandler, _d: RpcDescriptor) {}
}
