//! Query proxying through a `StaticProxy` dispatch entry (§4.7, §8 scenario
//! 5): channel `q2` forwards an incoming query to channel `p1`'s peer `p2`
//! (which actually answers it) and the reply finds its way back to `q1`
//! without either proxy hop ever decoding the payload.

use std::sync::Arc;

use bytes::Bytes;
use iop_channel::prelude::*;
use iop_channel::Channel;
use iop_session::ProxyTarget;
use iop_testkit::{echo_dispatch_table, shared_runtime};

#[tokio::test(flavor = "multi_thread")]
async fn static_proxy_relays_a_query_and_routes_the_reply_back() {
    let runtime = shared_runtime();

    // p1/p2: p2 actually answers FIXTURE_CMD; p1 is the handle used as the
    // proxy target (sending through p1 delivers into p2's dispatch table,
    // same as any other local-mode pair).
    let (p1, _p2) = Channel::local_pair(
        runtime.clone(),
        Arc::new(DispatchTable::new()),
        ChannelConfig::default(),
        echo_dispatch_table(),
        ChannelConfig::default(),
    )
    .unwrap();

    // q1/q2: q2's dispatch table proxies FIXTURE_CMD to p1.
    let q2_dispatch = DispatchTable::new();
    let target: Arc<dyn ProxyTarget> = Arc::new(p1.clone());
    q2_dispatch.register(
        iop_testkit::FIXTURE_CMD,
        DispatchEntry::static_proxy(RpcDescriptor::new(iop_testkit::FIXTURE_CMD, "Proxy"), target),
    );
    let (q1, _q2) = Channel::local_pair(
        runtime,
        Arc::new(DispatchTable::new()),
        ChannelConfig::default(),
        Arc::new(q2_dispatch),
        ChannelConfig::default(),
    )
    .unwrap();

    let reply = q1
        .query(iop_testkit::FIXTURE_CMD, None, Payload::encoded(Bytes::from_static(b"through the looking glass")))
        .await
        .unwrap();

    assert_eq!(reply.status, Status::Ok);
    assert_eq!(
        reply.payload().and_then(|p| p.as_encoded()).cloned(),
        Some(Bytes::from_static(b"through the looking glass"))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn static_proxy_to_an_unready_target_answers_proxy_error_without_hanging() {
    let runtime = shared_runtime();

    // p1/p2 wired, but p2 immediately disconnects so `p1.is_ready()` (which
    // tracks phase) reports false.
    let (p1, p2) = Channel::local_pair(
        runtime.clone(),
        Arc::new(DispatchTable::new()),
        ChannelConfig::default(),
        Arc::new(DispatchTable::new()),
        ChannelConfig::default(),
    )
    .unwrap();
    p2.disconnect();
    p1.disconnect();

    let q2_dispatch = DispatchTable::new();
    let target: Arc<dyn ProxyTarget> = Arc::new(p1);
    q2_dispatch.register(
        iop_testkit::FIXTURE_CMD,
        DispatchEntry::static_proxy(RpcDescriptor::new(iop_testkit::FIXTURE_CMD, "Proxy"), target),
    );
    let (q1, _q2) = Channel::local_pair(
        runtime,
        Arc::new(DispatchTable::new()),
        ChannelConfig::default(),
        Arc::new(q2_dispatch),
        ChannelConfig::default(),
    )
    .unwrap();

    let reply = q1.query(iop_testkit::FIXTURE_CMD, None, Payload::encoded(Bytes::new())).await.unwrap();
    assert_eq!(reply.status, Status::ProxyError);
}
