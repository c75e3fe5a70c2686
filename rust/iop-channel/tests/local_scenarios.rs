//! End-to-end scenarios over a local-mode pair (§8 "End-to-end scenarios"
//! 1-4): async fire-and-forget, a round trip ending in an exception, a
//! timeout, and cancellation racing a late reply.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use iop_channel::prelude::*;
use iop_session::NormalHandler;
use iop_testkit::{client_server_pair, silent_dispatch_table, throwing_dispatch_table, FIXTURE_CMD};

#[tokio::test(flavor = "multi_thread")]
async fn async_fire_and_forget_never_touches_the_slot_table() {
    let ran = Arc::new(AtomicBool::new(false));
    let table = DispatchTable::new();
    {
        let ran = ran.clone();
        let handler: NormalHandler = Arc::new(move |_sink, slot, _hdr, _payload| {
            assert!(slot.is_async(), "notify() must arrive with slot zero");
            let ran = ran.clone();
            Box::pin(async move {
                ran.store(true, Ordering::SeqCst);
            })
        });
        table.register(FIXTURE_CMD, DispatchEntry::normal(RpcDescriptor::new(FIXTURE_CMD, "Notify"), handler));
    }

    let (client, _server) = client_server_pair(Arc::new(table));
    client.notify(FIXTURE_CMD, None, Payload::encoded(Bytes::from_static(b"fire"))).unwrap();

    // Give the spawned dispatch task a chance to run; there is no reply to
    // await, so this is the only synchronization point available.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn round_trip_with_exception_decodes_to_the_thrown_payload() {
    let exn_bytes = Bytes::from_static(br#"{"reason":"bad"}"#);
    let (client, _server) = client_server_pair(throwing_dispatch_table(exn_bytes.clone()));

    let reply = client
        .query(FIXTURE_CMD, None, Payload::encoded(Bytes::from_static(b"{\"x\":5}")))
        .await
        .unwrap();

    assert_eq!(reply.status, Status::Exn);
    assert_eq!(reply.payload().and_then(|p| p.as_encoded()).cloned(), Some(exn_bytes));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn timeout_fires_and_the_late_reply_is_dropped() {
    let (client, _server) = client_server_pair(silent_dispatch_table());

    let reply = client.query_with_timeout(FIXTURE_CMD, None, Payload::encoded(Bytes::new()), Some(50)).await.unwrap();

    assert_eq!(reply.status, Status::TimedOut);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_mid_flight_fires_canceled_exactly_once_and_the_late_server_reply_is_dropped() {
    let table = DispatchTable::new();
    let handler: NormalHandler = Arc::new(|sink, slot, _hdr, payload| {
        Box::pin(async move {
            // Simulate the server taking a moment, long enough for the
            // client to have already canceled by the time this runs.
            tokio::time::sleep(Duration::from_millis(50)).await;
            if !slot.is_async() {
                sink.send_reply(slot.slot(), Reply::ok(payload));
            }
        })
    });
    table.register(FIXTURE_CMD, DispatchEntry::normal(RpcDescriptor::new(FIXTURE_CMD, "Slow"), handler));

    let (client, _server) = client_server_pair(Arc::new(table));

    let count = Arc::new(AtomicU32::new(0));
    let seen_status = Arc::new(std::sync::Mutex::new(None));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let cb_count = count.clone();
    let cb_status = seen_status.clone();
    let slot = client
        .query_with_callback(
            FIXTURE_CMD,
            None,
            Payload::encoded(Bytes::new()),
            None,
            Box::new(move |reply| {
                cb_count.fetch_add(1, Ordering::SeqCst);
                *cb_status.lock().unwrap() = Some(reply.status);
                let _ = tx.send(());
            }),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    client.cancel(slot);
    client.cancel(slot); // idempotent: must not fire a second callback

    rx.await.unwrap();
    // Let the server's delayed reply land too; it must find nothing to
    // deliver to (the slot was already claimed by cancel).
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1, "reply callback fires exactly once");
    assert_eq!(*seen_status.lock().unwrap(), Some(Status::Canceled));
}
