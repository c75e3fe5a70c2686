//! Graceful BYE over a real TCP loopback connection (§4.9 "Graceful BYE",
//! §8 scenario 6): three queries are in flight when `bye` is called; no new
//! query is accepted afterward; all three replies still arrive; only then
//! does `DISCONNECTED` fire and auto-reconnect stay off.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use iop_channel::prelude::*;
use iop_channel::Channel;
use iop_session::NormalHandler;
use tokio::net::{TcpListener, TcpStream};

struct CountingEvents {
    connected: AtomicUsize,
    disconnected: AtomicUsize,
}

impl CountingEvents {
    fn new() -> Arc<Self> {
        Arc::new(Self { connected: AtomicUsize::new(0), disconnected: AtomicUsize::new(0) })
    }
}

impl ChannelEvents for CountingEvents {
    fn on_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }
    fn on_disconnected(&self) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (server, _) = listener.accept().await.unwrap();
    (client.await.unwrap(), server)
}

#[tokio::test(flavor = "multi_thread")]
async fn three_in_flight_replies_arrive_before_disconnected_fires() {
    const FIXTURE_CMD: i32 = 42;

    let server_table = DispatchTable::new();
    let replies_sent = Arc::new(AtomicU32::new(0));
    {
        let replies_sent = replies_sent.clone();
        let handler: NormalHandler = Arc::new(move |sink, slot, _hdr, payload| {
            let replies_sent = replies_sent.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if !slot.is_async() {
                    sink.send_reply(slot.slot(), Reply::ok(payload));
                    replies_sent.fetch_add(1, Ordering::SeqCst);
                }
            })
        });
        server_table.register(FIXTURE_CMD, DispatchEntry::normal(RpcDescriptor::new(FIXTURE_CMD, "Slow"), handler));
    }

    let server_runtime = Arc::new(Runtime::new(RuntimeConfig::default()));
    let client_runtime = Arc::new(Runtime::new(RuntimeConfig::default()));

    let client_events = CountingEvents::new();
    let client = Channel::init_with_events(
        client_runtime,
        Arc::new(DispatchTable::new()),
        ChannelConfig::default(),
        client_events.clone(),
    )
    .unwrap();
    let server =
        Channel::init(server_runtime, Arc::new(server_table), ChannelConfig::default()).unwrap();

    let (client_stream, server_stream) = tcp_pair().await;
    client.spawn_stream(client_stream).await.unwrap();
    server.spawn_stream(server_stream).await.unwrap();

    assert_eq!(client_events.connected.load(Ordering::SeqCst), 1);

    let reply_count = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        let reply_count = reply_count.clone();
        handles.push(tokio::spawn(async move {
            let reply = client.query(FIXTURE_CMD, None, Payload::encoded(Bytes::new())).await.unwrap();
            assert_eq!(reply.status, Status::Ok);
            reply_count.fetch_add(1, Ordering::SeqCst);
        }));
    }

    // Give the three queries a moment to actually land on the wire before
    // calling bye, so they are genuinely "in flight" rather than raced
    // against connection setup.
    tokio::time::sleep(Duration::from_millis(5)).await;
    client.bye().unwrap();

    // A query issued after bye must be rejected locally, never reaching the
    // wire (§3 "queuable flag").
    let rejected = client.query(FIXTURE_CMD, None, Payload::encoded(Bytes::new())).await;
    assert!(matches!(rejected, Err(ChannelError::NotConnected)));

    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(reply_count.load(Ordering::SeqCst), 3);
    assert_eq!(replies_sent.load(Ordering::SeqCst), 3);

    // DISCONNECTED only fires once the in-flight replies have landed; give
    // the client's reader a moment to observe the resulting EOF/teardown.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client_events.disconnected.load(Ordering::SeqCst), 1);
    assert!(!client.is_connected());

    // BYE is a definitive signal: no reconnect attempt follows.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!client.is_connected());
}
