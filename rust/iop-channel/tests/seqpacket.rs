//! The seqpacket backend over a real `AF_UNIX SOCK_SEQPACKET` socket pair
//! (§4.1, §6, §10.5: "a separate tests/ directory in iop-channel covers the
//! seqpacket backend against a real AF_UNIX socket pair"), exercised through
//! `Channel::spawn_seqpacket` rather than `iop_transport::SeqpacketTransport`
//! directly, so the credential capture and dispatch paths are covered too.

#![cfg(unix)]

use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use bytes::Bytes;
use iop_channel::prelude::*;
use iop_channel::Channel;
use iop_testkit::echo_dispatch_table;

fn socketpair() -> (OwnedFd, OwnedFd) {
    let mut fds = [0 as libc::c_int; 2];
    let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0, fds.as_mut_ptr()) };
    assert_eq!(ret, 0, "socketpair() failed: {}", std::io::Error::last_os_error());
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

#[tokio::test(flavor = "multi_thread")]
async fn query_round_trips_over_a_real_seqpacket_socket_pair() {
    let (client_fd, server_fd) = socketpair();

    let client_runtime = Arc::new(Runtime::new(RuntimeConfig::default()));
    let server_runtime = Arc::new(Runtime::new(RuntimeConfig::default()));

    let client = Channel::init(client_runtime, Arc::new(DispatchTable::new()), ChannelConfig::default()).unwrap();
    let server = Channel::init(server_runtime, echo_dispatch_table(), ChannelConfig::default()).unwrap();

    client.spawn_seqpacket(client_fd, None).await.unwrap();
    server.spawn_seqpacket(server_fd, None).await.unwrap();

    assert!(client.is_connected());
    assert!(server.is_connected());
    assert!(client.peer_credentials().is_some(), "SO_PEERCRED must be captured on spawn");

    let reply = client
        .query(iop_testkit::FIXTURE_CMD, None, Payload::encoded(Bytes::from_static(b"over seqpacket")))
        .await
        .unwrap();

    assert_eq!(reply.status, Status::Ok);
    assert_eq!(reply.payload().and_then(|p| p.as_encoded().cloned()), Some(Bytes::from_static(b"over seqpacket")));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_credentials_prevent_the_channel_from_connecting() {
    let (client_fd, server_fd) = socketpair();

    let client_runtime = Arc::new(Runtime::new(RuntimeConfig::default()));
    let server_runtime = Arc::new(Runtime::new(RuntimeConfig::default()));

    let client = Channel::init(client_runtime, Arc::new(DispatchTable::new()), ChannelConfig::default()).unwrap();
    let server = Channel::init(server_runtime, Arc::new(DispatchTable::new()), ChannelConfig::default()).unwrap();

    client.spawn_seqpacket(client_fd, None).await.unwrap();
    let result = server.spawn_seqpacket(server_fd, Some(Arc::new(|_creds: &iop_channel::PeerCredentials| false))).await;

    assert!(matches!(result, Err(ChannelError::CredentialsRejected)));
    assert!(!server.is_connected());
}
