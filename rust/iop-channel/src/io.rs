//! The read and write pipelines (§4.4, §4.5): the three background tasks a
//! connected channel runs against its transport. None of this knows about
//! reconnection policy — that lives in `connect`, which spawns these loops
//! and reacts to their shared exit path, `Channel::disconnect`.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use bytes::Bytes;
use iop_codec::validate_header;
use iop_session::{Payload, Reply, ReplyBody, ReplySink};
use iop_transport::Transport;
use iop_wire::{
    FrameFlags, FrameHeader, SlotId, Status, StreamControlOp, DEFAULT_MAX_PAYLOAD_LEN, STREAM_CONTROL_CMD,
};
use tracing::{trace, warn};

use crate::channel::{Channel, ChannelPhase};
use crate::outbound::Outbound;

/// Refresh the last-activity timestamp and clear a pending idle state
/// (§4.9 "Watch-activity"): any frame counts as activity, inbound or
/// outbound.
pub(crate) fn note_activity(channel: &Channel) {
    *channel.0.last_activity.lock() = Instant::now();
    if channel.0.idle_fired.swap(false, Ordering::AcqRel) {
        channel.0.events.on_active();
    }
}

/// §4.5 "Read pipeline": pull frames off the transport until it closes or a
/// header fails validation, dispatching each to stream-control handling,
/// reply delivery, or query dispatch.
pub(crate) async fn reader_loop(channel: Channel, transport: std::sync::Arc<Transport>) {
    loop {
        let received = transport.recv_frame().await;

        #[cfg(unix)]
        let (frame, fds) = match received {
            Ok(pair) => pair,
            Err(e) => {
                trace!(id = channel.id().get(), error = %e, "read pipeline: transport closed");
                channel.disconnect();
                return;
            }
        };
        #[cfg(not(unix))]
        let frame = match received {
            Ok(frame) => frame,
            Err(e) => {
                trace!(id = channel.id().get(), error = %e, "read pipeline: transport closed");
                channel.disconnect();
                return;
            }
        };

        if let Err(e) = validate_header(&frame.header, DEFAULT_MAX_PAYLOAD_LEN) {
            warn!(id = channel.id().get(), error = %e, "read pipeline: header validation failed, disconnecting");
            channel.disconnect();
            return;
        }

        note_activity(&channel);

        if frame.header.is_stream_control() {
            handle_stream_control(&channel, &frame.header);
            continue;
        }

        if frame.header.is_reply() {
            handle_reply(&channel, &frame.header, frame.payload);
            continue;
        }

        #[cfg(unix)]
        handle_query(&channel, &frame.header, frame.payload, fds).await;
        #[cfg(not(unix))]
        handle_query(&channel, &frame.header, frame.payload).await;
    }
}

fn handle_stream_control(channel: &Channel, header: &FrameHeader) {
    match StreamControlOp::from_slot(header.slot) {
        Some(StreamControlOp::Bye) => {
            // The peer is closing gracefully (§4.9 "Graceful BYE"): stop
            // offering new work and disable our own auto-reconnect, but let
            // the actual disconnect follow the transport's own EOF so any
            // reply already in flight still has a chance to land.
            channel.set_phase(ChannelPhase::Closing);
            channel.0.config.lock().queuable = false;
        }
        Some(StreamControlOp::Nop) => {
            // Activity was already recorded by the caller; nothing else to do.
        }
        None => unreachable!("validate_header rejects unknown stream-control sub-ops"),
    }
}

fn handle_reply(channel: &Channel, header: &FrameHeader, payload: Bytes) {
    let Some(msg) = channel.0.slots.remove(header.slot) else {
        trace!(id = channel.id().get(), slot = header.slot, "read pipeline: reply for unknown slot dropped");
        return;
    };
    let status = match Status::from_cmd(header.cmd) {
        Some(status) => status,
        None => unreachable!("validate_header rejects unknown reply statuses"),
    };
    let reply = build_reply(status, payload);

    if let Some(origin) = msg.take_proxy_origin() {
        iop_session::route_proxy_reply(&channel.0.runtime.registry, origin, reply);
    } else {
        msg.fire(reply);
    }

    if channel.phase() == ChannelPhase::Closing {
        channel.maybe_finish_bye();
    }
}

fn build_reply(status: Status, payload: Bytes) -> Reply {
    match status {
        Status::Ok => Reply::ok(Payload::Encoded(payload)),
        Status::Exn => Reply::exn(Payload::Encoded(payload)),
        Status::Invalid => {
            let text = String::from_utf8_lossy(&payload).trim_end_matches('\0').to_string();
            Reply::invalid(text)
        }
        other => Reply::status(other),
    }
}

/// Before doing any further work on a large query (§3, §10.4 "On a
/// validated large message (≥10 MiB), the command itself is checked for
/// presence in the dispatch table before allocating further"), bail out on
/// an unregistered command rather than paying for header/value splitting,
/// scratch-buffer acquisition, and handler lookup that can only fail anyway.
fn reject_unroutable_large_query(channel: &Channel, header: &FrameHeader, origin: SlotId) -> bool {
    let threshold = channel.0.runtime.config().large_message_threshold;
    if header.payload_len < threshold || channel.0.dispatch.contains(header.cmd) {
        return false;
    }
    if !origin.is_async() {
        channel.send_reply(header.slot, Reply::status(Status::Unimplemented));
    }
    true
}

#[cfg(unix)]
async fn handle_query(channel: &Channel, header: &FrameHeader, payload: Bytes, fds: Vec<std::os::fd::OwnedFd>) {
    let origin = SlotId::new(channel.id(), iop_wire::Foreignness::Native, header.slot);

    if channel.phase() == ChannelPhase::Closing {
        if !origin.is_async() {
            channel.send_reply(header.slot, Reply::status(Status::Retry));
        }
        return;
    }

    if reject_unroutable_large_query(channel, header, origin) {
        return;
    }

    if let Some(fd) = fds.into_iter().next() {
        channel.0.inbound_fds.lock().insert(header.slot, fd);
    }

    let (hdr, value) = iop_session::split_header_and_value(header.flags, payload);
    Channel::dispatch_incoming_query(channel, header.cmd, hdr, Payload::Encoded(value), origin).await;
}

#[cfg(not(unix))]
async fn handle_query(channel: &Channel, header: &FrameHeader, payload: Bytes) {
    let origin = SlotId::new(channel.id(), iop_wire::Foreignness::Native, header.slot);

    if channel.phase() == ChannelPhase::Closing {
        if !origin.is_async() {
            channel.send_reply(header.slot, Reply::status(Status::Retry));
        }
        return;
    }

    if reject_unroutable_large_query(channel, header, origin) {
        return;
    }

    let (hdr, value) = iop_session::split_header_and_value(header.flags, payload);
    Channel::dispatch_incoming_query(channel, header.cmd, hdr, Payload::Encoded(value), origin).await;
}

/// §4.4 "Write pipeline": drain the outbound queue and hand each item to the
/// transport in order, skipping anything canceled in the meantime.
pub(crate) async fn writer_loop(channel: Channel, transport: std::sync::Arc<Transport>) {
    let mut rx = match channel.0.out_rx.lock().take() {
        Some(rx) => rx,
        None => return,
    };

    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Query(msg, slot) => {
                if msg.is_canceled() {
                    continue;
                }
                if !send_query(&channel, &transport, &msg, slot).await {
                    return;
                }
            }
            Outbound::Reply { slot, reply } => {
                if !send_reply_frame(&channel, &transport, slot, reply).await {
                    return;
                }
            }
            Outbound::Control(op) => {
                if !send_control(&channel, &transport, op).await {
                    return;
                }
                if op == StreamControlOp::Bye {
                    // The frame is on the wire; the reader keeps running to
                    // collect replies for whatever was still in flight.
                    channel.0.bye_sent.store(true, Ordering::Release);
                    channel.maybe_finish_bye();
                    return;
                }
            }
            Outbound::Flush(tx) => {
                let _ = tx.send(());
            }
        }
    }
}

async fn send_query(channel: &Channel, transport: &Transport, msg: &iop_session::Message, slot: u32) -> bool {
    let value = msg.payload.as_encoded().cloned().unwrap_or_default();
    let (mut flags, payload) = iop_session::join_header_and_value(msg.header.as_ref(), &value);

    #[cfg(unix)]
    let fds = {
        let mut fds = Vec::new();
        if let Some(fd) = msg.take_fd() {
            flags |= FrameFlags::HAS_FD;
            fds.push(fd);
        }
        fds
    };
    if msg.trace {
        flags |= FrameFlags::IS_TRACED;
    }

    let mut header = FrameHeader::new(slot, msg.cmd, payload.len() as u32);
    header.flags = flags;
    header.priority = msg.priority;
    trace!(id = channel.id().get(), slot, cmd = msg.cmd, traced = msg.trace, "write pipeline: query");

    let frame = iop_transport::Frame::new(header, payload);
    #[cfg(unix)]
    let result = transport.send_frame(frame, fds).await;
    #[cfg(not(unix))]
    let result = transport.send_frame(frame).await;

    send_result(channel, result)
}

async fn send_reply_frame(channel: &Channel, transport: &Transport, slot: u32, reply: Reply) -> bool {
    let (payload, cmd) = encode_reply(&reply);
    let mut header = FrameHeader::new(slot, cmd, payload.len() as u32);
    header.priority = channel.0.config.lock().priority;

    let frame = iop_transport::Frame::new(header, payload);
    #[cfg(unix)]
    let result = transport.send_frame(frame, Vec::new()).await;
    #[cfg(not(unix))]
    let result = transport.send_frame(frame).await;

    send_result(channel, result)
}

fn encode_reply(reply: &Reply) -> (Bytes, i32) {
    let cmd = reply.status.to_cmd();
    let payload = match &reply.body {
        ReplyBody::Value(p) => p.as_encoded().cloned().unwrap_or_default(),
        ReplyBody::Diagnostic(text) => {
            let mut bytes = Vec::with_capacity(text.len() + 1);
            bytes.extend_from_slice(text.as_bytes());
            bytes.push(0);
            Bytes::from(bytes)
        }
        ReplyBody::None => Bytes::new(),
    };
    (payload, cmd)
}

async fn send_control(channel: &Channel, transport: &Transport, op: StreamControlOp) -> bool {
    let mut header = FrameHeader::new(op.as_slot(), STREAM_CONTROL_CMD, 0);
    header.priority = channel.0.config.lock().priority;
    let frame = iop_transport::Frame::new(header, Bytes::new());
    #[cfg(unix)]
    let result = transport.send_frame(frame, Vec::new()).await;
    #[cfg(not(unix))]
    let result = transport.send_frame(frame).await;

    send_result(channel, result)
}

fn send_result(channel: &Channel, result: Result<(), iop_transport::TransportError>) -> bool {
    if let Err(e) = result {
        warn!(id = channel.id().get(), error = %e, "write pipeline: send failed, disconnecting");
        channel.disconnect();
        return false;
    }
    true
}

/// §4.9 "Watch-activity": a periodic tick that fires idle/active transitions
/// off the last-observed-activity timestamp, disconnects on a hard timeout,
/// and sends a keepalive `NOP` every third of the smaller configured
/// duration so the peer's own watch-activity timer never starves.
pub(crate) async fn watcher_loop(channel: Channel, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        ticker.tick().await;
        if channel.phase() != ChannelPhase::Connected {
            return;
        }

        let (soft, hard) = {
            let cfg = channel.0.config.lock();
            (cfg.watch_activity.soft, cfg.watch_activity.hard)
        };
        let elapsed = channel.0.last_activity.lock().elapsed();

        if let Some(hard) = hard {
            if elapsed >= hard {
                warn!(id = channel.id().get(), "watch-activity: hard timeout elapsed, disconnecting");
                channel.disconnect();
                return;
            }
        }

        if let Some(soft) = soft {
            if elapsed >= soft && !channel.0.idle_fired.swap(true, Ordering::AcqRel) {
                channel.0.events.on_idle();
            }
        }

        let _ = channel.send_nop();
    }
}
