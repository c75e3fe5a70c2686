use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use iop_wire::{Priority, SlotId};
use parking_lot::Mutex;

use crate::descriptor::RpcDescriptor;
use crate::reply::{Payload, Reply, ReplyCallback};

/// What happens when a reply for this message arrives (§3 "Message",
/// §4.6, §4.7). `ProxyMagic` is the sentinel the read pipeline recognizes
/// to route the reply through the proxy engine instead of invoking a
/// callback directly (§4.7, glossary "Proxy magic").
pub enum ReplyTarget {
    /// An ordinary caller callback.
    Callback(ReplyCallback),
    /// Route the reply back to the slot identifier that originated a
    /// proxied query.
    ProxyMagic(SlotId),
}

/// The unit of work queued for send and awaiting reply (§3 "Message", §4.2).
///
/// Owned by the slot table while in flight (invariant (iii) of §3: removal
/// from the slot table is the sole authoritative way to claim a reply).
/// Reachable from at most one of a channel's `out_queue`/`in_flight` at a
/// time (invariant (ii)).
pub struct Message {
    /// `> 0` for a query, `<= 0` for a reply, [`iop_wire::STREAM_CONTROL_CMD`]
    /// for a stream-control frame.
    pub cmd: i32,
    /// 24-bit local slot; zero means async.
    pub slot: u32,
    pub payload: Payload,
    pub header: Option<Bytes>,
    #[cfg(unix)]
    fd: Mutex<Option<std::os::fd::OwnedFd>>,
    pub is_async: bool,
    /// The caller wants the undecoded reply payload.
    pub raw: bool,
    /// Local-mode only (§3 invariant (iii)): forces a real pack instead of
    /// the zero-copy pointer handoff.
    pub force_pack: bool,
    /// Local-mode only: forces the receiver to duplicate header+value into
    /// its own scratch rather than borrow the sender's.
    pub force_dup: bool,
    pub trace: bool,
    /// Delivery priority carried in the frame header (§10.6 "Priority").
    /// Never used to reorder the outgoing queue (§5's ordering guarantee
    /// takes precedence); surfaced so a caller wiring its own event-loop
    /// fd-readiness priority can act on it.
    pub priority: Priority,
    canceled: Arc<AtomicBool>,
    reply: Mutex<Option<ReplyTarget>>,
    pub timeout_ms: Option<u64>,
    timeout_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    pub descriptor: Option<RpcDescriptor>,
    /// Caller-defined private scratch area (§3). Not pool-borrowed directly
    /// (see `iop_registry::MessagePool` docs) so a `Message` stays `'static`
    /// and freely movable across tasks; its capacity is seeded from the pool
    /// at construction time.
    pub scratch: Vec<u8>,
    finalizer: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Message {
    pub fn new(slot: u32, cmd: i32, payload: Payload, scratch_capacity: usize) -> Self {
        Self::with_scratch(slot, cmd, payload, Vec::with_capacity(scratch_capacity))
    }

    /// Like [`Message::new`], but takes an already-allocated scratch buffer
    /// instead of a bare capacity (§3 "allocated from a process-wide
    /// FIFO-style pool"): `iop-channel` calls this with a buffer checked out
    /// of `iop_registry::MessagePool` so the pool's warm allocations are
    /// actually exercised, rather than every message paying a fresh
    /// allocation regardless of the pool's existence.
    pub fn with_scratch(slot: u32, cmd: i32, payload: Payload, scratch: Vec<u8>) -> Self {
        Self {
            cmd,
            slot,
            payload,
            header: None,
            #[cfg(unix)]
            fd: Mutex::new(None),
            is_async: slot == 0,
            raw: false,
            force_pack: false,
            force_dup: false,
            trace: false,
            priority: Priority::default(),
            canceled: Arc::new(AtomicBool::new(false)),
            reply: Mutex::new(None),
            timeout_ms: None,
            timeout_task: Mutex::new(None),
            descriptor: None,
            scratch,
            finalizer: Mutex::new(None),
        }
    }

    #[cfg(unix)]
    pub fn new_fd(slot: u32, cmd: i32, payload: Payload, fd: std::os::fd::OwnedFd, scratch_capacity: usize) -> Self {
        let msg = Self::new(slot, cmd, payload, scratch_capacity);
        *msg.fd.lock() = Some(fd);
        msg
    }

    /// Stash the 64-bit originator slot identifier so a proxied reply can be
    /// routed back without the target channel ever seeing it (§4.2, §4.7).
    pub fn proxy_new(slot: u32, cmd: i32, payload: Payload, origin: SlotId, scratch_capacity: usize) -> Self {
        Self::proxy_with_scratch(slot, cmd, payload, origin, Vec::with_capacity(scratch_capacity))
    }

    /// Like [`Message::proxy_new`], but takes an already-allocated scratch
    /// buffer (§3 "allocated from a process-wide FIFO-style pool"), same as
    /// [`Message::with_scratch`].
    pub fn proxy_with_scratch(slot: u32, cmd: i32, payload: Payload, origin: SlotId, scratch: Vec<u8>) -> Self {
        let mut msg = Self::with_scratch(slot, cmd, payload, scratch);
        msg.reply = Mutex::new(Some(ReplyTarget::ProxyMagic(origin)));
        msg
    }

    pub fn set_reply_callback(&mut self, cb: ReplyCallback) {
        self.reply = Mutex::new(Some(ReplyTarget::Callback(cb)));
    }

    pub fn set_finalizer(&mut self, f: Box<dyn FnOnce() + Send>) {
        self.finalizer = Mutex::new(Some(f));
    }

    #[cfg(unix)]
    pub fn attach_fd(&self, fd: std::os::fd::OwnedFd) {
        *self.fd.lock() = Some(fd);
    }

    /// One-shot accessor (§4.5 "File-descriptor attachment"): takes the
    /// attached descriptor, resetting it to none. Unretrieved descriptors are
    /// closed when the message is dropped, since `OwnedFd` closes on drop.
    #[cfg(unix)]
    pub fn take_fd(&self) -> Option<std::os::fd::OwnedFd> {
        self.fd.lock().take()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn canceled_flag(&self) -> Arc<AtomicBool> {
        self.canceled.clone()
    }

    /// §4.2 "Cancel semantics": sets the canceled flag and, for a non-async
    /// message, immediately fires the reply callback with `Canceled`. A
    /// message already canceled is a no-op (§8 invariant 6: idempotence).
    pub fn cancel(&self) -> bool {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.disarm_timeout();
        if self.is_async {
            return false;
        }
        self.fire(Reply::status(iop_wire::Status::Canceled))
    }

    /// Attempt to deliver `reply` to whichever reply target is still
    /// present. Returns `false` if the target was already consumed (by an
    /// earlier cancel, timeout, or reply) or is a proxy sentinel — callers
    /// routing proxy replies must go through [`Message::take_proxy_origin`]
    /// instead, since that path never invokes a callback here.
    pub fn fire(&self, reply: Reply) -> bool {
        let target = self.reply.lock().take();
        match target {
            Some(ReplyTarget::Callback(cb)) => {
                cb(reply);
                true
            }
            Some(ReplyTarget::ProxyMagic(_)) => false,
            None => false,
        }
    }

    /// If this message's reply target is the proxy sentinel, take and
    /// return the stashed originator slot identifier (§4.7). Consumes the
    /// reply target exactly like [`Message::fire`] does, preserving the
    /// at-most-once guarantee across the two paths.
    pub fn take_proxy_origin(&self) -> Option<SlotId> {
        let mut guard = self.reply.lock();
        match &*guard {
            Some(ReplyTarget::ProxyMagic(origin)) => {
                let origin = *origin;
                *guard = None;
                Some(origin)
            }
            _ => None,
        }
    }

    pub fn has_pending_reply_target(&self) -> bool {
        self.reply.lock().is_some()
    }

    /// §4.2 "Timeout semantics": registers a low-resolution timer that, on
    /// expiry, cancels the message with status `TimedOut` instead of
    /// `Canceled`. Racing against a real reply or an explicit cancel is
    /// resolved by [`Message::fire`]'s at-most-once take (§9 open question ii).
    pub fn arm_timeout(self: &Arc<Self>, ms: u64) {
        let msg = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if msg.canceled.swap(true, Ordering::SeqCst) {
                return;
            }
            if !msg.is_async {
                msg.fire(Reply::status(iop_wire::Status::TimedOut));
            }
        });
        *self.timeout_task.lock() = Some(handle);
    }

    /// §4.9 "Disconnect": "aborts every in-flight message (callbacks
    /// invoked with `ABORT`)". Shares the same terminal, idempotent,
    /// at-most-once mechanics as [`Message::cancel`] but reports a distinct
    /// status so a caller can tell a channel teardown apart from an
    /// explicit cancellation.
    pub fn abort(&self) -> bool {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.disarm_timeout();
        if self.is_async {
            return false;
        }
        self.fire(Reply::status(iop_wire::Status::Abort))
    }

    pub fn disarm_timeout(&self) {
        if let Some(handle) = self.timeout_task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        self.disarm_timeout();
        if let Some(f) = self.finalizer.lock().take() {
            f();
        }
    }
}
