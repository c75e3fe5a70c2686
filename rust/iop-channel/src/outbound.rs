use std::sync::Arc;

use iop_session::{Message, Reply};
use iop_wire::StreamControlOp;
use tokio::sync::oneshot;

/// One item on a channel's single outbound queue (§4.4, §5). The writer
/// task drains this strictly in FIFO order: `Priority` is carried on every
/// frame (§10.6) but never used to reorder the queue itself, matching §5's
/// ordering guarantee ("messages sent on one channel arrive in the order
/// they were sent").
pub enum Outbound {
    /// An outgoing query. Skipped without being sent if already canceled by
    /// the time the writer reaches it (§4.4 "Write pipeline").
    Query(Arc<Message>, u32),
    /// A reply to an incoming query this channel received.
    Reply { slot: u32, reply: Reply },
    /// A stream-control frame (`BYE`/`NOP`).
    Control(StreamControlOp),
    /// A barrier: resolved once every item queued before it has been handed
    /// to the transport (§10.6 "flush").
    Flush(oneshot::Sender<()>),
}
