use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use iop_wire::Status;

/// A message's serialized payload, or — on a local channel where both
/// endpoints live in the same process — a direct pointer to the unpacked
/// value (§4.6, §9 "Local-mode zero-copy"). The latter bypasses the codec
/// entirely instead of faking a serialized frame the way the original
/// implementation's sentinel-header trick did.
#[derive(Clone)]
pub enum Payload {
    Encoded(Bytes),
    Local(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn encoded(bytes: impl Into<Bytes>) -> Self {
        Payload::Encoded(bytes.into())
    }

    pub fn local<T: Send + Sync + 'static>(value: T) -> Self {
        Payload::Local(Arc::new(value))
    }

    pub fn as_encoded(&self) -> Option<&Bytes> {
        match self {
            Payload::Encoded(b) => Some(b),
            Payload::Local(_) => None,
        }
    }

    /// Downcast a local-mode payload back to its concrete type. Returns
    /// `None` for an encoded payload or a type mismatch.
    pub fn downcast_local<T: Send + Sync + 'static>(&self) -> Option<&T> {
        match self {
            Payload::Local(v) => v.downcast_ref::<T>(),
            Payload::Encoded(_) => None,
        }
    }
}

/// What a reply carries beyond its status (§4.1): a value payload for `Ok`
/// and `Exn`, a diagnostic string for `Invalid`, or nothing for every other
/// status.
#[derive(Clone)]
pub enum ReplyBody {
    Value(Payload),
    Diagnostic(String),
    None,
}

/// The outcome delivered to a reply callback exactly once per message (§3
/// invariant (i), §5 "Cancellation semantics").
#[derive(Clone)]
pub struct Reply {
    pub status: Status,
    pub body: ReplyBody,
}

impl Reply {
    pub fn ok(payload: Payload) -> Self {
        Self { status: Status::Ok, body: ReplyBody::Value(payload) }
    }

    pub fn exn(payload: Payload) -> Self {
        Self { status: Status::Exn, body: ReplyBody::Value(payload) }
    }

    pub fn invalid(diagnostic: impl Into<String>) -> Self {
        Self { status: Status::Invalid, body: ReplyBody::Diagnostic(diagnostic.into()) }
    }

    /// A bare status with no payload (`Retry`, `Abort`, `Unimplemented`,
    /// `ServerError`, `ProxyError`, `TimedOut`, `Canceled`).
    pub fn status(status: Status) -> Self {
        debug_assert!(!status.carries_payload());
        Self { status, body: ReplyBody::None }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.body {
            ReplyBody::Value(p) => Some(p),
            _ => None,
        }
    }
}

/// A caller's reply callback. Invoked at most once per message (§3
/// invariant (iii), §5).
pub type ReplyCallback = Box<dyn FnOnce(Reply) + Send>;
