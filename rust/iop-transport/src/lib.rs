#![forbid(unsafe_op_in_unsafe_fn)]

//! Wire-level transport backends for the IOP-RPC channel (§4.1, §4.4, §6,
//! §10.6): an in-process backend for local mode, a backend over any
//! `AsyncRead + AsyncWrite` stream, and an `AF_UNIX SOCK_SEQPACKET` backend
//! carrying file descriptors via `SCM_RIGHTS`. `iop-channel` drives one of
//! these per connected channel; none of them know about slots, dispatch, or
//! replies — that's `iop-session`'s job.
//!
//! File-descriptor passing (and therefore the seqpacket backend) is
//! Unix-only, matching the `SCM_RIGHTS`/`SO_PEERCRED` machinery it rests on.

mod error;
mod mem;
mod stream;

#[cfg(unix)]
mod seqpacket;

pub use error::TransportError;
pub use iop_codec::Frame;
pub use mem::MemTransport;
pub use stream::StreamTransport;

#[cfg(unix)]
pub use seqpacket::{PeerCredentials, SeqpacketTransport};

/// A file descriptor owned by this process, ready to hand off via
/// `SCM_RIGHTS`. Only populated on the seqpacket backend; every other
/// backend always produces an empty `Vec` and rejects a non-empty one.
#[cfg(unix)]
pub type OwnedFd = std::os::fd::OwnedFd;

/// Anything that can carry framed bytes in both directions: a TCP socket, a
/// Unix stream socket, an in-memory duplex pipe in tests, or anything else a
/// caller hands [`StreamTransport`]. `Transport::Stream` boxes one of these
/// as a trait object so the enum itself stays non-generic.
pub trait StreamIo: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

impl<T> StreamIo for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

/// A boxed, type-erased stream. `StreamTransport<BoxedStream>` is what
/// backs `Transport::Stream`.
pub type BoxedStream = Box<dyn StreamIo>;

/// One backend's contract (§4.1): move frames, optionally carrying file
/// descriptors, across whatever medium connects the two channel endpoints.
pub trait TransportBackend: Send + Sync {
    /// Send `frame`, handing off `fds` alongside it. Backends that cannot
    /// carry descriptors (everything but seqpacket) reject a non-empty
    /// `fds` with [`TransportError::FdPassingUnsupported`].
    #[cfg(unix)]
    fn send_frame(
        &self,
        frame: Frame,
        fds: Vec<OwnedFd>,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    #[cfg(not(unix))]
    fn send_frame(&self, frame: Frame) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next frame, along with any descriptors that arrived
    /// alongside it.
    #[cfg(unix)]
    fn recv_frame(&self) -> impl std::future::Future<Output = Result<(Frame, Vec<OwnedFd>), TransportError>> + Send;

    #[cfg(not(unix))]
    fn recv_frame(&self) -> impl std::future::Future<Output = Result<Frame, TransportError>> + Send;

    /// Mark the transport closed. Idempotent; does not itself wake pending
    /// `recv_frame` callers on every backend (stream/seqpacket backends rely
    /// on the underlying socket shutting down to do that).
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// The three transport shapes a channel can be built on (§4.6, §10.1),
/// dispatched by hand rather than through a trait object: `send_frame`/
/// `recv_frame` are `async fn`s in [`TransportBackend`], which are not
/// object-safe, so `Channel` holds this enum instead of `Arc<dyn
/// TransportBackend>`.
pub enum Transport {
    Mem(MemTransport),
    Stream(StreamTransport<BoxedStream>),
    #[cfg(unix)]
    Seqpacket(SeqpacketTransport),
}

impl Transport {
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = MemTransport::pair();
        (Transport::Mem(a), Transport::Mem(b))
    }

    /// Wrap any `AsyncRead + AsyncWrite` stream as a boxed stream transport.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        Transport::Stream(StreamTransport::new(Box::new(stream)))
    }

    #[cfg(unix)]
    pub async fn send_frame(&self, frame: Frame, fds: Vec<OwnedFd>) -> Result<(), TransportError> {
        match self {
            Transport::Mem(t) => {
                if !fds.is_empty() {
                    return Err(TransportError::FdPassingUnsupported);
                }
                t.send_frame(frame, fds).await
            }
            Transport::Stream(t) => {
                if !fds.is_empty() {
                    return Err(TransportError::FdPassingUnsupported);
                }
                t.send_frame(frame, fds).await
            }
            Transport::Seqpacket(t) => t.send_frame(frame, fds).await,
        }
    }

    #[cfg(not(unix))]
    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        match self {
            Transport::Mem(t) => t.send_frame(frame).await,
            Transport::Stream(t) => t.send_frame(frame).await,
        }
    }

    #[cfg(unix)]
    pub async fn recv_frame(&self) -> Result<(Frame, Vec<OwnedFd>), TransportError> {
        match self {
            Transport::Mem(t) => t.recv_frame().await,
            Transport::Stream(t) => t.recv_frame().await,
            Transport::Seqpacket(t) => t.recv_frame().await,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        match self {
            Transport::Mem(t) => t.recv_frame().await,
            Transport::Stream(t) => t.recv_frame().await,
        }
    }

    pub fn close(&self) {
        match self {
            Transport::Mem(t) => t.close(),
            Transport::Stream(t) => t.close(),
            #[cfg(unix)]
            Transport::Seqpacket(t) => t.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Transport::Mem(t) => t.is_closed(),
            Transport::Stream(t) => t.is_closed(),
            #[cfg(unix)]
            Transport::Seqpacket(t) => t.is_closed(),
        }
    }
}
