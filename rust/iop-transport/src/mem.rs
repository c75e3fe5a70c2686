use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::{Frame, TransportError, TransportBackend};

#[cfg(unix)]
use crate::OwnedFd;

/// Channel capacity of the in-process queue backing each direction of a
/// [`MemTransport`] pair. Local mode has no network to apply backpressure
/// for, but an unbounded channel would let a runaway writer grow memory
/// without limit, so a generous bound is kept anyway.
const QUEUE_CAPACITY: usize = 256;

/// In-process transport for local mode (§4.6): two channel endpoints in the
/// same process, connected by a pair of `tokio::sync::mpsc` queues instead
/// of a socket. `iop-session`'s `Payload::Local` variant is what actually
/// makes local mode zero-copy; this backend just avoids a loopback socket.
#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<Inner>,
}

struct Inner {
    tx: mpsc::Sender<Frame>,
    rx: AsyncMutex<mpsc::Receiver<Frame>>,
    closed: AtomicBool,
}

impl MemTransport {
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(QUEUE_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(QUEUE_CAPACITY);

        let a = Self { inner: Arc::new(Inner { tx: tx_b, rx: AsyncMutex::new(rx_a), closed: AtomicBool::new(false) }) };
        let b = Self { inner: Arc::new(Inner { tx: tx_a, rx: AsyncMutex::new(rx_b), closed: AtomicBool::new(false) }) };
        (a, b)
    }
}

impl TransportBackend for MemTransport {
    #[cfg(unix)]
    async fn send_frame(&self, frame: Frame, fds: Vec<OwnedFd>) -> Result<(), TransportError> {
        if !fds.is_empty() {
            return Err(TransportError::FdPassingUnsupported);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.inner.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    #[cfg(not(unix))]
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.inner.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    #[cfg(unix)]
    async fn recv_frame(&self) -> Result<(Frame, Vec<OwnedFd>), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        let frame = rx.recv().await.ok_or(TransportError::Closed)?;
        Ok((frame, Vec::new()))
    }

    #[cfg(not(unix))]
    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iop_wire::FrameHeader;

    #[tokio::test(flavor = "current_thread")]
    async fn frames_roundtrip_in_fifo_order() {
        let (a, b) = MemTransport::pair();
        a.send_frame(Frame::new(FrameHeader::new(1, 1, 0), bytes::Bytes::new()), Vec::new()).await.unwrap();
        a.send_frame(Frame::new(FrameHeader::new(2, 1, 0), bytes::Bytes::new()), Vec::new()).await.unwrap();
        let (first, _) = b.recv_frame().await.unwrap();
        let (second, _) = b.recv_frame().await.unwrap();
        assert_eq!(first.header.slot, 1);
        assert_eq!(second.header.slot, 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn closing_rejects_further_sends() {
        let (a, _b) = MemTransport::pair();
        a.close();
        let err = a.send_frame(Frame::new(FrameHeader::new(1, 1, 0), bytes::Bytes::new()), Vec::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dropping_the_peer_closes_recv() {
        let (a, b) = MemTransport::pair();
        drop(a);
        let err = b.recv_frame().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
