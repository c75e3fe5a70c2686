use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, Bytes, BytesMut};
use iop_wire::{FrameHeader, DEFAULT_MAX_PAYLOAD_LEN, HEADER_LEN, MAX_FRAME_LEN};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;

use crate::{Frame, TransportBackend, TransportError};

#[cfg(unix)]
use crate::OwnedFd;

/// Transport over any ordered byte stream (§4.1, §4.4): the writer slices
/// each queued frame into chunks no larger than [`MAX_FRAME_LEN`] and issues
/// one `write_all` per chunk (the portable stand-in for the header's
/// described per-syscall `writev` cap, since a generic `AsyncWrite` has no
/// portable vectored-write entry point — a frame above the cap is written
/// across several calls instead of being rejected), and the reader
/// reassembles frames out of however the bytes happened to arrive.
/// File-descriptor passing is not representable on a plain byte stream, so
/// any attempt to send one is rejected before it reaches the socket (§6).
pub struct StreamTransport<S> {
    writer: AsyncMutex<WriteHalf<S>>,
    reader: AsyncMutex<ReadState<S>>,
    closed: AtomicBool,
}

struct ReadState<S> {
    io: ReadHalf<S>,
    buf: BytesMut,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = split(stream);
        Self {
            writer: AsyncMutex::new(write_half),
            reader: AsyncMutex::new(ReadState { io: read_half, buf: BytesMut::with_capacity(HEADER_LEN * 4) }),
            closed: AtomicBool::new(false),
        }
    }

    fn check_closed(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Writes `frame` across one or more `write_all` calls, each carrying at
    /// most [`MAX_FRAME_LEN`] bytes (§4.1 "IO vector is sliced to stay at
    /// this bound", §4.4 "Per-syscall bytes are capped at 64 KiB"). Unlike
    /// the datagram backend, a stream has no message-boundary constraint, so
    /// a frame above the cap is simply split rather than rejected.
    async fn write_one(&self, frame: Frame) -> Result<(), TransportError> {
        self.check_closed()?;
        let encoded = frame.encode();
        let mut writer = self.writer.lock().await;
        for chunk in encoded.chunks(MAX_FRAME_LEN) {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn read_exact_into(buf: &mut BytesMut, io: &mut ReadHalf<S>, want: usize) -> Result<(), TransportError> {
        while buf.len() < want {
            let mut chunk = [0u8; 8192];
            let n = io.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    async fn read_one(&self) -> Result<Frame, TransportError> {
        self.check_closed()?;
        let mut state = self.reader.lock().await;
        let ReadState { io, buf } = &mut *state;

        Self::read_exact_into(buf, io, HEADER_LEN).await?;
        let header_bytes: [u8; HEADER_LEN] = buf[..HEADER_LEN].try_into().unwrap();
        let header = FrameHeader::from_bytes(&header_bytes);

        if header.flags.contains(iop_wire::FrameFlags::HAS_FD) {
            return Err(TransportError::FdPassingUnsupported);
        }
        if header.payload_len > DEFAULT_MAX_PAYLOAD_LEN {
            return Err(TransportError::FrameTooLarge { len: header.payload_len, max: DEFAULT_MAX_PAYLOAD_LEN });
        }

        let total = HEADER_LEN + header.payload_len as usize;
        Self::read_exact_into(buf, io, total).await?;

        let payload = Bytes::copy_from_slice(&buf[HEADER_LEN..total]);
        buf.advance(total);
        Ok(Frame::new(header, payload))
    }
}

impl<S> TransportBackend for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[cfg(unix)]
    async fn send_frame(&self, frame: Frame, fds: Vec<OwnedFd>) -> Result<(), TransportError> {
        if !fds.is_empty() {
            return Err(TransportError::FdPassingUnsupported);
        }
        self.write_one(frame).await
    }

    #[cfg(not(unix))]
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.write_one(frame).await
    }

    #[cfg(unix)]
    async fn recv_frame(&self) -> Result<(Frame, Vec<OwnedFd>), TransportError> {
        self.read_one().await.map(|frame| (frame, Vec::new()))
    }

    #[cfg(not(unix))]
    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        self.read_one().await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iop_wire::FrameHeader;

    #[tokio::test(flavor = "current_thread")]
    async fn roundtrips_a_frame_over_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(4096);
        let ta = StreamTransport::new(a);
        let tb = StreamTransport::new(b);

        let frame = Frame::new(FrameHeader::new(9, 3, 5), Bytes::from_static(b"hello"));
        ta.send_frame(frame.clone(), Vec::new()).await.unwrap();
        let (received, fds) = tb.recv_frame().await.unwrap();
        assert!(fds.is_empty());
        assert_eq!(received.header, frame.header);
        assert_eq!(received.payload, frame.payload);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejects_fd_carrying_header() {
        let (a, b) = tokio::io::duplex(4096);
        let ta = StreamTransport::new(a);
        let tb = StreamTransport::new(b);

        let mut header = FrameHeader::new(9, 3, 0);
        header.flags |= iop_wire::FrameFlags::HAS_FD;
        let encoded = Frame::new(header, Bytes::new()).encode();
        ta.writer.lock().await.write_all(&encoded).await.unwrap();
        let err = tb.recv_frame().await.unwrap_err();
        assert!(matches!(err, TransportError::FdPassingUnsupported));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn writes_a_frame_above_the_per_syscall_cap_in_multiple_chunks() {
        let payload_len = MAX_FRAME_LEN * 2 + 100;
        let (a, b) = tokio::io::duplex(HEADER_LEN + payload_len + 1024);
        let ta = StreamTransport::new(a);
        let tb = StreamTransport::new(b);

        let payload = Bytes::from(vec![7u8; payload_len]);
        let frame = Frame::new(FrameHeader::new(1, 1, payload_len as u32), payload.clone());
        ta.send_frame(frame, Vec::new()).await.unwrap();

        let (received, _) = tb.recv_frame().await.unwrap();
        assert_eq!(received.payload.len(), payload_len);
        assert_eq!(received.payload, payload);
    }
}
