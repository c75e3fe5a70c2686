use bytes::{Bytes, BytesMut};
use iop_wire::{FrameHeader, HEADER_LEN};

/// A decoded header paired with its payload bytes. The payload's internal
/// structure (header bytes + value bytes, or bare value bytes) is a concern
/// of `iop-session`, which knows whether `HAS_HDR` is set and how to split it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Encode header + payload as one contiguous buffer. This never fails on
    /// size: the 64 KiB per-syscall cap (§4.1, §4.4) bounds a single write,
    /// not a frame, so a transport that can issue more than one write for a
    /// frame (the stream backend) slices this buffer into capped chunks
    /// itself; a transport that cannot (one datagram per frame) rejects an
    /// oversized result on its own.
    pub fn encode(&self) -> BytesMut {
        let total = HEADER_LEN + self.payload.len();
        let mut out = BytesMut::with_capacity(total);
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a header from its fixed 12 bytes; the caller is responsible
    /// for then reading `header.payload_len` more bytes to complete the frame.
    pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> FrameHeader {
        FrameHeader::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_header_and_payload_contiguously() {
        let header = FrameHeader::new(3, 7, 5);
        let frame = Frame::new(header, Bytes::from_static(b"hello"));
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 5);
        assert_eq!(&bytes[HEADER_LEN..], b"hello");
        let decoded = Frame::decode_header(bytes[..HEADER_LEN].try_into().unwrap());
        assert_eq!(decoded, header);
    }

    #[test]
    fn encodes_a_payload_larger_than_one_syscall_without_error() {
        let len = iop_wire::MAX_FRAME_LEN * 3;
        let header = FrameHeader::new(1, 1, len as u32);
        let payload = vec![0u8; len];
        let frame = Frame::new(header, Bytes::from(payload));
        let bytes = frame.encode();
        assert_eq!(bytes.len(), HEADER_LEN + len);
    }
}
