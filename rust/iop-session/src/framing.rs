use bytes::{Buf, BufMut, Bytes, BytesMut};
use iop_wire::FrameFlags;

/// Join an optional header with a value into the single payload blob a
/// query frame carries on the wire (§4.1: "header bytes followed by value
/// bytes when `HAS_HDR` is set"). The header is length-prefixed so the
/// receiving side can split it back out without needing the schema
/// descriptor that would otherwise tell it where the header ends — the
/// core never packs/unpacks schema types itself (§1, §6).
pub fn join_header_and_value(header: Option<&Bytes>, value: &Bytes) -> (FrameFlags, Bytes) {
    match header {
        None => (FrameFlags::empty(), value.clone()),
        Some(header) => {
            let mut buf = BytesMut::with_capacity(4 + header.len() + value.len());
            buf.put_u32_le(header.len() as u32);
            buf.extend_from_slice(header);
            buf.extend_from_slice(value);
            (FrameFlags::HAS_HDR, buf.freeze())
        }
    }
}

/// Inverse of [`join_header_and_value`]: split a received query payload
/// back into its optional header and its value, guided by whether `HAS_HDR`
/// was set on the frame header.
pub fn split_header_and_value(flags: FrameFlags, payload: Bytes) -> (Option<Bytes>, Bytes) {
    if !flags.contains(FrameFlags::HAS_HDR) {
        return (None, payload);
    }
    let mut buf = payload;
    if buf.len() < 4 {
        return (None, buf);
    }
    let header_len = buf.get_u32_le() as usize;
    if header_len > buf.len() {
        return (None, buf);
    }
    let header = buf.split_to(header_len);
    (Some(header), buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_header_and_value() {
        let header = Bytes::from_static(b"hdr");
        let value = Bytes::from_static(b"value-bytes");
        let (flags, joined) = join_header_and_value(Some(&header), &value);
        assert!(flags.contains(FrameFlags::HAS_HDR));
        let (split_header, split_value) = split_header_and_value(flags, joined);
        assert_eq!(split_header.as_deref(), Some(header.as_ref()));
        assert_eq!(split_value, value);
    }

    #[test]
    fn no_header_passes_the_value_through_unchanged() {
        let value = Bytes::from_static(b"value-only");
        let (flags, joined) = join_header_and_value(None, &value);
        assert_eq!(flags, FrameFlags::empty());
        assert_eq!(joined, value);
        let (header, split_value) = split_header_and_value(flags, joined);
        assert!(header.is_none());
        assert_eq!(split_value, value);
    }
}
