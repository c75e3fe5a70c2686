use iop_wire::{FrameFlags, FrameHeader, Status, StreamControlOp};

use crate::error::DecodeError;

/// Structural, header-only validation of a received frame (§4.1).
///
/// This only rejects frames that are malformed independent of the channel's
/// runtime state (an unknown reply status, for instance, can never be made
/// valid by waiting). Rejection here is always fatal to the channel (§7).
///
/// Runtime-dependent checks — "is this command in the dispatch table", "is
/// this slot still in the slot table" — are *not* header errors: per §4.5 and
/// §7 they are routing outcomes (`UNIMPLEMENTED` reply, silent drop) handled
/// by the read pipeline in `iop-session`, not failures of the header itself.
pub fn validate_header(header: &FrameHeader, max_payload_len: u32) -> Result<(), DecodeError> {
    if header.payload_len > max_payload_len {
        return Err(DecodeError::PayloadTooLarge { len: header.payload_len, max: max_payload_len });
    }

    let unknown_bits = header.raw_flag_bits() & !FrameFlags::KNOWN.bits();
    if unknown_bits != 0 {
        return Err(DecodeError::UnknownFlags { bits: unknown_bits });
    }

    if header.is_stream_control() {
        if header.payload_len != 0 {
            return Err(DecodeError::MalformedStreamControl { payload_len: header.payload_len });
        }
        if StreamControlOp::from_slot(header.slot).is_none() {
            return Err(DecodeError::UnknownStreamControlOp { slot: header.slot });
        }
        return Ok(());
    }

    if header.is_reply() {
        let status = Status::from_cmd(header.cmd).ok_or(DecodeError::UnknownStatus { cmd: header.cmd })?;
        if !status.carries_payload() && header.payload_len != 0 {
            return Err(DecodeError::UnexpectedReplyPayload { payload_len: header.payload_len });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use iop_wire::STREAM_CONTROL_CMD;

    use super::*;

    #[test]
    fn rejects_payload_above_max() {
        let h = FrameHeader::new(1, 5, 100);
        assert_eq!(
            validate_header(&h, 50),
            Err(DecodeError::PayloadTooLarge { len: 100, max: 50 })
        );
    }

    #[test]
    fn rejects_unknown_flag_bits() {
        let mut h = FrameHeader::new(1, 5, 0);
        h.flags = FrameFlags::from_bits_retain(1 << 30);
        assert!(matches!(validate_header(&h, 1_000), Err(DecodeError::UnknownFlags { .. })));
    }

    #[test]
    fn accepts_plain_query() {
        let h = FrameHeader::new(1, 5, 16);
        assert_eq!(validate_header(&h, 1_000), Ok(()));
    }

    #[test]
    fn rejects_stream_control_with_payload() {
        let mut h = FrameHeader::new(1, STREAM_CONTROL_CMD, 0);
        h.payload_len = 4;
        assert!(matches!(validate_header(&h, 1_000), Err(DecodeError::MalformedStreamControl { .. })));
    }

    #[test]
    fn rejects_unknown_stream_control_sub_op() {
        let h = FrameHeader::new(99, STREAM_CONTROL_CMD, 0);
        assert!(matches!(validate_header(&h, 1_000), Err(DecodeError::UnknownStreamControlOp { .. })));
    }

    #[test]
    fn accepts_bye_and_nop() {
        let bye = FrameHeader::new(1, STREAM_CONTROL_CMD, 0);
        let nop = FrameHeader::new(2, STREAM_CONTROL_CMD, 0);
        assert_eq!(validate_header(&bye, 1_000), Ok(()));
        assert_eq!(validate_header(&nop, 1_000), Ok(()));
    }

    #[test]
    fn rejects_unknown_reply_status() {
        let h = FrameHeader::new(1, -123, 0);
        assert!(matches!(validate_header(&h, 1_000), Err(DecodeError::UnknownStatus { .. })));
    }

    #[test]
    fn rejects_payload_on_status_that_forbids_it() {
        let h = FrameHeader::new(1, Status::Canceled.to_cmd(), 8);
        assert!(matches!(validate_header(&h, 1_000), Err(DecodeError::UnexpectedReplyPayload { .. })));
    }

    #[test]
    fn accepts_payload_on_ok_and_exn_and_invalid() {
        for status in [Status::Ok, Status::Exn, Status::Invalid] {
            let h = FrameHeader::new(1, status.to_cmd(), 8);
            assert_eq!(validate_header(&h, 1_000), Ok(()));
        }
    }
}
