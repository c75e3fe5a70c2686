/// Status codes delivered through a reply callback (§3, §7).
///
/// These are not [`std::error::Error`] values: a non-`Ok` status is the
/// protocol answering "no" (unimplemented, retry, timed out, ...), which is
/// a first-class outcome the caller must handle, not an exceptional failure
/// of the transport. Transport-level failures are reported separately as
/// `TransportError`/`ChannelError` (see `iop-transport`, `iop-channel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The query completed successfully; the payload is the result value.
    Ok,
    /// The handler threw a schema-described exception; the payload is the
    /// exception value.
    Exn,
    /// The channel was closing when the query arrived; retry elsewhere.
    Retry,
    /// The slot table was exhausted, or the operation could not proceed.
    Abort,
    /// The header or payload failed validation; the payload is a diagnostic string.
    Invalid,
    /// No dispatch entry exists for the command.
    Unimplemented,
    /// The handler failed in a way it chose to surface as a generic server error.
    ServerError,
    /// A proxy target was unreachable or rejected the forwarded query.
    ProxyError,
    /// The message's timeout elapsed before a reply arrived.
    TimedOut,
    /// The message was canceled before a reply was observed.
    Canceled,
}

impl Status {
    /// Encode as the signed command code of a reply frame: `Ok` and `Exn`
    /// have dedicated small values (so their payload framing, §4.1, is
    /// unambiguous), the rest share the general non-OK encoding.
    pub const fn to_cmd(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Exn => -1,
            Status::Retry => -2,
            Status::Abort => -3,
            Status::Invalid => -4,
            Status::Unimplemented => -5,
            Status::ServerError => -6,
            Status::ProxyError => -7,
            Status::TimedOut => -8,
            Status::Canceled => -9,
        }
    }

    pub const fn from_cmd(cmd: i32) -> Option<Self> {
        Some(match cmd {
            0 => Status::Ok,
            -1 => Status::Exn,
            -2 => Status::Retry,
            -3 => Status::Abort,
            -4 => Status::Invalid,
            -5 => Status::Unimplemented,
            -6 => Status::ServerError,
            -7 => Status::ProxyError,
            -8 => Status::TimedOut,
            -9 => Status::Canceled,
            _ => return None,
        })
    }

    /// Whether a reply carrying this status is permitted to have a non-empty
    /// payload (§4.1: only `Ok`, `Exn`, and `Invalid`'s diagnostic string do).
    pub const fn carries_payload(self) -> bool {
        matches!(self, Status::Ok | Status::Exn | Status::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_cmd() {
        for s in [
            Status::Ok,
            Status::Exn,
            Status::Retry,
            Status::Abort,
            Status::Invalid,
            Status::Unimplemented,
            Status::ServerError,
            Status::ProxyError,
            Status::TimedOut,
            Status::Canceled,
        ] {
            assert_eq!(Status::from_cmd(s.to_cmd()), Some(s));
        }
    }

    #[test]
    fn unknown_cmd_does_not_decode() {
        assert_eq!(Status::from_cmd(123), None);
    }

    #[test]
    fn only_ok_exn_invalid_carry_payload() {
        assert!(Status::Ok.carries_payload());
        assert!(Status::Exn.carries_payload());
        assert!(Status::Invalid.carries_payload());
        assert!(!Status::Retry.carries_payload());
        assert!(!Status::Abort.carries_payload());
        assert!(!Status::Canceled.carries_payload());
    }
}
