/// Size of the on-wire frame header, in bytes: three little-endian `u32` words.
pub const HEADER_LEN: usize = 12;

/// Maximum bytes a single write syscall may carry (stream `writev` cap, datagram
/// `sendmsg` ceiling). Applies to the header-plus-payload total.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Maximum number of file descriptors carried in one `sendmsg` ancillary-data
/// buffer on the datagram transport.
pub const MAX_FDS_PER_SEND: usize = 32;

/// Payload length at or above which the dispatch table is consulted for the
/// command's presence *before* the payload is allocated, so an unknown large
/// command is rejected cheaply.
pub const LARGE_MESSAGE_THRESHOLD: u32 = 10 * 1024 * 1024;

/// Highest local slot number representable in the 24-bit slot field.
pub const MAX_SLOT: u32 = 0x00ff_ffff;

/// Highest channel id representable in the 30-bit channel-id field of a slot
/// identifier (the top two bits are reserved for [`crate::Foreignness`]).
pub const MAX_CHANNEL_ID: u32 = 0x3fff_ffff;

/// Default ceiling on a single message's payload length enforced by the
/// message pool allocator (distinct from [`MAX_FRAME_LEN`], which bounds one
/// write syscall — a stream-transport message above the per-syscall cap is
/// simply written across more than one `write_all` call).
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 1 << 30;
