#![forbid(unsafe_code)]

//! Frame assembly, disassembly, and header validation for the IOP-RPC
//! channel (§4.1).

mod error;
mod frame;
mod validate;

pub use error::DecodeError;
pub use frame::Frame;
pub use validate::validate_header;
