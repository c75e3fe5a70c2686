/// A lightweight stand-in for the schema descriptor a [`crate::Message`]
/// belongs to (§3). Schema compilation itself is out of scope (§1); callers
/// that need constraint-checking or pack/unpack hand it in through the
/// collaborator interfaces of §6 and only the command code and a debug name
/// are needed by the channel core itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcDescriptor {
    pub cmd: i32,
    pub name: &'static str,
}

impl RpcDescriptor {
    pub const fn new(cmd: i32, name: &'static str) -> Self {
        Self { cmd, name }
    }
}
