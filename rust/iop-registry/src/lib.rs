#![forbid(unsafe_code)]

//! The process-wide runtime for the IOP-RPC channel core (§9): channel-id
//! allocation and lookup, the message pool, and the pre/post hook-context
//! map. Exposed as an explicit [`Runtime`] handle constructed by the caller
//! rather than a hidden global — every channel is threaded a reference to
//! one at construction time.

mod channel_registry;
mod hook_context;
mod message_pool;

pub use channel_registry::ChannelRegistry;
pub use hook_context::HookContextMap;
pub use iop_wire::ChannelId;
pub use message_pool::{MessagePool, ScratchBuf};

/// Tunables for the pieces of the runtime that are not purely structural
/// (§10.4). `large_message_threshold` mirrors the header-validation cutoff
/// in `iop-codec`'s caller (kept here so one config object can own every
/// process-wide knob).
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Number of scratch buffers kept warm in the message pool.
    pub message_pool_capacity: usize,
    /// Initial capacity reserved in each pooled scratch buffer.
    pub message_scratch_capacity: usize,
    /// Payload length at or above which a command's presence in the dispatch
    /// table is checked before the payload is allocated (§4.1).
    pub large_message_threshold: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            message_pool_capacity: 64,
            message_scratch_capacity: 256,
            large_message_threshold: iop_wire::LARGE_MESSAGE_THRESHOLD,
        }
    }
}

/// The process-wide collaborators a channel needs but does not own outright:
/// the channel-id registry (generic over the caller's routing handle type,
/// so `iop-registry` never has to know what a `Channel` looks like), the
/// message-scratch pool, and the hook-context map.
///
/// `T` is the type channels register themselves as (typically a trait object
/// implemented by `iop-session`/`iop-channel`'s channel handle).
pub struct Runtime<T: ?Sized> {
    pub registry: ChannelRegistry<T>,
    pub messages: MessagePool,
    pub hooks: HookContextMap,
    config: RuntimeConfig,
}

impl<T: ?Sized + Send + Sync + 'static> Runtime<T> {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            registry: ChannelRegistry::new(),
            messages: MessagePool::new(config.message_pool_capacity, config.message_scratch_capacity),
            hooks: HookContextMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Runtime<T> {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
