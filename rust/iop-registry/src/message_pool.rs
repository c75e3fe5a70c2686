use object_pool::{Pool, Reusable};

/// A reusable scratch buffer checked out of the [`MessagePool`]. Returned to
/// the pool on drop; the caller is responsible for clearing it before reuse
/// if leftover bytes would be observable (this pool always clears on checkout,
/// see [`MessagePool::take`]).
pub type ScratchBuf<'a> = Reusable<'a, Vec<u8>>;

/// Process-wide pool of small scratch buffers backing each [`Message`]'s
/// "private area" (§3, §4.2). The original implementation carves this area
/// out of a single process-wide allocator arena sized per message; here a
/// `Vec<u8>` pool serves the same purpose without unsafe arena bookkeeping.
///
/// [`Message`]: https://docs.rs/iop-session (see `iop_session::Message`)
pub struct MessagePool {
    pool: Pool<Vec<u8>>,
    scratch_capacity: usize,
}

impl MessagePool {
    pub fn new(capacity: usize, scratch_capacity: usize) -> Self {
        Self { pool: Pool::new(capacity, || Vec::new()), scratch_capacity }
    }

    /// Check out a cleared scratch buffer, pre-reserving `scratch_capacity`
    /// bytes. Allocates a fresh one if the pool is currently empty (FIFO
    /// pool semantics per §4.2: "allocated from a process-wide pool",
    /// growing on demand rather than blocking).
    pub fn take(&self) -> ScratchBuf<'_> {
        let mut buf = self.pool.pull(Vec::new);
        buf.clear();
        buf.reserve(self.scratch_capacity);
        buf
    }

    pub fn scratch_capacity(&self) -> usize {
        self.scratch_capacity
    }

    /// Check out a scratch buffer and hand the caller full, owned
    /// (non-pool-borrowed) ownership of it. `iop_session::Message` needs its
    /// scratch area to be `'static` and freely movable across tasks (it
    /// can't hold a [`ScratchBuf`], which borrows the pool), so this detaches
    /// the checked-out allocation from the pool's own `Drop`-based recycling:
    /// the pool still amortizes the warm-up `reserve` across checkouts, it
    /// just doesn't get this particular allocation back.
    pub fn take_scratch(&self) -> Vec<u8> {
        let mut buf = self.take();
        std::mem::take(&mut *buf)
    }
}
