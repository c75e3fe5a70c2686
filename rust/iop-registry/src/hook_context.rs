use std::any::Any;
use std::collections::HashMap;

use parking_lot::Mutex;

type BoxedContext = Box<dyn Any + Send>;

/// Process-wide map from a 64-bit slot identifier to the hook-context
/// carried from a pre-hook to its matching post-hook (§3 "Hook context",
/// §4.8).
///
/// The original implementation's single-slot fast path (§9 "pre/post hook
/// context lifetime") assumed the single-threaded event loop of §5; a
/// `tokio` task can resume on a different worker thread after any `.await`
/// between a pre-hook's install and its post-hook's take (the same race
/// already called out for message timeouts in §9 open question (ii)), so a
/// thread-local cache here would silently lose contexts whenever install and
/// take land on different OS threads. This map is the whole store rather
/// than an optimization in front of one, trading the fast path for the
/// correctness the async runtime actually requires.
pub struct HookContextMap {
    map: Mutex<HashMap<u64, BoxedContext>>,
}

impl HookContextMap {
    pub fn new() -> Self {
        Self { map: Mutex::new(HashMap::new()) }
    }

    /// Install a context for `slot`, taken by the matching [`Self::take`].
    pub fn install<C: Send + 'static>(&self, slot: u64, ctx: C) {
        self.map.lock().insert(slot, Box::new(ctx));
    }

    /// Retrieve and remove the context installed for `slot`.
    pub fn take<C: Send + 'static>(&self, slot: u64) -> Option<C> {
        let boxed = self.map.lock().remove(&slot)?;
        boxed.downcast::<C>().ok().map(|b| *b)
    }

    /// Whether any context is currently pending, for tests and diagnostics.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

impl Default for HookContextMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ctx(u32);

    #[test]
    fn single_slot_round_trip() {
        let hooks = HookContextMap::new();
        hooks.install(1, Ctx(42));
        let ctx: Ctx = hooks.take(1).unwrap();
        assert_eq!(ctx, Ctx(42));
        assert!(hooks.is_empty());
    }

    #[test]
    fn nested_installs_are_independently_retrievable() {
        let hooks = HookContextMap::new();
        hooks.install(1, Ctx(1));
        hooks.install(2, Ctx(2));
        let a: Ctx = hooks.take(1).unwrap();
        let b: Ctx = hooks.take(2).unwrap();
        assert_eq!(a, Ctx(1));
        assert_eq!(b, Ctx(2));
        assert!(hooks.is_empty());
    }

    #[test]
    fn install_then_take_from_a_different_thread_still_finds_it() {
        let hooks = std::sync::Arc::new(HookContextMap::new());
        hooks.install(7, Ctx(99));
        let hooks2 = hooks.clone();
        let ctx: Ctx = std::thread::spawn(move || hooks2.take(7).unwrap()).join().unwrap();
        assert_eq!(ctx, Ctx(99));
    }

    #[test]
    fn taking_an_unknown_slot_returns_none() {
        let hooks = HookContextMap::new();
        assert!(hooks.take::<Ctx>(99).is_none());
    }
}
