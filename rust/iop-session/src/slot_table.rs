use std::collections::HashMap;
use std::sync::Arc;

use iop_wire::MAX_SLOT;
use parking_lot::Mutex;

use crate::message::Message;

/// Per-channel mapping from a 24-bit local slot to the in-flight message
/// awaiting a reply (§3 "Slot table", §4.3).
///
/// Slot zero is reserved for async messages, which never occupy an entry.
/// The allocation cursor rotates monotonically with wraparound, matching
/// `iop_registry::ChannelRegistry`'s id-allocation discipline one level down
/// the id space (channel id vs. per-channel slot).
pub struct SlotTable {
    table: Mutex<HashMap<u32, Arc<Message>>>,
    next_slot: Mutex<u32>,
}

/// Returned by [`SlotTable::allocate`] when every one of the 2^24 slots is
/// already occupied (§4.3, §8 "Slot-table exhaustion").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTableExhausted;

impl SlotTable {
    pub fn new() -> Self {
        Self { table: Mutex::new(HashMap::new()), next_slot: Mutex::new(1) }
    }

    /// Allocate the next free slot and insert `message` under it. Async
    /// messages (slot already zero) must not go through here; callers check
    /// `message.is_async` first (§3 "Async message").
    pub fn allocate(&self, message: Arc<Message>) -> Result<u32, SlotTableExhausted> {
        let mut table = self.table.lock();
        let mut cursor = self.next_slot.lock();
        let start = *cursor;
        loop {
            if !table.contains_key(&*cursor) {
                let slot = *cursor;
                table.insert(slot, message);
                *cursor = bump(slot);
                return Ok(slot);
            }
            *cursor = bump(*cursor);
            if *cursor == start {
                return Err(SlotTableExhausted);
            }
        }
    }

    /// Remove the message for `slot`, the sole authoritative way to claim
    /// its reply (§3 invariant (iii)). Absence is a normal outcome (already
    /// canceled/timed out/replied) and is silently `None`, per §4.5.
    pub fn remove(&self, slot: u32) -> Option<Arc<Message>> {
        self.table.lock().remove(&slot)
    }

    pub fn get(&self, slot: u32) -> Option<Arc<Message>> {
        self.table.lock().get(&slot).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every still-present message, for channel teardown (§4.9
    /// "Disconnect": "aborts every in-flight message").
    pub fn drain(&self) -> Vec<Arc<Message>> {
        self.table.lock().drain().map(|(_, v)| v).collect()
    }
}

fn bump(slot: u32) -> u32 {
    if slot >= MAX_SLOT { 1 } else { slot + 1 }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Payload;
    use bytes::Bytes;

    fn msg() -> Arc<Message> {
        Arc::new(Message::new(0, 5, Payload::encoded(Bytes::new()), 0))
    }

    #[test]
    fn allocates_and_removes_a_slot() {
        let table = SlotTable::new();
        let slot = table.allocate(msg()).unwrap();
        assert_ne!(slot, 0, "slot zero is reserved for async");
        assert!(table.get(slot).is_some());
        assert!(table.remove(slot).is_some());
        assert!(table.get(slot).is_none());
    }

    #[test]
    fn double_remove_is_none_the_second_time() {
        let table = SlotTable::new();
        let slot = table.allocate(msg()).unwrap();
        assert!(table.remove(slot).is_some());
        assert!(table.remove(slot).is_none());
    }

    #[test]
    fn allocates_many_distinct_slots() {
        let table = SlotTable::new();
        let mut slots = Vec::new();
        for _ in 0..1000 {
            slots.push(table.allocate(msg()).unwrap());
        }
        assert_eq!(slots.len(), 1000);
        assert_eq!(table.len(), 1000);
        let unique: std::collections::HashSet<_> = slots.iter().collect();
        assert_eq!(unique.len(), 1000);
    }

    #[test]
    fn drain_empties_the_table() {
        let table = SlotTable::new();
        table.allocate(msg()).unwrap();
        table.allocate(msg()).unwrap();
        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
