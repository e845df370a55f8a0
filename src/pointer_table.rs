//! Block pointer table (spec §4.4).
//!
//! Each entry holds up to 16 direct `(size class, slot id)` pointers;
//! once full, it chains to an indirect entry that holds the overflow.
//!
//! The system this replaces deadlocked here: `add_pointer` called
//! `create_entry`, which tried to re-acquire the table's own (non
//! reentrant) lock. This version holds one `parking_lot::Mutex` over the
//! whole entry vector for the duration of `add_pointer`, so creating an
//! overflow entry is just pushing onto the vector the caller already
//! holds the lock for — never a re-entrant call.

use parking_lot::Mutex;

use crate::block_store::BlockSizeClass;
use crate::error::{DocStoreError, Result};

const DIRECT_CAPACITY: usize = 16;

/// A single block reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPointer {
    pub class: BlockSizeClass,
    pub slot: u64,
}

struct Entry {
    direct: Vec<BlockPointer>,
    indirect: Option<u64>,
}

impl Entry {
    fn empty() -> Self {
        Self {
            direct: Vec::with_capacity(DIRECT_CAPACITY),
            indirect: None,
        }
    }
}

/// Table of pointer-table entries, each identified by an id assigned at
/// creation time.
pub struct PointerTable {
    entries: Mutex<Vec<Option<Entry>>>,
}

impl PointerTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Create a new, empty entry and return its id.
    pub fn create_entry(&self) -> u64 {
        let mut entries = self.entries.lock();
        entries.push(Some(Entry::empty()));
        (entries.len() - 1) as u64
    }

    /// Append a block pointer to `entry_id`, chaining to a fresh indirect
    /// entry when the direct slots are exhausted.
    pub fn add_pointer(&self, entry_id: u64, pointer: BlockPointer) -> Result<()> {
        let mut entries = self.entries.lock();
        let mut current = entry_id;
        loop {
            let next_indirect = {
                let entry = entries
                    .get_mut(current as usize)
                    .and_then(|e| e.as_mut())
                    .ok_or_else(|| DocStoreError::Index(format!("no such pointer entry {current}")))?;
                if entry.direct.len() < DIRECT_CAPACITY {
                    entry.direct.push(pointer);
                    return Ok(());
                }
                entry.indirect
            };
            match next_indirect {
                Some(next) => current = next,
                None => {
                    entries.push(Some(Entry::empty()));
                    let new_id = (entries.len() - 1) as u64;
                    if let Some(entry) = entries.get_mut(current as usize).and_then(|e| e.as_mut()) {
                        entry.indirect = Some(new_id);
                    }
                    current = new_id;
                }
            }
        }
    }

    /// Collect every block pointer reachable from `entry_id`, across the
    /// whole indirect chain.
    pub fn pointers(&self, entry_id: u64) -> Result<Vec<BlockPointer>> {
        let entries = self.entries.lock();
        let mut out = Vec::new();
        let mut current = Some(entry_id);
        while let Some(id) = current {
            let entry = entries
                .get(id as usize)
                .and_then(|e| e.as_ref())
                .ok_or_else(|| DocStoreError::Index(format!("no such pointer entry {id}")))?;
            out.extend(entry.direct.iter().copied());
            current = entry.indirect;
        }
        Ok(out)
    }

    /// Delete an entry and its whole indirect chain. The freed slots
    /// themselves are returned so the caller can release them back to the
    /// block store.
    pub fn delete_entry(&self, entry_id: u64) -> Result<Vec<BlockPointer>> {
        let mut entries = self.entries.lock();
        let mut out = Vec::new();
        let mut current = Some(entry_id);
        while let Some(id) = current {
            let entry = entries
                .get_mut(id as usize)
                .and_then(|e| e.take())
                .ok_or_else(|| DocStoreError::Index(format!("no such pointer entry {id}")))?;
            out.extend(entry.direct.iter().copied());
            current = entry.indirect;
        }
        Ok(out)
    }

    /// Every slot, per size class, referenced by a live entry. Used to
    /// rebuild block store free lists at open.
    pub fn all_live_pointers(&self) -> Vec<BlockPointer> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter_map(|e| e.as_ref())
            .flat_map(|e| e.direct.iter().copied())
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.is_some()).count()
    }
}

impl Default for PointerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(slot: u64) -> BlockPointer {
        BlockPointer {
            class: BlockSizeClass::Small,
            slot,
        }
    }

    #[test]
    fn direct_pointers_preserve_insertion_order() {
        let table = PointerTable::new();
        let id = table.create_entry();
        for i in 0..16 {
            table.add_pointer(id, ptr(i)).unwrap();
        }
        let pointers = table.pointers(id).unwrap();
        assert_eq!(pointers.len(), 16);
        for (i, p) in pointers.iter().enumerate() {
            assert_eq!(p.slot, i as u64);
        }
    }

    #[test]
    fn overflow_chains_to_indirect_entry_without_deadlock() {
        let table = PointerTable::new();
        let id = table.create_entry();
        for i in 0..40 {
            table.add_pointer(id, ptr(i)).unwrap();
        }
        let pointers = table.pointers(id).unwrap();
        assert_eq!(pointers.len(), 40);
        assert!(table.entry_count() >= 3);
    }

    #[test]
    fn delete_entry_frees_whole_chain() {
        let table = PointerTable::new();
        let id = table.create_entry();
        for i in 0..20 {
            table.add_pointer(id, ptr(i)).unwrap();
        }
        let freed = table.delete_entry(id).unwrap();
        assert_eq!(freed.len(), 20);
        assert!(table.pointers(id).is_err());
    }

    proptest::proptest! {
        /// P6: `get_pointers` returns direct-then-indirect pointers in
        /// exactly the order they were added, for any pointer count that
        /// crosses the 16-per-entry direct capacity any number of times.
        #[test]
        fn pointers_preserve_insertion_order_across_any_count(n in 1usize..200) {
            let table = PointerTable::new();
            let id = table.create_entry();
            for i in 0..n as u64 {
                table.add_pointer(id, ptr(i)).unwrap();
            }
            let pointers = table.pointers(id).unwrap();
            let expected: Vec<BlockPointer> = (0..n as u64).map(ptr).collect();
            proptest::prop_assert_eq!(pointers, expected);
        }
    }
}
