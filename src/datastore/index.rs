use super::memtable::MemTableEntry;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;

/// Sorted view over every entry flushed to segment files.
///
/// Segments are only read at open, so every flushed entry stays here until
/// the engine is dropped. Tombstones are kept too: there is no compaction,
/// and memory grows with the number of distinct keys ever written.
#[derive(Default)]
pub struct Index {
    lookup: SkipMap<String, MemTableEntry>,
}

impl Index {
    pub fn get(&self, key: &str) -> Option<Entry<'_, String, MemTableEntry>> {
        self.lookup.get(key)
    }

    pub fn set(&self, entry: MemTableEntry) {
        if let Some(record) = self.get(&entry.key) {
            if entry.seq < record.value().seq {
                return;
            }
        }
        self.lookup.insert(entry.key.clone(), entry);
    }

    /// Entries with `key >= start`, in key order.
    pub fn range_from<'a>(
        &'a self,
        start: &'a str,
    ) -> impl Iterator<Item = Entry<'a, String, MemTableEntry>> + 'a {
        self.lookup
            .range::<str, _>((Bound::Included(start), Bound::Unbounded))
    }

    pub fn max_seq(&self) -> u64 {
        self.lookup.iter().map(|e| e.value().seq).max().unwrap_or(0)
    }
}
