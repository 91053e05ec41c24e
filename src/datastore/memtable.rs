use serde::{Deserialize, Serialize};

/// Fixed per-entry overhead counted towards the memtable size.
pub const ENTRY_OVERHEAD: usize = 16;

#[derive(Clone, Default)]
pub struct MemTable {
    entries: Vec<MemTableEntry>,
    size: usize,
}

/// A single write. `value: None` is a tombstone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MemTableEntry {
    pub key: String,
    pub value: Option<Vec<u8>>,
    pub seq: u64,
}

impl MemTableEntry {
    pub fn value_len(&self) -> usize {
        self.value.as_ref().map_or(0, Vec::len)
    }
}

impl MemTable {
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn new(entries: Vec<MemTableEntry>) -> Self {
        let mut memtable = MemTable::default();
        for entry in entries {
            memtable.set(entry);
        }
        memtable
    }

    /// Inserts or replaces the entry for its key. An entry older than the
    /// one already held is ignored.
    pub fn set(&mut self, entry: MemTableEntry) {
        match self.get_index(&entry.key) {
            Ok(idx) => {
                let existing = &self.entries[idx];
                if existing.seq > entry.seq {
                    return;
                }

                self.size = self.size - existing.value_len() + entry.value_len();
                self.entries[idx] = entry;
            }
            Err(idx) => {
                self.size += entry.key.len() + entry.value_len() + ENTRY_OVERHEAD;
                self.entries.insert(idx, entry);
            }
        }
    }

    pub fn get_index(&self, key: &str) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.as_str().cmp(key))
    }

    pub fn get(&self, key: &str) -> Option<&MemTableEntry> {
        self.get_index(key).ok().map(|idx| &self.entries[idx])
    }

    /// Entries with `key >= start`, in key order.
    pub fn range_from(&self, start: &str) -> &[MemTableEntry] {
        let idx = match self.get_index(start) {
            Ok(idx) | Err(idx) => idx,
        };
        &self.entries[idx..]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size = 0;
    }

    pub fn entries(&self) -> &[MemTableEntry] {
        &self.entries
    }
}

#[cfg(test)]
fn entry(key: &str, value: &str, seq: u64) -> MemTableEntry {
    MemTableEntry {
        key: key.to_string(),
        value: Some(value.as_bytes().to_vec()),
        seq,
    }
}

#[test]
fn memtable_test() {
    let mut memtable = MemTable::default();
    let entry1 = entry("123", "456", 10);
    memtable.set(entry1);

    let entry2 = entry("12", "789", 11);
    memtable.set(entry2.clone());

    let entry3 = entry("12PE", "7812A9", 12);
    memtable.set(entry3);
    assert_eq!(memtable.entries().len(), 3);

    let entry4 = entry("123", "46", 13);
    memtable.set(entry4.clone());
    let size = memtable.len();

    let entry5 = entry("123", "4", 3);
    memtable.set(entry5);
    assert_eq!(memtable.len(), size);

    assert_eq!(memtable.get("123"), Some(&entry4));
    assert_eq!(memtable.get("12"), Some(&entry2));

    assert_eq!(memtable.get_index("12PE"), Ok(2));
    assert_eq!(memtable.get_index("ABCD"), Err(3));
}

#[test]
fn memtable_size_accounting() {
    let mut memtable = MemTable::default();
    memtable.set(entry("k", "abcd", 1));
    assert_eq!(memtable.len(), 1 + 4 + ENTRY_OVERHEAD);

    memtable.set(entry("k", "ab", 2));
    assert_eq!(memtable.len(), 1 + 2 + ENTRY_OVERHEAD);

    memtable.set(MemTableEntry {
        key: "k".to_string(),
        value: None,
        seq: 3,
    });
    assert_eq!(memtable.len(), 1 + ENTRY_OVERHEAD);
    assert_eq!(memtable.get("k").and_then(|e| e.value.as_ref()), None);

    memtable.clear();
    assert!(memtable.is_empty());
    assert_eq!(memtable.len(), 0);
}

#[test]
fn memtable_range_from() {
    let memtable = MemTable::new(vec![entry("b", "2", 1), entry("a", "1", 2), entry("d", "4", 3)]);
    let keys: Vec<&str> = memtable
        .range_from("b")
        .iter()
        .map(|e| e.key.as_str())
        .collect();
    assert_eq!(keys, vec!["b", "d"]);
    assert!(memtable.range_from("e").is_empty());
}
