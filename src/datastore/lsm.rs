use super::index::Index;
use super::memtable::{MemTable, MemTableEntry};
use super::KvStore;
use crate::error::DatastoreError;
use crate::Result;
use std::io::Write;
use std::iter::Peekable;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

const WAL_FILE: &str = "wal.log";
const WAL_TMP_FILE: &str = "wal.log.tmp";
const TMP_EXTENSION: &str = "tmp";
const SST_DIR: &str = "sst";

#[derive(Clone)]
pub struct LsmEngine {
    path: Arc<PathBuf>,
    write_buffer_size: usize,
    sync_writes: bool,
    wal_writer: Arc<Mutex<BufWriter<File>>>,
    sst_counter: Arc<Mutex<usize>>,
    memtable: Arc<Mutex<MemTable>>,
    index: Arc<Index>,
    next_seq: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LsmEngine {
    /// Opens (or creates) a store rooted at `path`, replaying flushed
    /// segments and then the write-ahead log.
    ///
    /// The memtable is flushed to a new segment once its accounted size
    /// exceeds `write_buffer_size`. With `sync_writes` every WAL append is
    /// followed by `fsync`.
    pub fn open(
        path: impl Into<PathBuf>,
        write_buffer_size: usize,
        sync_writes: bool,
    ) -> Result<LsmEngine> {
        let path = path.into();
        Self::restore(&path, write_buffer_size, sync_writes).map_err(|e| DatastoreError::Open {
            path: path.clone(),
            source: Box::new(e),
        })
    }

    fn restore(path: &Path, write_buffer_size: usize, sync_writes: bool) -> Result<LsmEngine> {
        fs::create_dir_all(path.join(SST_DIR))?;

        let index = Index::default();
        let segments = list_segments(&path.join(SST_DIR))?;
        for (_, segment) in &segments {
            let entries = read_entries(File::open(segment)?, false)?;
            debug!(segment = %segment.display(), entries = entries.len(), "replaying segment");
            for entry in entries {
                index.set(entry);
            }
        }
        let sst_counter = segments.last().map_or(0, |(n, _)| *n);

        let wal_path = path.join(WAL_FILE);
        let memtable = match File::open(&wal_path) {
            Ok(wal_file) => MemTable::new(read_entries(wal_file, true)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemTable::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(entries = memtable.entries().len(), "replayed write-ahead log");

        let max_seq = memtable
            .entries()
            .iter()
            .map(|e| e.seq)
            .max()
            .unwrap_or(0)
            .max(index.max_seq());

        // Rewrite the log from the replayed memtable so a dropped torn tail
        // never sits in front of new appends. The old log stays in place
        // until the rewrite is synced.
        let wal_tmp_path = path.join(WAL_TMP_FILE);
        let mut wal_writer = BufWriter::new(File::create(&wal_tmp_path)?);
        for entry in memtable.entries() {
            write_entry(&mut wal_writer, entry)?;
        }
        wal_writer.flush()?;
        wal_writer.get_ref().sync_all()?;
        fs::rename(&wal_tmp_path, &wal_path)?;

        info!(
            path = %path.display(),
            segments = segments.len(),
            write_buffer_size,
            sync_writes,
            "opened lsm engine"
        );

        Ok(LsmEngine {
            path: Arc::new(path.to_path_buf()),
            write_buffer_size,
            sync_writes,
            wal_writer: Arc::new(Mutex::new(wal_writer)),
            sst_counter: Arc::new(Mutex::new(sst_counter)),
            memtable: Arc::new(Mutex::new(memtable)),
            index: Arc::new(index),
            next_seq: Arc::new(AtomicU64::new(max_seq + 1)),
        })
    }

    /// Number of segment files written so far.
    pub fn segment_count(&self) -> usize {
        *lock(&self.sst_counter)
    }

    fn lookup(&self, memtable: &MemTable, key: &str) -> Result<Vec<u8>> {
        let value = match memtable.get(key) {
            Some(entry) => entry.value.clone(),
            None => self.index.get(key).and_then(|e| e.value().value.clone()),
        };
        value.ok_or_else(|| DatastoreError::NotFound(key.to_string()))
    }

    /// Logs and applies one write. Callers hold the memtable lock.
    fn apply(&self, memtable: &mut MemTable, key: &str, value: Option<Vec<u8>>) -> Result<()> {
        let entry = MemTableEntry {
            key: key.to_string(),
            value,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };
        {
            let mut wal_writer = lock(&self.wal_writer);
            write_entry(&mut *wal_writer, &entry)?;
            wal_writer.flush()?;
            if self.sync_writes {
                wal_writer.get_ref().sync_data()?;
            }
        }
        memtable.set(entry);

        // The write is durable once logged. A failed flush leaves the
        // memtable intact and is retried by the next write.
        if memtable.len() > self.write_buffer_size {
            if let Err(e) = self.flush_memtable(memtable) {
                warn!(error = %e, bytes = memtable.len(), "memtable flush failed");
            }
        }
        Ok(())
    }

    fn flush_memtable(&self, memtable: &mut MemTable) -> Result<()> {
        if memtable.is_empty() {
            return Ok(());
        }
        let mut sst_counter = lock(&self.sst_counter);
        let segment = *sst_counter + 1;
        let sst_dir = self.path.join(SST_DIR);
        let sst_path = sst_dir.join(format!("{}.log", segment));
        let tmp_path = sst_dir.join(format!("{}.log.{}", segment, TMP_EXTENSION));

        if let Err(e) = write_segment(&tmp_path, &sst_path, memtable.entries()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        *sst_counter = segment;

        for entry in memtable.entries() {
            self.index.set(entry.clone());
        }
        info!(
            segment = %sst_path.display(),
            entries = memtable.entries().len(),
            bytes = memtable.len(),
            "flushed memtable"
        );
        memtable.clear();

        let wal_file = File::create(self.path.join(WAL_FILE))?;
        *lock(&self.wal_writer) = BufWriter::new(wal_file);
        Ok(())
    }
}

impl KvStore for LsmEngine {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut memtable = lock(&self.memtable);
        self.apply(&mut memtable, key, Some(value.to_vec()))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let memtable = lock(&self.memtable);
        self.lookup(&memtable, key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut memtable = lock(&self.memtable);
        self.apply(&mut memtable, key, None)
    }

    /// Runs the whole read-merge-write under the write lock, so concurrent
    /// merges on one key never lose an update.
    fn read_modify_write(
        &self,
        key: &str,
        buf: &mut Vec<u8>,
        merge: &mut dyn FnMut(&[u8], &mut Vec<u8>) -> Result<()>,
    ) -> Result<()> {
        let mut memtable = lock(&self.memtable);
        let current = self.lookup(&memtable, key)?;
        merge(&current, buf)?;
        self.apply(&mut memtable, key, Some(buf.clone()))
    }

    fn scan(&self, start: &str, count: usize) -> Result<Vec<(String, Vec<u8>)>> {
        let memtable = lock(&self.memtable);
        let recent = memtable.range_from(start).iter().peekable();
        let flushed = self
            .index
            .range_from(start)
            .map(|e| e.value().clone())
            .peekable();

        let scanned = MergeIter { recent, flushed }
            .filter_map(|entry| entry.value.map(|value| (entry.key, value)))
            .take(count)
            .collect();
        Ok(scanned)
    }

    fn close(&self) -> Result<()> {
        let mut wal_writer = lock(&self.wal_writer);
        wal_writer.flush()?;
        wal_writer.get_ref().sync_all()?;
        info!(path = %self.path.display(), "closed lsm engine");
        Ok(())
    }
}

/// Merges memtable entries over flushed entries, newest wins on equal keys.
struct MergeIter<'a, F: Iterator<Item = MemTableEntry>> {
    recent: Peekable<std::slice::Iter<'a, MemTableEntry>>,
    flushed: Peekable<F>,
}

impl<'a, F: Iterator<Item = MemTableEntry>> Iterator for MergeIter<'a, F> {
    type Item = MemTableEntry;

    fn next(&mut self) -> Option<MemTableEntry> {
        match (self.recent.peek(), self.flushed.peek()) {
            (Some(r), Some(f)) if r.key == f.key => {
                let flushed = self.flushed.next()?;
                let recent = self.recent.next()?;
                Some(if recent.seq >= flushed.seq {
                    recent.clone()
                } else {
                    flushed
                })
            }
            (Some(r), Some(f)) if r.key > f.key => self.flushed.next(),
            (Some(_), _) => self.recent.next().cloned(),
            (None, _) => self.flushed.next(),
        }
    }
}

fn write_entry(writer: &mut impl Write, entry: &MemTableEntry) -> Result<()> {
    let serialized_entry = serde_json::to_string(entry)?;
    writer.write_all(serialized_entry.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Writes `entries` to `tmp_path`, syncs it and renames it to `sst_path`,
/// so a segment is either complete or absent.
fn write_segment(tmp_path: &Path, sst_path: &Path, entries: &[MemTableEntry]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(tmp_path)?);
    for entry in entries {
        write_entry(&mut writer, entry)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    fs::rename(tmp_path, sst_path)?;
    Ok(())
}

/// Segment files under `dir`, ordered by their sequence number.
fn list_segments(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut segments = Vec::new();
    for dir_entry in fs::read_dir(dir)? {
        let path = dir_entry?.path();
        if path.extension().map_or(false, |ext| ext == TMP_EXTENSION) {
            debug!(path = %path.display(), "removing unfinished segment");
            fs::remove_file(&path)?;
            continue;
        }
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<usize>().ok());
        match number {
            Some(n) if path.extension().map_or(false, |ext| ext == "log") => {
                segments.push((n, path))
            }
            _ => warn!(path = %path.display(), "ignoring unexpected file in segment directory"),
        }
    }
    segments.sort_by_key(|(n, _)| *n);
    Ok(segments)
}

/// Reads JSON-line entries. With `tolerate_torn_tail` a final line that
/// fails to parse is dropped instead of failing the whole replay.
fn read_entries(file: File, tolerate_torn_tail: bool) -> Result<Vec<MemTableEntry>> {
    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<String>>>()?;
    let last = lines.len().saturating_sub(1);

    let mut entries = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if tolerate_torn_tail && i == last => {
                warn!(error = %e, "dropping torn write-ahead log tail");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn engine(dir: &Path, write_buffer_size: usize) -> LsmEngine {
        LsmEngine::open(dir, write_buffer_size, false).unwrap()
    }

    #[test]
    fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 1 << 20);

        engine.put("a", b"1").unwrap();
        assert_eq!(engine.get("a").unwrap(), b"1".to_vec());

        engine.put("a", b"2").unwrap();
        assert_eq!(engine.get("a").unwrap(), b"2".to_vec());

        engine.delete("a").unwrap();
        assert!(engine.get("a").unwrap_err().is_not_found());
        engine.delete("never-written").unwrap();
    }

    #[test]
    fn flushes_when_write_buffer_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 64);

        for i in 0..20 {
            engine.put(&format!("key{:02}", i), &[i as u8; 8]).unwrap();
        }
        assert!(engine.segment_count() > 0);
        for i in 0..20 {
            assert_eq!(engine.get(&format!("key{:02}", i)).unwrap(), vec![i as u8; 8]);
        }
    }

    #[test]
    fn tombstone_shadows_flushed_value() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 64);

        engine.put("victim", &[7; 64]).unwrap();
        assert_eq!(engine.segment_count(), 1);
        engine.delete("victim").unwrap();
        assert!(engine.get("victim").unwrap_err().is_not_found());
        assert!(engine.scan("", 10).unwrap().is_empty());
    }

    #[test]
    fn scan_merges_memtable_and_segments() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 100);

        engine.put("b", &[1; 80]).unwrap();
        engine.put("d", &[1; 80]).unwrap();
        engine.put("a", b"new").unwrap();
        engine.put("b", b"newer").unwrap();
        engine.put("c", b"x").unwrap();

        let scanned = engine.scan("b", 10).unwrap();
        let keys: Vec<&str> = scanned.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "d"]);
        assert_eq!(scanned[0].1, b"newer".to_vec());

        assert_eq!(engine.scan("", 2).unwrap().len(), 2);
    }

    #[test]
    fn read_modify_write_requires_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 1 << 20);
        let mut buf = Vec::new();

        let err = engine
            .read_modify_write("missing", &mut buf, &mut |_: &[u8], _: &mut Vec<u8>| Ok(()))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(engine.get("missing").unwrap_err().is_not_found());

        engine.put("k", b"ab").unwrap();
        engine
            .read_modify_write("k", &mut buf, &mut |current: &[u8], out: &mut Vec<u8>| {
                out.extend_from_slice(current);
                out.push(b'c');
                Ok(())
            })
            .unwrap();
        assert_eq!(engine.get("k").unwrap(), b"abc".to_vec());
    }

    #[test]
    fn ignores_torn_wal_tail() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = engine(dir.path(), 1 << 20);
            engine.put("kept", b"v").unwrap();
            engine.close().unwrap();
        }
        let mut wal = OpenOptions::new()
            .append(true)
            .open(dir.path().join(WAL_FILE))
            .unwrap();
        wal.write_all(b"{\"key\":\"torn\",\"val").unwrap();

        let engine = engine(dir.path(), 1 << 20);
        assert_eq!(engine.get("kept").unwrap(), b"v".to_vec());
        assert!(engine.get("torn").unwrap_err().is_not_found());
        assert!(!dir.path().join(WAL_TMP_FILE).exists());
    }

    #[test]
    fn failed_flush_keeps_write_committed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), 64);
        let sst_dir = dir.path().join(SST_DIR);
        fs::remove_dir(&sst_dir).unwrap();
        fs::write(&sst_dir, b"in the way").unwrap();

        engine.put("big", &[9; 80]).unwrap();
        assert_eq!(engine.get("big").unwrap(), vec![9; 80]);
        engine.put("small", b"v").unwrap();
        assert_eq!(engine.get("small").unwrap(), b"v".to_vec());
        assert_eq!(engine.segment_count(), 0);

        fs::remove_file(&sst_dir).unwrap();
        fs::create_dir(&sst_dir).unwrap();
        engine.put("next", b"w").unwrap();
        assert_eq!(engine.segment_count(), 1);
        assert!(sst_dir.join("1.log").exists());
        engine.close().unwrap();

        let reopened = LsmEngine::open(dir.path(), 64, false).unwrap();
        assert_eq!(reopened.get("big").unwrap(), vec![9; 80]);
        assert_eq!(reopened.get("next").unwrap(), b"w".to_vec());
    }

    #[test]
    fn unfinished_segment_is_discarded_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = engine(dir.path(), 1 << 20);
            engine.put("k", b"v").unwrap();
            engine.close().unwrap();
        }
        let leftover = dir.path().join(SST_DIR).join("1.log.tmp");
        fs::write(&leftover, b"{\"key\":\"half").unwrap();

        let engine = engine(dir.path(), 1 << 20);
        assert_eq!(engine.get("k").unwrap(), b"v".to_vec());
        assert_eq!(engine.segment_count(), 0);
        assert!(!leftover.exists());
    }

    #[test]
    fn failed_wal_rewrite_keeps_old_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = engine(dir.path(), 1 << 20);
            engine.put("k", b"v").unwrap();
            engine.close().unwrap();
        }
        let wal_tmp = dir.path().join(WAL_TMP_FILE);
        fs::create_dir(&wal_tmp).unwrap();
        assert!(matches!(
            LsmEngine::open(dir.path(), 1 << 20, false),
            Err(DatastoreError::Open { .. })
        ));

        fs::remove_dir(&wal_tmp).unwrap();
        let engine = engine(dir.path(), 1 << 20);
        assert_eq!(engine.get("k").unwrap(), b"v".to_vec());
    }
}
