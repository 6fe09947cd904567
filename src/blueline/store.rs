use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::blueline::cursor::{BufferedCursor, KvCursor, RegionCursor};
use crate::blueline::region::{encode_region, Region};
use crate::blueline::toc::{BlockRef, Toc};
use crate::core::config::StoreConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::file_lock::FileLock;
use crate::storage::mmap_file::MmapFile;

fn cache_size(config: &StoreConfig) -> NonZeroUsize {
    NonZeroUsize::new(config.cache_regions.max(1)).unwrap_or(NonZeroUsize::MIN)
}

struct StoreCore {
    data: Arc<MmapFile>,
    toc: Toc,
    cache: Mutex<LruCache<u64, Arc<Region>>>,
    config: StoreConfig,
}

/// Read-only view of one logical sorted key/value store at one committed
/// generation. Existing regions are never mutated in place, so a store opened
/// before a commit keeps serving its snapshot.
#[derive(Clone)]
pub struct RegionStore {
    core: Arc<StoreCore>,
}

impl RegionStore {
    pub fn open(dir: impl AsRef<Path>, name: &str, config: StoreConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let toc = Toc::load_or_default(dir.join(format!("{}.toc", name)))?;
        let data_path = dir.join(format!("{}.dat", name));
        let data = if data_path.exists() {
            Arc::new(MmapFile::open_read_only(&data_path)?)
        } else {
            Arc::new(MmapFile::from_vec(Vec::new()))
        };
        Ok(Self::from_parts(data, toc, config))
    }

    fn from_parts(data: Arc<MmapFile>, toc: Toc, config: StoreConfig) -> Self {
        let cache = Mutex::new(LruCache::new(cache_size(&config)));
        RegionStore {
            core: Arc::new(StoreCore { data, toc, cache, config }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.core.toc.generation
    }

    pub fn len(&self) -> u64 {
        self.core.toc.item_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn realize(&self, ref_index: usize) -> Result<Arc<Region>> {
        let block = self.core.toc.refs.get(ref_index).ok_or_else(|| {
            Error::new(ErrorKind::Internal, "region reference out of range")
        })?;
        if let Some(region) = self.core.cache.lock().get(&block.offset) {
            return Ok(region.clone());
        }
        let mut region = Region::parse(self.core.data.clone(), block.offset as usize)?;
        if self.core.config.preread {
            region.preread()?;
        }
        let region = Arc::new(region);
        self.core.cache.lock().put(block.offset, region.clone());
        Ok(region)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.core.toc.owner_of(key) {
            Some(idx) => self.realize(idx)?.get(key),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Lookup that must succeed; missing keys are a distinct not-found error.
    pub fn require(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.get(key)?
            .ok_or_else(|| Error::not_found(format!("key {:?}", String::from_utf8_lossy(key))))
    }

    pub fn cursor(&self) -> StoreCursor {
        StoreCursor {
            store: self.clone(),
            ref_index: 0,
            inner: None,
        }
    }

    /// All keys in `[lo, hi)`.
    pub fn key_range(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut cursor = self.cursor();
        cursor.seek(lo)?;
        while let Some(key) = cursor.key()? {
            if key.as_slice() >= hi {
                break;
            }
            out.push(key);
            cursor.next()?;
        }
        Ok(out)
    }

    pub fn items(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        let mut cursor = self.cursor();
        cursor.first()?;
        while cursor.is_valid() {
            if let (Some(k), Some(v)) = (cursor.key()?, cursor.value()?) {
                out.push((k, v));
            }
            cursor.next()?;
        }
        Ok(out)
    }
}

/// Sequential scan across all regions of a store, in key order.
pub struct StoreCursor {
    store: RegionStore,
    ref_index: usize,
    inner: Option<RegionCursor>,
}

impl StoreCursor {
    fn load(&mut self) -> Result<()> {
        while self.ref_index < self.store.core.toc.refs.len() {
            let region = self.store.realize(self.ref_index)?;
            let mut cursor = RegionCursor::new(region);
            cursor.first()?;
            if cursor.is_valid() {
                self.inner = Some(cursor);
                return Ok(());
            }
            self.ref_index += 1;
        }
        self.inner = None;
        Ok(())
    }
}

impl KvCursor for StoreCursor {
    fn first(&mut self) -> Result<()> {
        self.ref_index = 0;
        self.load()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(inner) = &mut self.inner {
            inner.next()?;
            if !inner.is_valid() {
                self.ref_index += 1;
                self.load()?;
            }
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let refs = &self.store.core.toc.refs;
        self.ref_index = refs.partition_point(|r| r.max_key.as_slice() < key);
        if self.ref_index >= refs.len() {
            self.inner = None;
            return Ok(());
        }
        let region = self.store.realize(self.ref_index)?;
        let mut cursor = RegionCursor::new(region);
        cursor.seek(key)?;
        if cursor.is_valid() {
            self.inner = Some(cursor);
        } else {
            self.ref_index += 1;
            self.load()?;
        }
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.inner.as_ref().map(|c| c.is_valid()).unwrap_or(false)
    }

    fn key(&self) -> Result<Option<Vec<u8>>> {
        match &self.inner {
            Some(inner) => inner.key(),
            None => Ok(None),
        }
    }

    fn value(&self) -> Result<Option<Vec<u8>>> {
        match &self.inner {
            Some(inner) => inner.value(),
            None => Ok(None),
        }
    }
}

/// Exclusive writer over one logical store. Mutations are buffered in memory
/// and invisible to readers until `commit`; flushing appends fresh regions to
/// the data file (existing regions are never touched) and the table of
/// contents is only replaced, atomically, at commit.
pub struct StoreWriter {
    data_path: PathBuf,
    toc_path: PathBuf,
    _lock: FileLock,
    config: StoreConfig,
    toc: Toc,
    committed_data_len: u64,
    data_file: File,
    pos: u64,
    map: Arc<MmapFile>,
    buffer: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl std::fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWriter").finish_non_exhaustive()
    }
}

impl StoreWriter {
    /// `blocking` chooses between waiting for the writer lock and failing
    /// fast with `LockConflict`.
    pub fn open(
        dir: impl AsRef<Path>,
        name: &str,
        config: StoreConfig,
        blocking: bool,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let lock_path = dir.join(format!("{}.lock", name));
        let lock = if blocking {
            FileLock::acquire(&lock_path)?
        } else {
            FileLock::try_acquire(&lock_path)?
        };

        let toc_path = dir.join(format!("{}.toc", name));
        let data_path = dir.join(format!("{}.dat", name));
        let toc = Toc::load_or_default(&toc_path)?;

        let data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&data_path)?;
        // Discard any bytes a crashed or cancelled writer left past the
        // committed length.
        data_file.set_len(toc.data_len)?;
        let mut data_file = data_file;
        data_file.seek(SeekFrom::Start(toc.data_len))?;

        let map = Arc::new(MmapFile::open_read_only(&data_path)?);
        let committed_data_len = toc.data_len;
        let pos = toc.data_len;

        Ok(StoreWriter {
            data_path,
            toc_path,
            _lock: lock,
            config,
            toc,
            committed_data_len,
            data_file,
            pos,
            map,
            buffer: BTreeMap::new(),
        })
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::new(ErrorKind::InvalidValue, "empty key"));
        }
        self.buffer.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    /// Tombstone a key; shadows any on-disk pair until flush rewrites it away.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::new(ErrorKind::InvalidValue, "empty key"));
        }
        self.buffer.insert(key.to_vec(), None);
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read through the buffer, falling back to flushed regions.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.buffer.get(key) {
            return Ok(entry.clone());
        }
        self.snapshot().get(key)
    }

    /// Read-only view of this writer's current state (flushed regions only).
    fn snapshot(&self) -> RegionStore {
        RegionStore::from_parts(self.map.clone(), self.toc.clone(), self.config.clone())
    }

    /// Cursor over buffered and flushed pairs together; buffered values
    /// shadow on-disk values with equal keys.
    pub fn cursor(&self) -> BufferedCursor<StoreCursor> {
        let snapshot: Vec<(Vec<u8>, Option<Vec<u8>>)> = self
            .buffer
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        BufferedCursor::new(snapshot, self.snapshot().cursor())
    }

    /// Rewrite every region the buffer touches: overlapping spans plus small
    /// adjacent neighbors merge into fresh regions appended to the data
    /// file; untouched regions carry over.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let entries: Vec<(Vec<u8>, Option<Vec<u8>>)> =
            std::mem::take(&mut self.buffer).into_iter().collect();

        let old_refs = std::mem::take(&mut self.toc.refs);
        let mut new_refs: Vec<BlockRef> = Vec::new();

        if old_refs.is_empty() {
            let items: Vec<(Vec<u8>, Vec<u8>)> = entries
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect();
            self.write_regions(&items, &mut new_refs)?;
        } else {
            // Owner of each buffered key: first region whose max_key >= key,
            // clamped to the last region for trailing inserts.
            let mut dirty = vec![false; old_refs.len()];
            let mut assigned: Vec<Vec<(Vec<u8>, Option<Vec<u8>>)>> =
                vec![Vec::new(); old_refs.len()];
            for (key, value) in entries {
                let idx = old_refs
                    .partition_point(|r| r.max_key.as_slice() < key.as_slice())
                    .min(old_refs.len() - 1);
                dirty[idx] = true;
                assigned[idx].push((key, value));
            }

            // Absorb small neighbors so adjacent under-filled regions merge.
            let small = (self.config.region_size / 2) as u64;
            loop {
                let mut changed = false;
                for i in 0..old_refs.len() {
                    if dirty[i] {
                        if i > 0 && !dirty[i - 1] && old_refs[i - 1].length < small {
                            dirty[i - 1] = true;
                            changed = true;
                        }
                        if i + 1 < old_refs.len()
                            && !dirty[i + 1]
                            && old_refs[i + 1].length < small
                        {
                            dirty[i + 1] = true;
                            changed = true;
                        }
                    }
                }
                if !changed {
                    break;
                }
            }

            let mut i = 0;
            while i < old_refs.len() {
                if !dirty[i] {
                    new_refs.push(old_refs[i].clone());
                    i += 1;
                    continue;
                }
                // One contiguous dirty run becomes one rewrite span.
                let mut span_entries: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();
                let mut disk_items: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
                while i < old_refs.len() && dirty[i] {
                    let region = Region::parse(self.map.clone(), old_refs[i].offset as usize)?;
                    disk_items.extend(region.items()?);
                    span_entries.append(&mut assigned[i]);
                    i += 1;
                }
                let merged = merge_span(disk_items, span_entries);
                self.write_regions(&merged, &mut new_refs)?;
            }
        }

        self.toc.refs = new_refs;
        self.toc.validate()?;
        self.toc.data_len = self.pos;
        self.map = Arc::new(MmapFile::open_read_only(&self.data_path)?);
        Ok(())
    }

    fn write_regions(&mut self, items: &[(Vec<u8>, Vec<u8>)], refs: &mut Vec<BlockRef>) -> Result<()> {
        let mut start = 0;
        while start < items.len() {
            let mut end = start;
            let mut size = 0usize;
            while end < items.len() && size < self.config.region_size {
                size += items[end].0.len() + items[end].1.len();
                end += 1;
            }
            let slice: Vec<(&[u8], &[u8])> = items[start..end]
                .iter()
                .map(|(k, v)| (k.as_slice(), v.as_slice()))
                .collect();
            let encoded = encode_region(&slice)?;
            self.data_file.write_all(&encoded)?;
            refs.push(BlockRef {
                offset: self.pos,
                length: encoded.len() as u64,
                count: (end - start) as u32,
                min_key: items[start].0.clone(),
                max_key: items[end - 1].0.clone(),
            });
            self.pos += encoded.len() as u64;
            start = end;
        }
        Ok(())
    }

    /// Final flush, durable data, then the new table of contents, written to
    /// a temp file and renamed so a failure leaves the old generation intact.
    pub fn commit(mut self) -> Result<()> {
        self.flush()?;
        self.data_file.sync_all()?;
        self.toc.generation += 1;
        self.toc.save_atomic(&self.toc_path)?;
        Ok(())
    }

    /// Abandon the session: truncate everything appended past the committed
    /// generation and release the lock without touching the table of
    /// contents.
    pub fn cancel(mut self) -> Result<()> {
        self.buffer.clear();
        self.data_file.set_len(self.committed_data_len)?;
        self.data_file.sync_all()?;
        Ok(())
    }
}

/// Two-way merge of a span's on-disk pairs with its buffered entries.
/// Buffered values win on equal keys; tombstones drop the pair.
fn merge_span(
    disk: Vec<(Vec<u8>, Vec<u8>)>,
    entries: Vec<(Vec<u8>, Option<Vec<u8>>)>,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::with_capacity(disk.len() + entries.len());
    let mut di = disk.into_iter().peekable();
    let mut ei = entries.into_iter().peekable();
    loop {
        match (di.peek(), ei.peek()) {
            (Some(d), Some(e)) => match d.0.cmp(&e.0) {
                std::cmp::Ordering::Less => {
                    if let Some(d) = di.next() {
                        out.push(d);
                    }
                }
                std::cmp::Ordering::Greater => {
                    if let Some((k, v)) = ei.next() {
                        if let Some(v) = v {
                            out.push((k, v));
                        }
                    }
                }
                std::cmp::Ordering::Equal => {
                    di.next();
                    if let Some((k, v)) = ei.next() {
                        if let Some(v) = v {
                            out.push((k, v));
                        }
                    }
                }
            },
            (Some(_), None) => {
                if let Some(d) = di.next() {
                    out.push(d);
                }
            }
            (None, Some(_)) => {
                if let Some((k, v)) = ei.next() {
                    if let Some(v) = v {
                        out.push((k, v));
                    }
                }
            }
            (None, None) => break,
        }
    }
    out
}
