use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::codec::reader::SegmentReader;
use crate::codec::segment::{
    delete_segment_files, load_deletions, save_deletions, SegmentId, SegmentMeta,
};
use crate::core::config::{MergeConfig, WriterConfig};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::matching::Matcher;
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::writing::merging::{Merge, MergeExecutor, MergeOutcome, SegmentStats, TieredMergeStrategy};
use crate::writing::segment_writer::{IndexedDocument, SegmentWriter};

/// Index-level table of contents: the committed generation and its segment
/// list. Replaced atomically on commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexToc {
    pub generation: u64,
    pub segments: Vec<SegmentId>,
}

impl IndexToc {
    pub fn load_or_default(layout: &StorageLayout) -> Result<Self> {
        let path = layout.toc_path();
        if !path.exists() {
            return Ok(IndexToc::default());
        }
        let data = std::fs::read(&path)?;
        bincode::deserialize(&data)
            .map_err(|e| Error::format(format!("unreadable index table of contents: {}", e)))
    }

    pub fn save_atomic(&self, layout: &StorageLayout) -> Result<()> {
        let path = layout.toc_path();
        let dir = path
            .parent()
            .ok_or_else(|| Error::new(ErrorKind::Io, "table of contents path has no parent"))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bincode::serialize(self)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| Error::new(ErrorKind::Io, format!("replace table of contents: {}", e)))?;
        Ok(())
    }
}

/// Snapshot of the index at one committed generation: open readers for every
/// listed segment. Never blocks on the writer lock.
pub struct IndexReader {
    pub generation: u64,
    segments: Vec<Arc<SegmentReader>>,
}

impl IndexReader {
    pub fn open(layout: &StorageLayout) -> Result<Self> {
        let toc = IndexToc::load_or_default(layout)?;
        let segments = toc
            .segments
            .iter()
            .map(|id| SegmentReader::open(layout, id).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(IndexReader {
            generation: toc.generation,
            segments,
        })
    }

    pub fn segments(&self) -> &[Arc<SegmentReader>] {
        &self.segments
    }

    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count()).sum()
    }

    pub fn doc_count_all(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count_all()).sum()
    }

    /// Global doc-id base of each segment, in segment order.
    pub fn segment_bases(&self) -> Vec<u64> {
        let mut bases = Vec::with_capacity(self.segments.len());
        let mut next = 0;
        for segment in &self.segments {
            bases.push(next);
            next += segment.doc_count_all();
        }
        bases
    }
}

/// Single writer over one index directory, serialized by an advisory file
/// lock. Documents buffer in memory and spill into segments; commit writes
/// the new table of contents atomically, cancel removes everything the
/// session created.
pub struct IndexWriter {
    layout: StorageLayout,
    _lock: FileLock,
    config: WriterConfig,
    merge_config: MergeConfig,
    toc: IndexToc,
    buffer: SegmentWriter,
    /// Segments flushed this session, invisible until commit.
    session_segments: Vec<SegmentId>,
    pending_deletes: HashMap<SegmentId, RoaringBitmap>,
    /// Segments currently mid-merge; never reselected by planning.
    merging: HashSet<SegmentId>,
    executor: MergeExecutor,
    merge_errors: Vec<String>,
}

impl std::fmt::Debug for IndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriter").finish_non_exhaustive()
    }
}

impl IndexWriter {
    /// Fails fast with `LockConflict` when another writer holds the lock.
    pub fn open(
        layout: StorageLayout,
        config: WriterConfig,
        merge_config: MergeConfig,
    ) -> Result<Self> {
        let lock = FileLock::try_acquire(layout.lock_path())?;
        let toc = IndexToc::load_or_default(&layout)?;
        let buffer = SegmentWriter::new(layout.clone(), config.clone());
        Ok(IndexWriter {
            layout,
            _lock: lock,
            config,
            merge_config,
            toc,
            buffer,
            session_segments: Vec::new(),
            pending_deletes: HashMap::new(),
            merging: HashSet::new(),
            executor: MergeExecutor::serial(),
            merge_errors: Vec::new(),
        })
    }

    /// Swap in a background executor for parallel merge execution.
    pub fn with_executor(mut self, executor: MergeExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn add_document(&mut self, doc: IndexedDocument) -> Result<()> {
        self.buffer.add_document(doc);
        if self.buffer.over_limits() {
            self.flush_segment()?;
        }
        Ok(())
    }

    /// Delete every existing document matching the new document's values in
    /// the unique fields, then add it.
    pub fn update_document(&mut self, doc: IndexedDocument, unique_fields: &[&str]) -> Result<()> {
        for field in unique_fields {
            let terms: Vec<Vec<u8>> = doc
                .fields
                .get(*field)
                .map(|f| f.postings.iter().map(|p| p.term.clone()).collect())
                .unwrap_or_default();
            for term in terms {
                self.delete_by_term(field, &term)?;
            }
        }
        self.add_document(doc)
    }

    /// Spill the in-memory buffer into a new (uncommitted) segment.
    pub fn flush_segment(&mut self) -> Result<Option<SegmentId>> {
        match self.buffer.flush()? {
            Some(meta) => {
                self.session_segments.push(meta.id);
                Ok(Some(meta.id))
            }
            None => Ok(None),
        }
    }

    fn all_segments(&self) -> Vec<SegmentId> {
        let mut out = self.toc.segments.clone();
        out.extend(self.session_segments.iter().copied());
        out
    }

    /// Mark matching documents deleted. Buffered documents are dropped
    /// outright; persisted ones go into per-segment pending bitmaps applied
    /// at commit. Returns how many documents were marked.
    pub fn delete_by_term(&mut self, field: &str, term: &[u8]) -> Result<u64> {
        let mut count = self.buffer.remove_matching(field, term) as u64;
        for sid in self.all_segments() {
            let reader = SegmentReader::open(&self.layout, &sid)?;
            let mut matcher: Box<dyn Matcher> = match reader.matcher(field, term) {
                Ok(matcher) => matcher,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let pending = self.pending_deletes.entry(sid).or_default();
            while matcher.is_active() {
                let doc = matcher.id().0;
                if !reader.is_deleted(DocId(doc)) && pending.insert(doc as u32) {
                    count += 1;
                }
                matcher.next()?;
            }
        }
        Ok(count)
    }

    /// Delete documents selected per segment by the caller: the query layer
    /// builds a matcher over the reader and returns the doc ids to drop.
    pub fn delete_by_query<F>(&mut self, select: F) -> Result<u64>
    where
        F: Fn(&SegmentReader) -> Result<RoaringBitmap>,
    {
        let mut count = 0;
        for sid in self.all_segments() {
            let reader = SegmentReader::open(&self.layout, &sid)?;
            let selected = select(&reader)?;
            let pending = self.pending_deletes.entry(sid).or_default();
            for doc in selected {
                if !reader.is_deleted(DocId(doc as u64)) && pending.insert(doc) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn apply_pending_deletes(&mut self) -> Result<()> {
        for (sid, bitmap) in std::mem::take(&mut self.pending_deletes) {
            if bitmap.is_empty() {
                continue;
            }
            let mut existing = load_deletions(&self.layout, &sid)?;
            existing |= bitmap;
            save_deletions(&self.layout, &sid, &existing)?;
        }
        Ok(())
    }

    fn segment_stats(&self, ids: &[SegmentId]) -> Result<Vec<SegmentStats>> {
        ids.iter()
            .map(|id| {
                let meta = SegmentMeta::load(&self.layout, id)?;
                let deleted = load_deletions(&self.layout, id)?.len();
                Ok(SegmentStats {
                    id: *id,
                    size_bytes: meta.size_bytes,
                    doc_count_all: meta.doc_count_all,
                    deleted,
                })
            })
            .collect()
    }

    /// Execute planned merges and integrate completions into `segments`.
    /// A failed merge integrates nothing; its error is kept for inspection.
    /// Returns the source segments merged away.
    fn run_merges(&mut self, merges: Vec<Merge>, segments: &mut Vec<SegmentId>) -> Vec<SegmentId> {
        let mut removed = Vec::new();
        if merges.is_empty() {
            return removed;
        }
        for merge in &merges {
            for sid in &merge.segments {
                self.merging.insert(*sid);
            }
        }
        for merge in merges {
            self.executor
                .submit(self.layout.clone(), self.config.clone(), merge);
        }
        for outcome in self.executor.wait_all() {
            match outcome {
                MergeOutcome::Completed { sources, meta, .. } => {
                    segments.retain(|sid| !sources.contains(sid));
                    segments.push(meta.id);
                    for sid in &sources {
                        self.merging.remove(sid);
                    }
                    removed.extend(sources);
                }
                MergeOutcome::Failed { sources, error, .. } => {
                    for sid in &sources {
                        self.merging.remove(sid);
                    }
                    self.merge_errors.push(error);
                }
            }
        }
        removed
    }

    /// Errors of merges skipped during the last commit.
    pub fn merge_errors(&self) -> &[String] {
        &self.merge_errors
    }

    /// Flush, apply deletions, optionally merge (or fully optimize), then
    /// atomically publish the new generation. A failure before the table of
    /// contents is replaced leaves the previous generation fully intact.
    pub fn commit(&mut self, merge: bool, optimize: bool) -> Result<u64> {
        self.merge_errors.clear();
        self.flush_segment()?;
        self.apply_pending_deletes()?;

        let mut segments = self.all_segments();
        let mut removed: Vec<SegmentId> = Vec::new();
        let strategy = TieredMergeStrategy::new(self.merge_config.clone());

        if optimize {
            // Cascade until the segment count settles at the target.
            loop {
                let stats = self.segment_stats(&segments)?;
                let plans = strategy.plan_forced(&stats, &self.merging, 1);
                if plans.is_empty() {
                    break;
                }
                let before = segments.len();
                removed.extend(self.run_merges(plans, &mut segments));
                if segments.len() >= before {
                    break;
                }
            }
        } else if merge {
            let stats = self.segment_stats(&segments)?;
            let plans = strategy.plan(&stats, &self.merging);
            removed.extend(self.run_merges(plans, &mut segments));
        }

        self.toc.generation += 1;
        self.toc.segments = segments;
        self.toc.save_atomic(&self.layout)?;
        self.session_segments.clear();

        // Old segment files go only after the new generation is durable.
        for sid in removed {
            delete_segment_files(&self.layout, &sid)?;
        }
        Ok(self.toc.generation)
    }

    /// Abandon the session: drop buffered documents and pending deletions,
    /// remove every uncommitted segment file. The committed generation is
    /// untouched.
    pub fn cancel(mut self) -> Result<()> {
        self.pending_deletes.clear();
        for sid in std::mem::take(&mut self.session_segments) {
            delete_segment_files(&self.layout, &sid)?;
        }
        Ok(())
    }

    pub fn buffered_docs(&self) -> usize {
        self.buffer.doc_count()
    }

    pub fn generation(&self) -> u64 {
        self.toc.generation
    }

    /// Snapshot reader of the last committed generation.
    pub fn reader(&self) -> Result<IndexReader> {
        IndexReader::open(&self.layout)
    }
}
