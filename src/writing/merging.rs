use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use crossbeam::channel::{unbounded, Receiver, Sender};
use uuid::Uuid;

use crate::codec::fieldwriter::FieldWriter;
use crate::codec::perdoc::PerDocWriter;
use crate::codec::reader::SegmentReader;
use crate::codec::segment::{SegmentId, SegmentMeta, META_VERSION};
use crate::codec::termsreader::TermCursor;
use crate::core::config::{MergeConfig, WriterConfig};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::postings::block::{rebase_block, BlockHeader, BlockReader};
use crate::postings::{Posting, PostingFormat, TermInfo, TermPostings};
use crate::storage::layout::StorageLayout;
use crate::storage::mmap_file::MmapFile;

/// A planned unit of merge work.
#[derive(Debug, Clone)]
pub struct Merge {
    pub id: Uuid,
    pub segments: Vec<SegmentId>,
    pub estimated_size: u64,
}

/// What the planner knows about one segment.
#[derive(Debug, Clone)]
pub struct SegmentStats {
    pub id: SegmentId,
    pub size_bytes: u64,
    pub doc_count_all: u64,
    pub deleted: u64,
}

impl SegmentStats {
    /// Byte size scaled by the live-document ratio.
    pub fn live_size(&self) -> u64 {
        if self.doc_count_all == 0 {
            return self.size_bytes;
        }
        let live = self.doc_count_all - self.deleted.min(self.doc_count_all);
        (self.size_bytes as f64 * live as f64 / self.doc_count_all as f64) as u64
    }
}

/// Buckets segments into geometric size tiers and merges size-sorted windows
/// with the best score. Score rewards low skew (similar sizes) and a high
/// deletion-reclaim ratio; segments already mid-merge are never reselected.
pub struct TieredMergeStrategy {
    config: MergeConfig,
}

impl TieredMergeStrategy {
    pub fn new(config: MergeConfig) -> Self {
        TieredMergeStrategy { config }
    }

    fn floored(&self, stats: &SegmentStats) -> u64 {
        stats.live_size().max(self.config.segment_size_floor)
    }

    /// How many segments the current total size justifies.
    fn allowed_segments(&self, total: u64) -> usize {
        if total == 0 {
            return self.config.per_tier;
        }
        let mut allowed = 0f64;
        let mut level = self.config.segment_size_floor.max(1) as f64;
        let mut remaining = total as f64;
        loop {
            let count = remaining / level;
            if count < self.config.per_tier as f64 {
                allowed += count.ceil();
                break;
            }
            allowed += self.config.per_tier as f64;
            remaining -= self.config.per_tier as f64 * level;
            level *= self.config.max_at_once as f64;
        }
        (allowed.max(1.0)) as usize
    }

    pub fn plan(&self, stats: &[SegmentStats], merging: &HashSet<SegmentId>) -> Vec<Merge> {
        let mut eligible: Vec<SegmentStats> = stats
            .iter()
            .filter(|s| !merging.contains(&s.id))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| self.floored(b).cmp(&self.floored(a)));

        let total: u64 = eligible.iter().map(|s| self.floored(s)).sum();
        let allowed = self.allowed_segments(total);

        let mut merges = Vec::new();
        while eligible.len() > allowed && eligible.len() >= 2 {
            let mut best: Option<(f64, usize, usize)> = None;
            for start in 0..eligible.len() - 1 {
                let longest = self.config.max_at_once.min(eligible.len() - start);
                for len in 2..=longest {
                    let window = &eligible[start..start + len];
                    let window_total: u64 = window.iter().map(|s| self.floored(s)).sum();
                    if window_total > self.config.max_merged_size {
                        continue;
                    }
                    let window_max = window.iter().map(|s| self.floored(s)).max().unwrap_or(1);
                    let skew = window_max as f64 / window_total as f64;
                    let docs: u64 = window.iter().map(|s| s.doc_count_all).sum();
                    let dels: u64 = window.iter().map(|s| s.deleted).sum();
                    let del_ratio = if docs == 0 { 0.0 } else { dels as f64 / docs as f64 };
                    let score = skew * (1.0 - del_ratio).powf(self.config.deletion_boost);
                    if best.map(|(b, _, _)| score < b).unwrap_or(true) {
                        best = Some((score, start, len));
                    }
                }
            }
            let (_, start, len) = match best {
                Some(found) => found,
                None => break,
            };
            let chosen: Vec<SegmentStats> = eligible.drain(start..start + len).collect();
            merges.push(Merge {
                id: Uuid::new_v4(),
                segments: chosen.iter().map(|s| s.id).collect(),
                estimated_size: chosen.iter().map(|s| s.live_size()).sum(),
            });
        }
        merges
    }

    /// Optimize variant: ignore scoring and greedily pack size-sorted
    /// segments toward `target` final segments. One round; callers loop
    /// until the count settles.
    pub fn plan_forced(
        &self,
        stats: &[SegmentStats],
        merging: &HashSet<SegmentId>,
        target: usize,
    ) -> Vec<Merge> {
        let mut eligible: Vec<SegmentStats> = stats
            .iter()
            .filter(|s| !merging.contains(&s.id))
            .cloned()
            .collect();
        if eligible.len() <= target.max(1) {
            return Vec::new();
        }
        eligible.sort_by_key(|s| s.size_bytes);

        let mut merges = Vec::new();
        for chunk in eligible.chunks(self.config.max_at_once.max(2)) {
            if chunk.len() < 2 {
                continue;
            }
            merges.push(Merge {
                id: Uuid::new_v4(),
                segments: chunk.iter().map(|s| s.id).collect(),
                estimated_size: chunk.iter().map(|s| s.live_size()).sum(),
            });
        }
        merges
    }
}

fn read_rebased_blocks(
    file: &Arc<MmapFile>,
    offset: u64,
    block_count: u32,
    id_offset: u64,
) -> Result<Vec<Vec<u8>>> {
    let bytes = file.data();
    let mut pos = offset as usize;
    let mut out = Vec::with_capacity(block_count as usize);
    for _ in 0..block_count {
        let header = BlockHeader::parse(bytes, pos)?;
        let end = pos + header.block_len as usize;
        if bytes.len() < end {
            return Err(Error::new(ErrorKind::Parse, "truncated posting block"));
        }
        out.push(rebase_block(&bytes[pos..end], id_offset)?);
        pos = end;
    }
    Ok(out)
}

fn decode_blocks(
    file: &Arc<MmapFile>,
    offset: u64,
    block_count: u32,
    format: &PostingFormat,
) -> Result<Vec<Posting>> {
    let mut out = Vec::new();
    let mut pos = offset as usize;
    for _ in 0..block_count {
        let mut reader = BlockReader::parse(file.clone(), pos)?;
        pos = reader.end();
        out.extend(reader.decode_all(format)?);
    }
    Ok(out)
}

/// Drop deleted docs and renumber the survivors.
fn remap_postings(postings: Vec<Posting>, docmap: &[Option<u64>]) -> Vec<Posting> {
    postings
        .into_iter()
        .filter_map(|mut p| {
            let new_id = docmap.get(p.doc_id.0 as usize).copied().flatten()?;
            p.doc_id = DocId(new_id);
            Some(p)
        })
        .collect()
}

enum Contribution {
    Raw {
        info: TermInfo,
        base: u64,
        blocks: Vec<Vec<u8>>,
    },
    Decoded(Vec<Posting>),
}

/// Stream the segments of `merge` into one new segment: per-document data
/// doc-by-doc (building the old-to-new docid map, dropping deleted docs),
/// then term-by-term across the merged dictionaries. Posting blocks copy raw
/// whenever the source has no deletions and the formats match; otherwise
/// they decode, remap and re-encode.
pub fn merge_segments(
    layout: &StorageLayout,
    config: &WriterConfig,
    merge: &Merge,
) -> Result<SegmentMeta> {
    let readers: Vec<SegmentReader> = merge
        .segments
        .iter()
        .map(|id| SegmentReader::open(layout, id))
        .collect::<Result<Vec<_>>>()?;

    let id = SegmentId::new();
    let mut perdoc = PerDocWriter::new(layout, id, config.stored_compression)?;

    let mut docmaps: Vec<Vec<Option<u64>>> = Vec::with_capacity(readers.len());
    let mut bases: Vec<u64> = Vec::with_capacity(readers.len());
    let mut next = 0u64;
    for reader in &readers {
        bases.push(next);
        let mut map = Vec::with_capacity(reader.doc_count_all() as usize);
        for doc in 0..reader.doc_count_all() {
            if reader.is_deleted(DocId(doc)) {
                map.push(None);
            } else {
                map.push(Some(next));
                next += 1;
            }
        }
        docmaps.push(map);
    }

    for (source_index, reader) in readers.iter().enumerate() {
        let length_fields: Vec<String> = reader
            .per_document()
            .length_fields()
            .map(String::from)
            .collect();
        let vector_fields: Vec<String> = reader
            .per_document()
            .vector_fields()
            .map(String::from)
            .collect();
        for doc in 0..reader.doc_count_all() {
            let new_id = match docmaps[source_index][doc as usize] {
                Some(new_id) => new_id,
                None => continue,
            };
            perdoc.start_doc(DocId(new_id))?;
            let stored = reader.stored_fields(DocId(doc))?;
            for (field, value) in stored.fields {
                perdoc.add_stored(&field, value)?;
            }
            for field in &length_fields {
                if let Ok(length) = reader.field_length(DocId(doc), field) {
                    if length > 0 {
                        perdoc.add_field_length(field, length)?;
                    }
                }
            }
            for field in &vector_fields {
                if let Ok(entries) = reader.vector(DocId(doc), field) {
                    perdoc.add_vector(field, entries)?;
                }
            }
            perdoc.finish_doc()?;
        }
    }

    let doc_count_all = perdoc.doc_count();
    let perdoc_bytes = perdoc.close()?;

    // Union of fields across sources; first writer of a name fixes the
    // target format.
    let mut all_fields: BTreeMap<String, PostingFormat> = BTreeMap::new();
    for reader in &readers {
        for (name, info) in reader.terms().fields() {
            all_fields.entry(name.to_string()).or_insert(info.format);
        }
    }

    struct Source<'a> {
        index: usize,
        reader: &'a SegmentReader,
        cursor: TermCursor,
        format: PostingFormat,
        raw_ok: bool,
    }

    let mut fw = FieldWriter::new(layout, id, config.inline_limit)?;
    for (field, format) in &all_fields {
        fw.start_field(field, *format)?;

        let mut sources: Vec<Source> = Vec::new();
        for (index, reader) in readers.iter().enumerate() {
            if let Ok(info) = reader.terms().field_info(field) {
                let raw_ok = !reader.has_deletions() && info.format.can_copy_raw_to(format);
                sources.push(Source {
                    index,
                    reader,
                    cursor: reader.terms().term_cursor(field)?,
                    format: info.format,
                    raw_ok,
                });
            }
        }

        // Every field is traversed to completion before the next begins.
        loop {
            let mut term: Option<Vec<u8>> = None;
            for source in &sources {
                if let Some((t, _)) = source.cursor.entry()? {
                    term = Some(match term {
                        None => t,
                        Some(current) => {
                            if t < current {
                                t
                            } else {
                                current
                            }
                        }
                    });
                }
            }
            let term = match term {
                Some(term) => term,
                None => break,
            };

            let mut contributions: Vec<Contribution> = Vec::new();
            let mut total_postings = 0usize;
            for source in &mut sources {
                let info = match source.cursor.entry()? {
                    Some((t, info)) if t == term => info,
                    _ => continue,
                };
                let base = bases[source.index];
                match &info.postings {
                    TermPostings::OnDisk { offset, block_count } if source.raw_ok => {
                        let blocks = read_rebased_blocks(
                            &source.reader.terms().posting_file(),
                            *offset,
                            *block_count,
                            base,
                        )?;
                        total_postings += info.doc_freq as usize;
                        contributions.push(Contribution::Raw {
                            info: info.clone(),
                            base,
                            blocks,
                        });
                    }
                    TermPostings::OnDisk { offset, block_count } => {
                        let postings = decode_blocks(
                            &source.reader.terms().posting_file(),
                            *offset,
                            *block_count,
                            &source.format,
                        )?;
                        let postings = remap_postings(postings, &docmaps[source.index]);
                        total_postings += postings.len();
                        contributions.push(Contribution::Decoded(postings));
                    }
                    TermPostings::Inline(postings) => {
                        let postings =
                            remap_postings(postings.clone(), &docmaps[source.index]);
                        total_postings += postings.len();
                        contributions.push(Contribution::Decoded(postings));
                    }
                }
                source.cursor.advance()?;
            }

            // A term whose every posting was deleted is dropped entirely.
            if total_postings == 0 {
                continue;
            }
            fw.start_term(&term)?;
            for contribution in contributions {
                match contribution {
                    Contribution::Raw { info, base, blocks } => {
                        for block in blocks {
                            fw.add_raw_block(&block)?;
                        }
                        fw.absorb_stats(&info, base)?;
                    }
                    Contribution::Decoded(postings) => {
                        for posting in postings {
                            fw.add_posting(posting)?;
                        }
                    }
                }
            }
            fw.finish_term()?;
        }
        fw.finish_field()?;
    }
    let (fields, post_bytes, post_crc) = fw.close()?;

    let meta = SegmentMeta {
        version: META_VERSION,
        id,
        created_at: Utc::now(),
        doc_count_all,
        size_bytes: perdoc_bytes + post_bytes,
        postings_crc: post_crc,
        fields,
    };
    meta.save(layout)?;
    Ok(meta)
}

/// Result of one merge, delivered over the completion channel. Only the
/// writer drains the channel and mutates the live segment list.
#[derive(Debug)]
pub enum MergeOutcome {
    Completed {
        merge_id: Uuid,
        sources: Vec<SegmentId>,
        meta: SegmentMeta,
    },
    Failed {
        merge_id: Uuid,
        sources: Vec<SegmentId>,
        error: String,
    },
}

/// Runs merges either inline in the caller's flow of control or on a thread
/// pool, reporting completion over a channel in both cases.
pub struct MergeExecutor {
    pool: Option<rayon::ThreadPool>,
    tx: Sender<MergeOutcome>,
    rx: Receiver<MergeOutcome>,
    in_flight: usize,
}

impl MergeExecutor {
    /// Execute merges synchronously in the caller's call stack.
    pub fn serial() -> Self {
        let (tx, rx) = unbounded();
        MergeExecutor { pool: None, tx, rx, in_flight: 0 }
    }

    /// Execute merges on a background pool.
    pub fn background(threads: usize) -> Result<Self> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .map_err(|e| Error::new(ErrorKind::Internal, e.to_string()))?;
        let (tx, rx) = unbounded();
        Ok(MergeExecutor { pool: Some(pool), tx, rx, in_flight: 0 })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn submit(&mut self, layout: StorageLayout, config: WriterConfig, merge: Merge) {
        self.in_flight += 1;
        let tx = self.tx.clone();
        let task = move || {
            let outcome = match merge_segments(&layout, &config, &merge) {
                Ok(meta) => MergeOutcome::Completed {
                    merge_id: merge.id,
                    sources: merge.segments.clone(),
                    meta,
                },
                Err(e) => MergeOutcome::Failed {
                    merge_id: merge.id,
                    sources: merge.segments.clone(),
                    error: e.to_string(),
                },
            };
            let _ = tx.send(outcome);
        };
        match &self.pool {
            Some(pool) => pool.spawn(task),
            None => task(),
        }
    }

    /// Block until every submitted merge has reported.
    pub fn wait_all(&mut self) -> Vec<MergeOutcome> {
        let mut outcomes = Vec::with_capacity(self.in_flight);
        while self.in_flight > 0 {
            match self.rx.recv() {
                Ok(outcome) => outcomes.push(outcome),
                Err(_) => break,
            }
            self.in_flight -= 1;
        }
        outcomes
    }
}
