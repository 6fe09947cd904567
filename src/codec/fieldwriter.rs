use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

use crc32fast::Hasher;

use crate::blueline::StoreWriter;
use crate::codec::segment::{FieldInfo, SegmentId, EXT_POSTINGS, EXT_SPELLING};
use crate::codec::term_key;
use crate::core::config::StoreConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::fst::{GraphWriter, Value, ValuesType};
use crate::postings::block::{encode_block, BlockHeader};
use crate::postings::{Posting, PostingFormat, TermInfo, TermPostings, BLOCK_CAPACITY};
use crate::storage::layout::StorageLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Between,
    InField,
    InTerm,
}

/// Streams one segment's inverted index: term infos into the term store,
/// posting blocks into the posting file, terms into the spelling graph.
/// Fields and terms must arrive in ascending order; that is what allows
/// writing block-by-block without buffering the dictionary.
pub struct FieldWriter {
    store: StoreWriter,
    post_file: File,
    post_pos: u64,
    post_crc: Hasher,
    graph: GraphWriter,
    state: WriterState,
    fields: BTreeMap<String, FieldInfo>,
    current_field: String,
    current_format: PostingFormat,
    current_field_id: u16,
    last_term: Option<Vec<u8>>,
    term: Vec<u8>,
    info: TermInfo,
    buffer: Vec<Posting>,
    blocks_flushed: u32,
    term_offset: u64,
    inline_limit: usize,
}

impl FieldWriter {
    pub fn new(layout: &StorageLayout, id: SegmentId, inline_limit: usize) -> Result<Self> {
        let store = StoreWriter::open(
            &layout.segments_dir,
            &format!("{}.trm", id.0),
            StoreConfig::default(),
            false,
        )?;
        let post_file = File::create(layout.segment_file(&id, EXT_POSTINGS))?;
        let graph = GraphWriter::create(layout.segment_file(&id, EXT_SPELLING), ValuesType::None)?;

        Ok(FieldWriter {
            store,
            post_file,
            post_pos: 0,
            post_crc: Hasher::new(),
            graph,
            state: WriterState::Between,
            fields: BTreeMap::new(),
            current_field: String::new(),
            current_format: PostingFormat::existence(),
            current_field_id: 0,
            last_term: None,
            term: Vec::new(),
            info: TermInfo::new(),
            buffer: Vec::new(),
            blocks_flushed: 0,
            term_offset: 0,
            inline_limit,
        })
    }

    pub fn start_field(&mut self, name: &str, format: PostingFormat) -> Result<()> {
        if self.state != WriterState::Between {
            return Err(Error::new(ErrorKind::InvalidState, "field already open"));
        }
        if let Some((last, _)) = self.fields.iter().next_back() {
            if name <= last.as_str() {
                return Err(Error::out_of_order(format!(
                    "field {:?} after {:?}",
                    name, last
                )));
            }
        }
        self.current_field_id = self.fields.len() as u16;
        self.current_field = name.to_string();
        self.current_format = format;
        self.fields.insert(
            name.to_string(),
            FieldInfo { id: self.current_field_id, format },
        );
        self.graph.start_field(name)?;
        self.last_term = None;
        self.state = WriterState::InField;
        Ok(())
    }

    pub fn start_term(&mut self, term: &[u8]) -> Result<()> {
        if self.state != WriterState::InField {
            return Err(Error::new(ErrorKind::InvalidState, "no field open"));
        }
        if let Some(last) = &self.last_term {
            if term <= last.as_slice() {
                return Err(Error::out_of_order(format!(
                    "term {:?} after {:?}",
                    String::from_utf8_lossy(term),
                    String::from_utf8_lossy(last)
                )));
            }
        }
        self.term = term.to_vec();
        self.info = TermInfo::new();
        self.buffer.clear();
        self.blocks_flushed = 0;
        self.term_offset = self.post_pos;
        self.state = WriterState::InTerm;
        Ok(())
    }

    pub fn add_posting(&mut self, posting: Posting) -> Result<()> {
        if self.state != WriterState::InTerm {
            return Err(Error::new(ErrorKind::InvalidState, "no term open"));
        }
        if self.info.doc_freq > 0 && posting.doc_id.0 <= self.info.max_id {
            return Err(Error::out_of_order(format!(
                "doc {} after {}",
                posting.doc_id.0, self.info.max_id
            )));
        }
        self.info.observe(&posting);
        self.buffer.push(posting);
        if self.buffer.len() >= BLOCK_CAPACITY {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Append an already-encoded (and re-based) block verbatim. The caller
    /// folds the source stats in via `absorb_stats` afterwards.
    pub fn add_raw_block(&mut self, block: &[u8]) -> Result<()> {
        if self.state != WriterState::InTerm {
            return Err(Error::new(ErrorKind::InvalidState, "no term open"));
        }
        let header = BlockHeader::parse(block, 0)?;
        if self.info.doc_freq > 0 && header.min_id <= self.info.max_id {
            return Err(Error::out_of_order(format!(
                "raw block min id {} after {}",
                header.min_id, self.info.max_id
            )));
        }
        self.flush_block()?;
        self.emit(block)?;
        self.blocks_flushed += 1;
        Ok(())
    }

    /// Fold a source segment's term statistics into the current term, with
    /// its ids shifted by `id_offset`.
    pub fn absorb_stats(&mut self, source: &TermInfo, id_offset: u64) -> Result<()> {
        if self.state != WriterState::InTerm {
            return Err(Error::new(ErrorKind::InvalidState, "no term open"));
        }
        self.info.total_weight += source.total_weight;
        self.info.doc_freq += source.doc_freq;
        self.info.min_length = self.info.min_length.min(source.min_length);
        self.info.max_length = self.info.max_length.max(source.max_length);
        self.info.max_weight = self.info.max_weight.max(source.max_weight);
        self.info.min_id = self.info.min_id.min(source.min_id + id_offset);
        self.info.max_id = self.info.max_id.max(source.max_id + id_offset);
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.post_crc.update(bytes);
        self.post_file.write_all(bytes)?;
        self.post_pos += bytes.len() as u64;
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let block = encode_block(&self.current_format, &self.buffer)?;
        self.emit(&block)?;
        self.blocks_flushed += 1;
        self.buffer.clear();
        Ok(())
    }

    pub fn finish_term(&mut self) -> Result<()> {
        if self.state != WriterState::InTerm {
            return Err(Error::new(ErrorKind::InvalidState, "no term open"));
        }
        if self.info.doc_freq == 0 {
            return Err(Error::new(ErrorKind::InvalidState, "term with no postings"));
        }

        if self.blocks_flushed == 0 && self.buffer.len() <= self.inline_limit {
            self.info.postings = TermPostings::Inline(std::mem::take(&mut self.buffer));
        } else {
            self.flush_block()?;
            self.info.postings = TermPostings::OnDisk {
                offset: self.term_offset,
                block_count: self.blocks_flushed,
            };
        }

        let key = term_key(self.current_field_id, &self.term);
        let encoded = self.info.to_bytes(&self.current_format)?;
        self.store.insert(&key, &encoded)?;
        let term = std::mem::take(&mut self.term);
        self.graph.insert(&term, Value::None)?;

        self.last_term = Some(term);
        self.state = WriterState::InField;
        Ok(())
    }

    pub fn finish_field(&mut self) -> Result<()> {
        if self.state != WriterState::InField {
            return Err(Error::new(ErrorKind::InvalidState, "no field open"));
        }
        self.graph.finish_field()?;
        self.state = WriterState::Between;
        Ok(())
    }

    /// Commit the term store, close the spelling graph and posting file.
    /// Returns the collected field directory plus posting-file size and
    /// checksum for the segment metadata.
    pub fn close(mut self) -> Result<(BTreeMap<String, FieldInfo>, u64, u32)> {
        if self.state != WriterState::Between {
            return Err(Error::new(ErrorKind::InvalidState, "field still open"));
        }
        self.post_file.sync_all()?;
        self.store.commit()?;
        self.graph.close()?;
        let crc = self.post_crc.finalize();
        Ok((self.fields, self.post_pos, crc))
    }
}
