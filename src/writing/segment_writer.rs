use std::collections::BTreeMap;
use chrono::Utc;

use crate::codec::fieldwriter::FieldWriter;
use crate::codec::perdoc::PerDocWriter;
use crate::codec::segment::{SegmentId, SegmentMeta, META_VERSION};
use crate::core::config::WriterConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, FieldValue};
use crate::postings::{Posting, PostingFormat};
use crate::storage::layout::StorageLayout;

/// One term occurrence handed to the writer by the (external) analysis
/// layer.
#[derive(Debug, Clone)]
pub struct PostingInput {
    pub term: Vec<u8>,
    pub weight: f32,
    pub positions: Option<Vec<u32>>,
    pub chars: Option<Vec<(u32, u32)>>,
    pub payload: Option<Vec<u8>>,
}

impl PostingInput {
    pub fn term(term: &[u8]) -> Self {
        PostingInput {
            term: term.to_vec(),
            weight: 1.0,
            positions: None,
            chars: None,
            payload: None,
        }
    }

    pub fn weighted(term: &[u8], weight: f32) -> Self {
        PostingInput { weight, ..PostingInput::term(term) }
    }
}

/// Everything the writer needs for one field of one document.
#[derive(Debug, Clone)]
pub struct FieldContent {
    pub format: PostingFormat,
    pub stored: Option<FieldValue>,
    /// Field length for normalization; defaults to the posting count.
    pub length: Option<u32>,
    pub postings: Vec<PostingInput>,
    /// Record a term vector for this field.
    pub vector: bool,
}

impl FieldContent {
    pub fn new(format: PostingFormat) -> Self {
        FieldContent {
            format,
            stored: None,
            length: None,
            postings: Vec::new(),
            vector: false,
        }
    }
}

/// A document already analyzed into per-field stored values and postings.
#[derive(Debug, Clone, Default)]
pub struct IndexedDocument {
    pub fields: BTreeMap<String, FieldContent>,
}

impl IndexedDocument {
    pub fn new() -> Self {
        IndexedDocument { fields: BTreeMap::new() }
    }

    pub fn set_field(&mut self, name: &str, content: FieldContent) {
        self.fields.insert(name.to_string(), content);
    }

    pub fn posting_count(&self) -> usize {
        self.fields.values().map(|f| f.postings.len()).sum()
    }

    /// True if any posting of `field` carries `term`.
    pub fn contains_term(&self, field: &str, term: &[u8]) -> bool {
        self.fields
            .get(field)
            .map(|f| f.postings.iter().any(|p| p.term == term))
            .unwrap_or(false)
    }
}

/// Buffers documents in memory; on flush, postings are sorted by (field,
/// term, doc) and replayed through the segment codec's writers.
pub struct SegmentWriter {
    layout: StorageLayout,
    config: WriterConfig,
    docs: Vec<IndexedDocument>,
    post_count: usize,
}

impl SegmentWriter {
    pub fn new(layout: StorageLayout, config: WriterConfig) -> Self {
        SegmentWriter {
            layout,
            config,
            docs: Vec::new(),
            post_count: 0,
        }
    }

    pub fn add_document(&mut self, doc: IndexedDocument) {
        self.post_count += doc.posting_count();
        self.docs.push(doc);
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub fn post_count(&self) -> usize {
        self.post_count
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Buffer thresholds that trigger an automatic flush.
    pub fn over_limits(&self) -> bool {
        self.docs.len() >= self.config.doc_limit || self.post_count >= self.config.post_limit
    }

    /// Drop buffered documents whose `field` carries `term`. Returns how
    /// many were removed.
    pub fn remove_matching(&mut self, field: &str, term: &[u8]) -> usize {
        let before = self.docs.len();
        self.docs.retain(|doc| !doc.contains_term(field, term));
        let removed = before - self.docs.len();
        if removed > 0 {
            self.post_count = self.docs.iter().map(|d| d.posting_count()).sum();
        }
        removed
    }

    /// Write the buffered documents as one new segment. Returns None when
    /// nothing is buffered.
    pub fn flush(&mut self) -> Result<Option<SegmentMeta>> {
        if self.docs.is_empty() {
            return Ok(None);
        }
        let docs = std::mem::take(&mut self.docs);
        self.post_count = 0;

        let id = SegmentId::new();
        let mut perdoc = PerDocWriter::new(&self.layout, id, self.config.stored_compression)?;

        // field -> (format, term -> postings in doc order)
        let mut inverted: BTreeMap<String, (PostingFormat, BTreeMap<Vec<u8>, Vec<Posting>>)> =
            BTreeMap::new();

        for (doc_index, doc) in docs.iter().enumerate() {
            let doc_id = DocId(doc_index as u64);
            perdoc.start_doc(doc_id)?;
            for (name, content) in &doc.fields {
                let length = content.length.unwrap_or(content.postings.len() as u32);
                if let Some(value) = &content.stored {
                    perdoc.add_stored(name, value.clone())?;
                }
                if !content.postings.is_empty() {
                    perdoc.add_field_length(name, length)?;
                }
                if content.vector {
                    let mut entries: Vec<(Vec<u8>, f32)> = content
                        .postings
                        .iter()
                        .map(|p| (p.term.clone(), p.weight))
                        .collect();
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                    perdoc.add_vector(name, entries)?;
                }

                let (format, terms) = inverted
                    .entry(name.clone())
                    .or_insert_with(|| (content.format, BTreeMap::new()));
                if *format != content.format {
                    return Err(Error::new(
                        ErrorKind::InvalidState,
                        format!("conflicting posting formats for field {:?}", name),
                    ));
                }
                // Multiple postings of one term in one document collapse to
                // one entry with summed weight and concatenated features.
                let mut per_term: BTreeMap<Vec<u8>, Posting> = BTreeMap::new();
                for input in &content.postings {
                    let entry = per_term.entry(input.term.clone()).or_insert_with(|| Posting {
                        doc_id,
                        length: format.has_lengths.then_some(length),
                        weight: format.has_weights.then_some(0.0),
                        positions: format.has_positions.then(Vec::new),
                        chars: format.has_chars.then(Vec::new),
                        payload: format.has_payloads.then(Vec::new),
                    });
                    if let Some(w) = &mut entry.weight {
                        *w += input.weight;
                    }
                    if let (Some(all), Some(new)) = (&mut entry.positions, &input.positions) {
                        all.extend_from_slice(new);
                    }
                    if let (Some(all), Some(new)) = (&mut entry.chars, &input.chars) {
                        all.extend_from_slice(new);
                    }
                    if let (Some(all), Some(new)) = (&mut entry.payload, &input.payload) {
                        all.extend_from_slice(new);
                    }
                }
                for (term, posting) in per_term {
                    terms.entry(term).or_default().push(posting);
                }
            }
            perdoc.finish_doc()?;
        }

        let doc_count_all = perdoc.doc_count();
        let perdoc_bytes = perdoc.close()?;

        let mut fw = FieldWriter::new(&self.layout, id, self.config.inline_limit)?;
        for (name, (format, terms)) in inverted {
            fw.start_field(&name, format)?;
            for (term, postings) in terms {
                fw.start_term(&term)?;
                for posting in postings {
                    fw.add_posting(posting)?;
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
        meta.save(&self.layout)?;
        Ok(Some(meta))
    }
}
