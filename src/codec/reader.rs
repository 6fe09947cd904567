use crc32fast::Hasher;
use roaring::RoaringBitmap;

use crate::codec::perdoc::PerDocReader;
use crate::codec::segment::{load_deletions, SegmentId, SegmentMeta, EXT_POSTINGS, EXT_SPELLING};
use crate::codec::termsreader::TermsReader;
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, Document};
use crate::fst::{within, GraphReader};
use crate::matching::Matcher;
use crate::postings::TermInfo;
use crate::storage::layout::StorageLayout;
use crate::storage::mmap_file::MmapFile;

/// Read side of one whole segment: term dictionary, postings, per-document
/// data, spelling graph and the deletion bitmap.
pub struct SegmentReader {
    pub meta: SegmentMeta,
    perdoc: PerDocReader,
    terms: TermsReader,
    spelling: GraphReader,
    deleted: RoaringBitmap,
}

impl SegmentReader {
    pub fn open(layout: &StorageLayout, id: &SegmentId) -> Result<Self> {
        let meta = SegmentMeta::load(layout, id)?;

        // The posting file carries no self-describing footer; its checksum
        // lives in the metadata and is verified here.
        let post_bytes = MmapFile::open_read_only(layout.segment_file(id, EXT_POSTINGS))?;
        let mut hasher = Hasher::new();
        hasher.update(post_bytes.data());
        if hasher.finalize() != meta.postings_crc {
            return Err(Error::format("posting file checksum mismatch"));
        }

        let perdoc = PerDocReader::open(layout, id)?;
        let terms = TermsReader::open(layout, id, meta.fields.clone())?;
        let spelling = GraphReader::open(layout.segment_file(id, EXT_SPELLING))?;
        let deleted = load_deletions(layout, id)?;

        Ok(SegmentReader {
            meta,
            perdoc,
            terms,
            spelling,
            deleted,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.meta.id
    }

    /// Documents written to the segment, including deleted ones.
    pub fn doc_count_all(&self) -> u64 {
        self.meta.doc_count_all
    }

    /// Live documents.
    pub fn doc_count(&self) -> u64 {
        self.meta.doc_count_all - self.deleted.len()
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.deleted.contains(doc_id.0 as u32)
    }

    pub fn deleted_docs(&self) -> &RoaringBitmap {
        &self.deleted
    }

    pub fn has_deletions(&self) -> bool {
        !self.deleted.is_empty()
    }

    pub fn terms(&self) -> &TermsReader {
        &self.terms
    }

    pub fn term_info(&self, field: &str, term: &[u8]) -> Result<TermInfo> {
        self.terms.term_info(field, term)
    }

    pub fn matcher(&self, field: &str, term: &[u8]) -> Result<Box<dyn Matcher>> {
        self.terms.matcher(field, term)
    }

    pub fn terms_from(&self, field: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.terms.terms_from(field, prefix)
    }

    pub fn stored_fields(&self, doc_id: DocId) -> Result<Document> {
        self.perdoc.stored_fields(doc_id)
    }

    pub fn field_length(&self, doc_id: DocId, field: &str) -> Result<u32> {
        self.perdoc.field_length(doc_id, field)
    }

    pub fn vector(&self, doc_id: DocId, field: &str) -> Result<Vec<(Vec<u8>, f32)>> {
        self.perdoc.vector(doc_id, field)
    }

    pub fn per_document(&self) -> &PerDocReader {
        &self.perdoc
    }

    pub fn spelling_reader(&self) -> &GraphReader {
        &self.spelling
    }

    /// Stored terms of `field` within `k` edits of `text`.
    pub fn suggest(&self, field: &str, text: &[u8], k: u32, prefix: usize) -> Result<Vec<Vec<u8>>> {
        within(&self.spelling, field, text, k, prefix)
    }
}
