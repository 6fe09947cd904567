use std::collections::BTreeMap;
use std::sync::Arc;

use crate::blueline::{KvCursor, RegionStore, StoreCursor, SuffixCursor};
use crate::codec::segment::{FieldInfo, SegmentId, EXT_POSTINGS};
use crate::codec::term_key;
use crate::core::config::StoreConfig;
use crate::core::error::{Error, Result};
use crate::matching::{ListMatcher, Matcher};
use crate::postings::{PostingMatcher, TermInfo, TermPostings};
use crate::storage::layout::StorageLayout;
use crate::storage::mmap_file::MmapFile;

/// Read side of one segment's inverted index: term dictionary lookups and
/// posting cursors.
pub struct TermsReader {
    store: RegionStore,
    post_file: Arc<MmapFile>,
    fields: BTreeMap<String, FieldInfo>,
}

impl TermsReader {
    pub fn open(
        layout: &StorageLayout,
        id: &SegmentId,
        fields: BTreeMap<String, FieldInfo>,
    ) -> Result<Self> {
        let store = RegionStore::open(
            &layout.segments_dir,
            &format!("{}.trm", id.0),
            StoreConfig::default(),
        )?;
        let post_file = Arc::new(MmapFile::open_read_only(
            layout.segment_file(id, EXT_POSTINGS),
        )?);
        Ok(TermsReader { store, post_file, fields })
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldInfo)> {
        self.fields.iter().map(|(name, info)| (name.as_str(), info))
    }

    /// Mapped posting file, shared with matchers and the raw merge path.
    pub fn posting_file(&self) -> Arc<MmapFile> {
        self.post_file.clone()
    }

    pub fn field_info(&self, field: &str) -> Result<&FieldInfo> {
        self.fields
            .get(field)
            .ok_or_else(|| Error::not_found(format!("field {:?}", field)))
    }

    pub fn term_info(&self, field: &str, term: &[u8]) -> Result<TermInfo> {
        let info = self.field_info(field)?;
        let key = term_key(info.id, term);
        let bytes = self.store.get(&key)?.ok_or_else(|| {
            Error::not_found(format!(
                "term {:?} in field {:?}",
                String::from_utf8_lossy(term),
                field
            ))
        })?;
        TermInfo::from_bytes(&bytes, &info.format)
    }

    pub fn has_term(&self, field: &str, term: &[u8]) -> Result<bool> {
        let info = self.field_info(field)?;
        self.store.contains_key(&term_key(info.id, term))
    }

    /// Leaf matcher over one term's postings, inline or on disk.
    pub fn matcher(&self, field: &str, term: &[u8]) -> Result<Box<dyn Matcher>> {
        let format = self.field_info(field)?.format;
        let info = self.term_info(field, term)?;
        match info.postings {
            TermPostings::Inline(postings) => Ok(Box::new(ListMatcher::new(postings))),
            TermPostings::OnDisk { offset, block_count } => Ok(Box::new(PostingMatcher::open(
                self.post_file.clone(),
                offset,
                block_count,
                format,
                info.max_weight,
            )?)),
        }
    }

    /// All terms of `field` from the first term >= `prefix` onward.
    pub fn terms_from(&self, field: &str, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut cursor = self.term_cursor(field)?;
        cursor.seek(prefix)?;
        let mut out = Vec::new();
        while let Some((term, _)) = cursor.entry()? {
            out.push(term);
            cursor.advance()?;
        }
        Ok(out)
    }

    /// Streaming (term, info) cursor over one field, for merges.
    pub fn term_cursor(&self, field: &str) -> Result<TermCursor> {
        let info = self.field_info(field)?;
        let mut inner = SuffixCursor::new(self.store.cursor(), info.id.to_be_bytes().to_vec());
        inner.first()?;
        Ok(TermCursor {
            inner,
            format: info.format,
        })
    }
}

/// Cursor over one field's (term, term info) entries in term order.
pub struct TermCursor {
    inner: SuffixCursor<StoreCursor>,
    format: crate::postings::PostingFormat,
}

impl TermCursor {
    pub fn seek(&mut self, term: &[u8]) -> Result<()> {
        self.inner.seek(term)
    }

    pub fn entry(&self) -> Result<Option<(Vec<u8>, TermInfo)>> {
        let key = match self.inner.key()? {
            Some(key) => key,
            None => return Ok(None),
        };
        let value = match self.inner.value()? {
            Some(value) => value,
            None => return Ok(None),
        };
        Ok(Some((key, TermInfo::from_bytes(&value, &self.format)?)))
    }

    pub fn advance(&mut self) -> Result<()> {
        self.inner.next()
    }
}
