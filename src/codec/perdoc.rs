use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::codec::segment::{SegmentId, EXT_COLUMNS, EXT_STORED, EXT_VECTORS};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, Document, FieldValue};
use crate::storage::layout::StorageLayout;
use crate::storage::mmap_file::MmapFile;

/// Compression for stored-field blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    Lz4,
    Zstd,
}

impl CompressionType {
    fn tag(&self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Lz4 => 1,
            CompressionType::Zstd => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            2 => Ok(CompressionType::Zstd),
            _ => Err(Error::format(format!("unknown compression tag {}", tag))),
        }
    }
}

pub fn compress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionType::Zstd => {
            zstd::stream::encode_all(data, 0).map_err(|e| Error::new(ErrorKind::Io, e.to_string()))
        }
    }
}

pub fn decompress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| Error::new(ErrorKind::Parse, e.to_string())),
        CompressionType::Zstd => {
            zstd::stream::decode_all(data).map_err(|e| Error::new(ErrorKind::Parse, e.to_string()))
        }
    }
}

/// Stored-file footer: offsets array, doc count, compression tag, checksum.
const FOOTER_TAIL: usize = 8 + 1 + 4;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ColumnsData {
    /// Per-field length column, one entry per document.
    lengths: BTreeMap<String, Vec<u32>>,
}

type VectorData = BTreeMap<String, BTreeMap<u64, Vec<(Vec<u8>, f32)>>>;

/// Writes the per-document side of a segment: stored-field blocks, length
/// columns and optional term vectors. Documents arrive in id order.
pub struct PerDocWriter {
    layout: StorageLayout,
    id: SegmentId,
    compression: CompressionType,
    stored: File,
    stored_pos: u64,
    crc: Hasher,
    offsets: Vec<u64>,
    lengths: BTreeMap<String, Vec<u32>>,
    vectors: VectorData,
    current: Option<Document>,
    doc_count: u64,
}

impl PerDocWriter {
    pub fn new(layout: &StorageLayout, id: SegmentId, compression: CompressionType) -> Result<Self> {
        let stored = File::create(layout.segment_file(&id, EXT_STORED))?;
        Ok(PerDocWriter {
            layout: layout.clone(),
            id,
            compression,
            stored,
            stored_pos: 0,
            crc: Hasher::new(),
            offsets: Vec::new(),
            lengths: BTreeMap::new(),
            vectors: BTreeMap::new(),
            current: None,
            doc_count: 0,
        })
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.crc.update(bytes);
        self.stored.write_all(bytes)?;
        self.stored_pos += bytes.len() as u64;
        Ok(())
    }

    /// Documents are numbered sequentially from zero within the segment.
    pub fn start_doc(&mut self, doc_id: DocId) -> Result<()> {
        if self.current.is_some() {
            return Err(Error::new(ErrorKind::InvalidState, "document already open"));
        }
        if doc_id.0 != self.doc_count {
            return Err(Error::out_of_order(format!(
                "doc {} after {} docs",
                doc_id.0, self.doc_count
            )));
        }
        self.current = Some(Document::new());
        Ok(())
    }

    pub fn add_stored(&mut self, field: &str, value: FieldValue) -> Result<()> {
        match &mut self.current {
            Some(doc) => {
                doc.fields.insert(field.to_string(), value);
                Ok(())
            }
            None => Err(Error::new(ErrorKind::InvalidState, "no document open")),
        }
    }

    pub fn add_field_length(&mut self, field: &str, length: u32) -> Result<()> {
        if self.current.is_none() {
            return Err(Error::new(ErrorKind::InvalidState, "no document open"));
        }
        let column = self.lengths.entry(field.to_string()).or_default();
        column.resize(self.doc_count as usize, 0);
        column.push(length);
        Ok(())
    }

    pub fn add_vector(&mut self, field: &str, entries: Vec<(Vec<u8>, f32)>) -> Result<()> {
        if self.current.is_none() {
            return Err(Error::new(ErrorKind::InvalidState, "no document open"));
        }
        self.vectors
            .entry(field.to_string())
            .or_default()
            .insert(self.doc_count, entries);
        Ok(())
    }

    pub fn finish_doc(&mut self) -> Result<()> {
        let doc = self
            .current
            .take()
            .ok_or_else(|| Error::new(ErrorKind::InvalidState, "no document open"))?;
        let raw = bincode::serialize(&doc)?;
        let block = compress(&raw, self.compression)?;

        self.offsets.push(self.stored_pos);
        let len = (block.len() as u32).to_le_bytes();
        self.emit(&len)?;
        self.emit(&block)?;

        // Length columns stay aligned even for fields this doc skipped.
        self.doc_count += 1;
        Ok(())
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    /// Write footers and sidecar files. Returns total bytes written.
    pub fn close(mut self) -> Result<u64> {
        if self.current.is_some() {
            return Err(Error::new(ErrorKind::InvalidState, "document still open"));
        }

        let offsets = std::mem::take(&mut self.offsets);
        for offset in &offsets {
            let bytes = offset.to_le_bytes();
            self.emit(&bytes)?;
        }
        let count_bytes = self.doc_count.to_le_bytes();
        self.emit(&count_bytes)?;
        let tag = [self.compression.tag()];
        self.emit(&tag)?;
        let crc = std::mem::replace(&mut self.crc, Hasher::new()).finalize();
        self.stored.write_all(&crc.to_le_bytes())?;
        self.stored_pos += 4;
        self.stored.sync_all()?;

        // Columns sidecar.
        let mut columns = ColumnsData::default();
        for (field, mut column) in std::mem::take(&mut self.lengths) {
            column.resize(self.doc_count as usize, 0);
            columns.lengths.insert(field, column);
        }
        let col_bytes = checksummed(&bincode::serialize(&columns)?);
        fs::write(self.layout.segment_file(&self.id, EXT_COLUMNS), &col_bytes)?;

        // Vectors sidecar, only when any document carried one.
        let mut total = self.stored_pos + col_bytes.len() as u64;
        if !self.vectors.is_empty() {
            let vec_bytes = checksummed(&bincode::serialize(&self.vectors)?);
            fs::write(self.layout.segment_file(&self.id, EXT_VECTORS), &vec_bytes)?;
            total += vec_bytes.len() as u64;
        }
        Ok(total)
    }
}

fn checksummed(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let mut hasher = Hasher::new();
    hasher.update(data);
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
    out
}

fn verify_checksum(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 4 {
        return Err(Error::format("file shorter than its checksum"));
    }
    let (body, tail) = data.split_at(data.len() - 4);
    let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let mut hasher = Hasher::new();
    hasher.update(body);
    if hasher.finalize() != expected {
        return Err(Error::format("checksum mismatch"));
    }
    Ok(body)
}

/// Read side of the per-document data.
pub struct PerDocReader {
    stored: Arc<MmapFile>,
    offsets_off: usize,
    doc_count: u64,
    compression: CompressionType,
    lengths: BTreeMap<String, Vec<u32>>,
    vectors: VectorData,
}

impl PerDocReader {
    pub fn open(layout: &StorageLayout, id: &SegmentId) -> Result<Self> {
        let stored = Arc::new(MmapFile::open_read_only(
            layout.segment_file(id, EXT_STORED),
        )?);
        let bytes = stored.data();
        if bytes.len() < FOOTER_TAIL {
            return Err(Error::format("stored-fields file shorter than footer"));
        }
        verify_checksum(bytes)?;

        let tag_at = bytes.len() - 5;
        let compression = CompressionType::from_tag(bytes[tag_at])?;
        let count_at = bytes.len() - FOOTER_TAIL;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[count_at..count_at + 8]);
        let doc_count = u64::from_le_bytes(raw);
        let offsets_len = (doc_count as usize) * 8;
        if bytes.len() < FOOTER_TAIL + offsets_len {
            return Err(Error::format("stored-fields footer out of range"));
        }
        let offsets_off = count_at - offsets_len;

        let col_data = fs::read(layout.segment_file(id, EXT_COLUMNS))?;
        let columns: ColumnsData = bincode::deserialize(verify_checksum(&col_data)?)?;

        let vec_path = layout.segment_file(id, EXT_VECTORS);
        let vectors: VectorData = if vec_path.exists() {
            let vec_data = fs::read(vec_path)?;
            bincode::deserialize(verify_checksum(&vec_data)?)?
        } else {
            BTreeMap::new()
        };

        Ok(PerDocReader {
            stored,
            offsets_off,
            doc_count,
            compression,
            lengths: columns.lengths,
            vectors,
        })
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    pub fn stored_fields(&self, doc_id: DocId) -> Result<Document> {
        if doc_id.0 >= self.doc_count {
            return Err(Error::not_found(format!("document {}", doc_id.0)));
        }
        let bytes = self.stored.data();
        let at = self.offsets_off + doc_id.0 as usize * 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[at..at + 8]);
        let offset = u64::from_le_bytes(raw) as usize;
        if bytes.len() < offset + 4 {
            return Err(Error::new(ErrorKind::Parse, "stored block out of range"));
        }
        let len =
            u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
                as usize;
        if bytes.len() < offset + 4 + len {
            return Err(Error::new(ErrorKind::Parse, "stored block out of range"));
        }
        let raw_doc = decompress(&bytes[offset + 4..offset + 4 + len], self.compression)?;
        Ok(bincode::deserialize(&raw_doc)?)
    }

    pub fn field_length(&self, doc_id: DocId, field: &str) -> Result<u32> {
        let column = self
            .lengths
            .get(field)
            .ok_or_else(|| Error::not_found(format!("length column for field {:?}", field)))?;
        column
            .get(doc_id.0 as usize)
            .copied()
            .ok_or_else(|| Error::not_found(format!("document {}", doc_id.0)))
    }

    pub fn has_vectors(&self, field: &str) -> bool {
        self.vectors.contains_key(field)
    }

    /// Fields with a length column.
    pub fn length_fields(&self) -> impl Iterator<Item = &str> {
        self.lengths.keys().map(|s| s.as_str())
    }

    /// Fields with recorded term vectors.
    pub fn vector_fields(&self) -> impl Iterator<Item = &str> {
        self.vectors.keys().map(|s| s.as_str())
    }

    pub fn vector(&self, doc_id: DocId, field: &str) -> Result<Vec<(Vec<u8>, f32)>> {
        self.vectors
            .get(field)
            .and_then(|per_doc| per_doc.get(&doc_id.0))
            .cloned()
            .ok_or_else(|| {
                Error::not_found(format!("vector for doc {} field {:?}", doc_id.0, field))
            })
    }
}
