use std::collections::BTreeMap;
use std::fs;
use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{Error, Result};
use crate::postings::PostingFormat;
use crate::storage::layout::StorageLayout;

/// Unique segment identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub Uuid);

impl SegmentId {
    pub fn new() -> Self {
        SegmentId(Uuid::new_v4())
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        SegmentId::new()
    }
}

/// One segment's file set. Every file shares the segment id stem; the whole
/// set is deleted together once the segment is unreferenced.
pub const EXT_TERMS_DATA: &str = "trm.dat";
pub const EXT_TERMS_TOC: &str = "trm.toc";
pub const EXT_TERMS_LOCK: &str = "trm.lock";
pub const EXT_POSTINGS: &str = "pst";
pub const EXT_STORED: &str = "sto";
pub const EXT_COLUMNS: &str = "col";
pub const EXT_VECTORS: &str = "vec";
pub const EXT_SPELLING: &str = "fsg";
pub const EXT_DELETIONS: &str = "del";
pub const EXT_META: &str = "met";

pub const ALL_EXTENSIONS: &[&str] = &[
    EXT_TERMS_DATA,
    EXT_TERMS_TOC,
    EXT_TERMS_LOCK,
    EXT_POSTINGS,
    EXT_STORED,
    EXT_COLUMNS,
    EXT_VECTORS,
    EXT_SPELLING,
    EXT_DELETIONS,
    EXT_META,
];

pub const META_VERSION: u32 = 1;

/// Per-field codec facts recorded in the segment metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: u16,
    pub format: PostingFormat,
}

/// Persisted description of one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub version: u32,
    pub id: SegmentId,
    pub created_at: DateTime<Utc>,
    /// Documents written, including ones later marked deleted.
    pub doc_count_all: u64,
    pub size_bytes: u64,
    /// Checksum of the posting file, verified at open.
    pub postings_crc: u32,
    pub fields: BTreeMap<String, FieldInfo>,
}

impl SegmentMeta {
    pub fn save(&self, layout: &StorageLayout) -> Result<()> {
        let encoded = bincode::serialize(self)?;
        fs::write(layout.segment_file(&self.id, EXT_META), encoded)?;
        Ok(())
    }

    pub fn load(layout: &StorageLayout, id: &SegmentId) -> Result<Self> {
        let path = layout.segment_file(id, EXT_META);
        let data = fs::read(&path)
            .map_err(|_| Error::not_found(format!("segment metadata {}", path.display())))?;
        let meta: SegmentMeta = bincode::deserialize(&data)
            .map_err(|e| Error::format(format!("unreadable segment metadata: {}", e)))?;
        if meta.version != META_VERSION {
            return Err(Error::format(format!(
                "unsupported segment version {}",
                meta.version
            )));
        }
        Ok(meta)
    }
}

/// Deletion bitmap sidecar, written in place as docs are marked deleted.
pub fn save_deletions(layout: &StorageLayout, id: &SegmentId, deleted: &RoaringBitmap) -> Result<()> {
    let mut bytes = Vec::with_capacity(deleted.serialized_size());
    deleted.serialize_into(&mut bytes)?;
    fs::write(layout.segment_file(id, EXT_DELETIONS), bytes)?;
    Ok(())
}

pub fn load_deletions(layout: &StorageLayout, id: &SegmentId) -> Result<RoaringBitmap> {
    let path = layout.segment_file(id, EXT_DELETIONS);
    if !path.exists() {
        return Ok(RoaringBitmap::new());
    }
    let data = fs::read(path)?;
    let bitmap = RoaringBitmap::deserialize_from(&data[..])
        .map_err(|e| Error::format(format!("unreadable deletion bitmap: {}", e)))?;
    Ok(bitmap)
}

/// Remove every file of a segment's file set.
pub fn delete_segment_files(layout: &StorageLayout, id: &SegmentId) -> Result<()> {
    for ext in ALL_EXTENSIONS {
        let path = layout.segment_file(id, ext);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}
