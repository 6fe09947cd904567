use std::path::{Path, PathBuf};
use std::fs;
use crate::core::error::Result;
use crate::codec::segment::SegmentId;

/// Directory structure for index files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub segments_dir: PathBuf,  // Segment file sets
    pub meta_dir: PathBuf,      // TOC and metadata files
}

impl StorageLayout {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let segments_dir = base_dir.join("segments");
        let meta_dir = base_dir.join("meta");

        fs::create_dir_all(&segments_dir)?;
        fs::create_dir_all(&meta_dir)?;

        Ok(StorageLayout {
            base_dir,
            segments_dir,
            meta_dir,
        })
    }

    /// One file of a segment's file set: `<uuid>.<ext>`.
    pub fn segment_file(&self, id: &SegmentId, ext: &str) -> PathBuf {
        self.segments_dir.join(format!("{}.{}", id.0, ext))
    }

    pub fn toc_path(&self) -> PathBuf {
        self.meta_dir.join("index.toc")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }
}
