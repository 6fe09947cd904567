use std::io::Write;
use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};

/// Describes one region without loading it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRef {
    pub offset: u64,
    pub length: u64,
    pub count: u32,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

/// Ordered list of region references composing one logical store. Regions
/// never overlap: `refs[i].max_key < refs[i+1].min_key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Toc {
    pub generation: u64,
    /// Committed length of the data file; bytes past this are uncommitted.
    pub data_len: u64,
    pub refs: Vec<BlockRef>,
}

impl Toc {
    pub fn validate(&self) -> Result<()> {
        for window in self.refs.windows(2) {
            if window[0].max_key >= window[1].min_key {
                return Err(Error::new(
                    ErrorKind::Internal,
                    "overlapping regions in table of contents",
                ));
            }
        }
        Ok(())
    }

    pub fn item_count(&self) -> u64 {
        self.refs.iter().map(|r| r.count as u64).sum()
    }

    /// Index of the region owning `key`: the first ref whose max_key >= key.
    pub fn owner_of(&self, key: &[u8]) -> Option<usize> {
        let idx = self.refs.partition_point(|r| r.max_key.as_slice() < key);
        if idx < self.refs.len() { Some(idx) } else { None }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let toc: Toc = bincode::deserialize(&data)
            .map_err(|e| Error::format(format!("unreadable table of contents: {}", e)))?;
        toc.validate()?;
        Ok(toc)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Toc::default())
        }
    }

    /// Write-to-temp then rename, so readers see either the old or the new
    /// table, never a partial one.
    pub fn save_atomic(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let path = path.as_ref();
        let dir = path
            .parent()
            .ok_or_else(|| Error::new(ErrorKind::Io, "table of contents path has no parent"))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let encoded = bincode::serialize(self)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| Error::new(ErrorKind::Io, format!("replace table of contents: {}", e)))?;
        Ok(())
    }
}
