use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::Path;
use crate::core::error::Result;

#[derive(Debug)]
enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// Read-only file bytes: memory-mapped when backed by a real file, owned when
/// built in memory. Both serve the same reader paths.
#[derive(Debug)]
pub struct MmapFile {
    source: Source,
    pub len: usize,
}

impl MmapFile {
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            // mmap of an empty file is invalid on some platforms
            return Ok(MmapFile { source: Source::Owned(Vec::new()), len: 0 });
        }

        let mmap = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(MmapFile { source: Source::Mapped(mmap), len })
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        MmapFile { source: Source::Owned(data), len }
    }

    pub fn data(&self) -> &[u8] {
        match &self.source {
            Source::Mapped(mmap) => &mmap[..],
            Source::Owned(vec) => &vec[..],
        }
    }
}
