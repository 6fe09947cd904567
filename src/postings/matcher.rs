use std::sync::Arc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::matching::{Matcher, NullMatcher};
use crate::postings::block::BlockReader;
use crate::postings::PostingFormat;
use crate::storage::mmap_file::MmapFile;

/// Leaf matcher over one term's on-disk posting blocks. Blocks stepped over
/// by `skip_to`/`skip_to_quality` are touched header-only; ids decode when a
/// block is actually landed on, features on first access per posting.
pub struct PostingMatcher {
    file: Arc<MmapFile>,
    format: PostingFormat,
    max_weight: f32,
    /// Blocks remaining after the current one.
    blocks_left: u32,
    block: Option<BlockReader>,
    /// Decoded ids of the current block; filled when the block is read.
    ids: Vec<u64>,
    index: usize,
}

impl PostingMatcher {
    pub fn open(
        file: Arc<MmapFile>,
        offset: u64,
        block_count: u32,
        format: PostingFormat,
        max_weight: f32,
    ) -> Result<Self> {
        if block_count == 0 {
            return Err(Error::new(ErrorKind::Parse, "term with zero posting blocks"));
        }
        let block = BlockReader::parse(file.clone(), offset as usize)?;
        let mut matcher = PostingMatcher {
            file,
            format,
            max_weight,
            blocks_left: block_count - 1,
            block: Some(block),
            ids: Vec::new(),
            index: 0,
        };
        matcher.load_ids()?;
        Ok(matcher)
    }

    fn load_ids(&mut self) -> Result<()> {
        if let Some(block) = &mut self.block {
            if self.ids.is_empty() {
                self.ids = block.ids()?.to_vec();
            }
        }
        Ok(())
    }

    /// Drop the current block and parse the next header. Ids stay undecoded
    /// so skip loops stay cheap.
    fn advance_block(&mut self) -> Result<()> {
        let end = match &self.block {
            Some(block) => block.end(),
            None => return Ok(()),
        };
        if self.blocks_left == 0 {
            self.block = None;
        } else {
            self.blocks_left -= 1;
            self.block = Some(BlockReader::parse(self.file.clone(), end)?);
        }
        self.ids.clear();
        self.index = 0;
        Ok(())
    }

    fn current(&self) -> Result<&BlockReader> {
        self.block
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidState, "read past matcher end"))
    }

    pub fn block_min_id(&self) -> Result<u64> {
        Ok(self.current()?.header.min_id)
    }

    pub fn block_max_id(&self) -> Result<u64> {
        Ok(self.current()?.header.max_id)
    }

    pub fn block_max_weight(&self) -> Result<f32> {
        Ok(self.current()?.header.max_weight)
    }

    pub fn block_min_length(&self) -> Result<u32> {
        Ok(self.current()?.header.min_length)
    }

    pub fn block_max_length(&self) -> Result<u32> {
        Ok(self.current()?.header.max_length)
    }
}

impl Matcher for PostingMatcher {
    fn is_active(&self) -> bool {
        match &self.block {
            Some(block) => self.index < block.len(),
            None => false,
        }
    }

    fn id(&self) -> DocId {
        self.ids
            .get(self.index)
            .map(|&id| DocId(id))
            .unwrap_or(DocId(u64::MAX))
    }

    fn next(&mut self) -> Result<bool> {
        if !self.is_active() {
            return Err(Error::new(ErrorKind::InvalidState, "read past matcher end"));
        }
        self.index += 1;
        let len = self.current()?.len();
        if self.index >= len {
            self.advance_block()?;
            self.load_ids()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn skip_to(&mut self, id: DocId) -> Result<()> {
        while let Some(block) = &self.block {
            if block.header.max_id >= id.0 {
                break;
            }
            self.advance_block()?;
        }
        self.load_ids()?;
        if self.block.is_some() {
            let at = self.ids.partition_point(|&x| x < id.0);
            self.index = self.index.max(at);
        }
        Ok(())
    }

    fn weight(&self) -> Result<f32> {
        self.current()?.weight_at(self.index)
    }

    fn score(&self) -> Result<f32> {
        self.weight()
    }

    fn max_quality(&self) -> Result<f32> {
        Ok(self.max_weight)
    }

    fn block_quality(&self) -> Result<f32> {
        self.block_max_weight()
    }

    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize> {
        let mut skipped = 0;
        while let Some(block) = &self.block {
            if block.header.max_weight > minquality {
                break;
            }
            self.advance_block()?;
            skipped += 1;
        }
        self.load_ids()?;
        Ok(skipped)
    }

    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher> {
        if !self.is_active() || self.max_weight < minquality {
            Box::new(NullMatcher)
        } else {
            self
        }
    }

    fn positions(&mut self) -> Result<Vec<u32>> {
        if !self.format.has_positions {
            return Err(Error::not_found("positions not tracked"));
        }
        let index = self.index;
        match &mut self.block {
            Some(block) => block.positions_at(index),
            None => Err(Error::new(ErrorKind::InvalidState, "read past matcher end")),
        }
    }

    fn chars(&mut self) -> Result<Vec<(u32, u32)>> {
        if !self.format.has_chars {
            return Err(Error::not_found("character ranges not tracked"));
        }
        let index = self.index;
        match &mut self.block {
            Some(block) => block.chars_at(index),
            None => Err(Error::new(ErrorKind::InvalidState, "read past matcher end")),
        }
    }

    fn payload(&mut self) -> Result<Vec<u8>> {
        if !self.format.has_payloads {
            return Err(Error::not_found("payloads not tracked"));
        }
        let index = self.index;
        match &self.block {
            Some(block) => block.payload_at(index),
            None => Err(Error::new(ErrorKind::InvalidState, "read past matcher end")),
        }
    }
}
