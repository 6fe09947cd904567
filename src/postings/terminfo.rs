use std::sync::Arc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::postings::block::{encode_block, BlockReader};
use crate::postings::{Posting, PostingFormat};
use crate::storage::mmap_file::MmapFile;
use crate::util::varint::{read_varint, write_varint};

const TAG_INLINE: u8 = 0;
const TAG_ON_DISK: u8 = 1;

/// Where a term's postings live: very short lists stay inline in the term
/// dictionary entry, everything else points into the posting file.
#[derive(Debug, Clone, PartialEq)]
pub enum TermPostings {
    Inline(Vec<Posting>),
    OnDisk { offset: u64, block_count: u32 },
}

/// Aggregate statistics for one field+term across all of its blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct TermInfo {
    pub total_weight: f32,
    pub doc_freq: u32,
    pub min_length: u32,
    pub max_length: u32,
    pub max_weight: f32,
    pub min_id: u64,
    pub max_id: u64,
    pub postings: TermPostings,
}

impl TermInfo {
    pub fn new() -> Self {
        TermInfo {
            total_weight: 0.0,
            doc_freq: 0,
            min_length: u32::MAX,
            max_length: 0,
            max_weight: 0.0,
            min_id: u64::MAX,
            max_id: 0,
            postings: TermPostings::Inline(Vec::new()),
        }
    }

    /// Fold one posting into the aggregates.
    pub fn observe(&mut self, posting: &Posting) {
        let weight = posting.weight.unwrap_or(1.0);
        let length = posting.length.unwrap_or(1);
        self.total_weight += weight;
        self.doc_freq += 1;
        self.min_length = self.min_length.min(length);
        self.max_length = self.max_length.max(length);
        self.max_weight = self.max_weight.max(weight);
        self.min_id = self.min_id.min(posting.doc_id.0);
        self.max_id = self.max_id.max(posting.doc_id.0);
    }

    pub fn to_bytes(&self, format: &PostingFormat) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match &self.postings {
            TermPostings::Inline(_) => out.push(TAG_INLINE),
            TermPostings::OnDisk { .. } => out.push(TAG_ON_DISK),
        }
        out.extend_from_slice(&self.total_weight.to_le_bytes());
        write_varint(&mut out, self.doc_freq as u64);
        write_varint(&mut out, self.min_length as u64);
        write_varint(&mut out, self.max_length as u64);
        out.extend_from_slice(&self.max_weight.to_le_bytes());
        write_varint(&mut out, self.min_id);
        write_varint(&mut out, self.max_id);
        match &self.postings {
            TermPostings::Inline(postings) => {
                let block = encode_block(format, postings)?;
                write_varint(&mut out, block.len() as u64);
                out.extend_from_slice(&block);
            }
            TermPostings::OnDisk { offset, block_count } => {
                write_varint(&mut out, *offset);
                write_varint(&mut out, *block_count as u64);
            }
        }
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8], format: &PostingFormat) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(Error::new(ErrorKind::Parse, "truncated term info"));
        }
        let tag = bytes[0];
        let total_weight = f32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let mut pos = 5;
        let (doc_freq, n) = read_varint(&bytes[pos..])?;
        pos += n;
        let (min_length, n) = read_varint(&bytes[pos..])?;
        pos += n;
        let (max_length, n) = read_varint(&bytes[pos..])?;
        pos += n;
        if bytes.len() < pos + 4 {
            return Err(Error::new(ErrorKind::Parse, "truncated term info"));
        }
        let max_weight =
            f32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);
        pos += 4;
        let (min_id, n) = read_varint(&bytes[pos..])?;
        pos += n;
        let (max_id, n) = read_varint(&bytes[pos..])?;
        pos += n;

        let postings = match tag {
            TAG_INLINE => {
                let (len, n) = read_varint(&bytes[pos..])?;
                pos += n;
                let len = len as usize;
                if bytes.len() < pos + len {
                    return Err(Error::new(ErrorKind::Parse, "truncated inline postings"));
                }
                let block = bytes[pos..pos + len].to_vec();
                let mut reader = BlockReader::parse(Arc::new(MmapFile::from_vec(block)), 0)?;
                TermPostings::Inline(reader.decode_all(format)?)
            }
            TAG_ON_DISK => {
                let (offset, n) = read_varint(&bytes[pos..])?;
                pos += n;
                let (block_count, _) = read_varint(&bytes[pos..])?;
                TermPostings::OnDisk {
                    offset,
                    block_count: block_count as u32,
                }
            }
            _ => return Err(Error::new(ErrorKind::Parse, format!("bad term info tag {}", tag))),
        };

        Ok(TermInfo {
            total_weight,
            doc_freq: doc_freq as u32,
            min_length: min_length as u32,
            max_length: max_length as u32,
            max_weight,
            min_id,
            max_id,
            postings,
        })
    }
}

impl Default for TermInfo {
    fn default() -> Self {
        TermInfo::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DocId;

    #[test]
    fn inline_round_trip() {
        let format = PostingFormat::frequencies();
        let mut info = TermInfo::new();
        let postings = vec![
            Posting {
                doc_id: DocId(1),
                length: Some(5),
                weight: Some(2.0),
                positions: None,
                chars: None,
                payload: None,
            },
            Posting {
                doc_id: DocId(8),
                length: Some(2),
                weight: Some(1.0),
                positions: None,
                chars: None,
                payload: None,
            },
        ];
        for p in &postings {
            info.observe(p);
        }
        info.postings = TermPostings::Inline(postings.clone());

        let bytes = info.to_bytes(&format).unwrap();
        let decoded = TermInfo::from_bytes(&bytes, &format).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(decoded.doc_freq, 2);
        assert_eq!(decoded.total_weight, 3.0);
        assert_eq!(decoded.min_id, 1);
        assert_eq!(decoded.max_id, 8);
    }

    #[test]
    fn on_disk_round_trip() {
        let format = PostingFormat::existence();
        let mut info = TermInfo::new();
        info.doc_freq = 1000;
        info.total_weight = 1000.0;
        info.max_weight = 1.0;
        info.min_length = 1;
        info.max_length = 1;
        info.min_id = 0;
        info.max_id = 4096;
        info.postings = TermPostings::OnDisk { offset: 7777, block_count: 8 };

        let bytes = info.to_bytes(&format).unwrap();
        let decoded = TermInfo::from_bytes(&bytes, &format).unwrap();
        assert_eq!(decoded, info);
    }
}
