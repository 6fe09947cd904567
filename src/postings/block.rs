use std::sync::Arc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::postings::{Posting, PostingFormat};
use crate::storage::mmap_file::MmapFile;
use crate::util::varint::{
    delta_encode, min_array_code, read_array, read_array_entry, read_varint, write_array,
    write_varint,
};

/// Postings per block.
pub const BLOCK_CAPACITY: usize = 128;

/// Fixed block header length.
pub const HEADER_LEN: usize = 36;

const FLAG_LENGTHS: u8 = 1;
const FLAG_WEIGHTS: u8 = 2;
const FLAG_UNIFORM_WEIGHT: u8 = 4;
const FLAG_POSITIONS: u8 = 8;
const FLAG_CHARS: u8 = 16;
const FLAG_PAYLOADS: u8 = 32;

/// Per-block statistics, decodable without touching the posting arrays.
/// min/max ids drive skipping; max weight and the length bounds drive
/// quality-based pruning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockHeader {
    pub flags: u8,
    pub idcode: u8,
    pub count: u16,
    pub block_len: u32,
    pub min_id: u64,
    pub max_id: u64,
    pub max_weight: f32,
    pub min_length: u32,
    pub max_length: u32,
}

impl BlockHeader {
    pub fn parse(bytes: &[u8], base: usize) -> Result<Self> {
        if bytes.len() < base + HEADER_LEN {
            return Err(Error::new(ErrorKind::Parse, "truncated posting block header"));
        }
        let b = &bytes[base..base + HEADER_LEN];
        Ok(BlockHeader {
            flags: b[0],
            idcode: b[1],
            count: u16::from_le_bytes([b[2], b[3]]),
            block_len: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            min_id: u64::from_le_bytes([b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]]),
            max_id: u64::from_le_bytes([b[16], b[17], b[18], b[19], b[20], b[21], b[22], b[23]]),
            max_weight: f32::from_le_bytes([b[24], b[25], b[26], b[27]]),
            min_length: u32::from_le_bytes([b[28], b[29], b[30], b[31]]),
            max_length: u32::from_le_bytes([b[32], b[33], b[34], b[35]]),
        })
    }
}

fn encode_positions(positions: &[u32], out: &mut Vec<u8>) {
    write_varint(out, positions.len() as u64);
    let mut prev = 0u64;
    for (i, &p) in positions.iter().enumerate() {
        let p = p as u64;
        let delta = if i == 0 { p } else { p.saturating_sub(prev) };
        write_varint(out, delta);
        prev = p;
    }
}

fn decode_positions(bytes: &[u8]) -> Result<Vec<u32>> {
    let (count, mut pos) = read_varint(bytes)?;
    let mut out = Vec::with_capacity(count as usize);
    let mut acc = 0u64;
    for i in 0..count {
        let (delta, n) = read_varint(&bytes[pos..])?;
        pos += n;
        acc = if i == 0 { delta } else { acc + delta };
        out.push(acc as u32);
    }
    Ok(out)
}

fn encode_chars(chars: &[(u32, u32)], out: &mut Vec<u8>) {
    write_varint(out, chars.len() as u64);
    for &(start, end) in chars {
        write_varint(out, start as u64);
        write_varint(out, end as u64);
    }
}

fn decode_chars(bytes: &[u8]) -> Result<Vec<(u32, u32)>> {
    let (count, mut pos) = read_varint(bytes)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (start, n) = read_varint(&bytes[pos..])?;
        pos += n;
        let (end, n) = read_varint(&bytes[pos..])?;
        pos += n;
        out.push((start as u32, end as u32));
    }
    Ok(out)
}

/// Append one feature section: a typecoded (count+1)-entry offset array plus
/// the concatenated per-posting chunks, so one posting's feature decodes
/// without its neighbors.
fn encode_chunks(chunks: &[Vec<u8>], out: &mut Vec<u8>) -> Result<()> {
    let mut offsets = Vec::with_capacity(chunks.len() + 1);
    let mut pos = 0u64;
    for chunk in chunks {
        offsets.push(pos);
        pos += chunk.len() as u64;
    }
    offsets.push(pos);
    let offcode = min_array_code(pos);
    out.push(offcode);
    write_array(out, offcode, &offsets)?;
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    Ok(())
}

/// Encode one block of postings. Ids must be strictly ascending.
pub fn encode_block(format: &PostingFormat, postings: &[Posting]) -> Result<Vec<u8>> {
    if postings.is_empty() {
        return Err(Error::new(ErrorKind::InvalidValue, "empty posting block"));
    }
    if postings.len() > u16::MAX as usize {
        return Err(Error::new(ErrorKind::InvalidValue, "posting block too large"));
    }

    let ids: Vec<u64> = postings.iter().map(|p| p.doc_id.0).collect();
    let deltas = delta_encode(&ids)?;
    let gaps = &deltas[1..];
    let idcode = min_array_code(gaps.iter().copied().max().unwrap_or(0));

    let weights: Vec<f32> = postings.iter().map(|p| p.weight.unwrap_or(1.0)).collect();
    let max_weight = weights.iter().copied().fold(0.0f32, f32::max);
    let uniform = weights.iter().all(|&w| w == weights[0]);

    let lengths: Vec<u32> = postings.iter().map(|p| p.length.unwrap_or(1)).collect();
    let (min_length, max_length) = if format.has_lengths {
        (
            lengths.iter().copied().min().unwrap_or(0),
            lengths.iter().copied().max().unwrap_or(0),
        )
    } else {
        (0, 0)
    };

    let mut flags = 0u8;
    if format.has_lengths {
        flags |= FLAG_LENGTHS;
    }
    if format.has_weights {
        flags |= FLAG_WEIGHTS;
        if uniform {
            flags |= FLAG_UNIFORM_WEIGHT;
        }
    }
    if format.has_positions {
        flags |= FLAG_POSITIONS;
    }
    if format.has_chars {
        flags |= FLAG_CHARS;
    }
    if format.has_payloads {
        flags |= FLAG_PAYLOADS;
    }

    let mut out = Vec::with_capacity(HEADER_LEN + postings.len() * 4);
    out.push(flags);
    out.push(idcode);
    out.extend_from_slice(&(postings.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // block_len, patched below
    out.extend_from_slice(&ids[0].to_le_bytes());
    out.extend_from_slice(&ids[ids.len() - 1].to_le_bytes());
    out.extend_from_slice(&max_weight.to_le_bytes());
    out.extend_from_slice(&min_length.to_le_bytes());
    out.extend_from_slice(&max_length.to_le_bytes());

    write_array(&mut out, idcode, gaps)?;

    if format.has_lengths {
        let widest = lengths.iter().copied().max().unwrap_or(0) as u64;
        let lencode = min_array_code(widest);
        out.push(lencode);
        let as64: Vec<u64> = lengths.iter().map(|&l| l as u64).collect();
        write_array(&mut out, lencode, &as64)?;
    }

    if format.has_weights {
        if uniform {
            out.extend_from_slice(&weights[0].to_le_bytes());
        } else {
            for w in &weights {
                out.extend_from_slice(&w.to_le_bytes());
            }
        }
    }

    if format.has_positions {
        let chunks: Vec<Vec<u8>> = postings
            .iter()
            .map(|p| {
                let mut chunk = Vec::new();
                encode_positions(p.positions.as_deref().unwrap_or(&[]), &mut chunk);
                chunk
            })
            .collect();
        encode_chunks(&chunks, &mut out)?;
    }
    if format.has_chars {
        let chunks: Vec<Vec<u8>> = postings
            .iter()
            .map(|p| {
                let mut chunk = Vec::new();
                encode_chars(p.chars.as_deref().unwrap_or(&[]), &mut chunk);
                chunk
            })
            .collect();
        encode_chunks(&chunks, &mut out)?;
    }
    if format.has_payloads {
        let chunks: Vec<Vec<u8>> = postings
            .iter()
            .map(|p| p.payload.clone().unwrap_or_default())
            .collect();
        encode_chunks(&chunks, &mut out)?;
    }

    let block_len = out.len() as u32;
    out[4..8].copy_from_slice(&block_len.to_le_bytes());
    Ok(out)
}

/// Copy an encoded block, re-basing only the header ids by a constant
/// offset. The delta arrays are copied verbatim, which is what makes the
/// raw merge path exact: gaps are offset-invariant.
pub fn rebase_block(block: &[u8], id_offset: u64) -> Result<Vec<u8>> {
    let header = BlockHeader::parse(block, 0)?;
    if block.len() < header.block_len as usize {
        return Err(Error::new(ErrorKind::Parse, "truncated posting block"));
    }
    let mut out = block[..header.block_len as usize].to_vec();
    out[8..16].copy_from_slice(&(header.min_id + id_offset).to_le_bytes());
    out[16..24].copy_from_slice(&(header.max_id + id_offset).to_le_bytes());
    Ok(out)
}

struct Section {
    offsets_off: usize,
    offcode: u8,
    blob_off: usize,
}

enum Weights {
    Implicit,
    Uniform(f32),
    Array(usize),
}

/// One mapped block. The header is parsed eagerly; id, weight and feature
/// arrays decode on demand, and per-posting features are cached after the
/// first access.
pub struct BlockReader {
    data: Arc<MmapFile>,
    base: usize,
    pub header: BlockHeader,
    lengths_section: Option<(u8, usize)>,
    weights: Weights,
    positions_section: Option<Section>,
    chars_section: Option<Section>,
    payloads_section: Option<Section>,
    ids_cache: Option<Vec<u64>>,
    positions_cache: Vec<Option<Vec<u32>>>,
    chars_cache: Vec<Option<Vec<(u32, u32)>>>,
}

impl BlockReader {
    pub fn parse(data: Arc<MmapFile>, base: usize) -> Result<Self> {
        let header = BlockHeader::parse(data.data(), base)?;
        let bytes = data.data();
        let count = header.count as usize;
        let mut pos = base + HEADER_LEN;
        pos += count.saturating_sub(1) * header.idcode as usize;

        let need = |at: usize| -> Result<u8> {
            bytes
                .get(at)
                .copied()
                .ok_or_else(|| Error::new(ErrorKind::Parse, "truncated posting block"))
        };

        let lengths_section = if header.flags & FLAG_LENGTHS != 0 {
            let lencode = need(pos)?;
            let section = (lencode, pos + 1);
            pos += 1 + count * lencode as usize;
            Some(section)
        } else {
            None
        };

        let weights = if header.flags & FLAG_WEIGHTS != 0 {
            if header.flags & FLAG_UNIFORM_WEIGHT != 0 {
                if bytes.len() < pos + 4 {
                    return Err(Error::new(ErrorKind::Parse, "truncated posting block"));
                }
                let w = f32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);
                pos += 4;
                Weights::Uniform(w)
            } else {
                let section = Weights::Array(pos);
                pos += 4 * count;
                section
            }
        } else {
            Weights::Implicit
        };

        let read_section = |pos: &mut usize| -> Result<Section> {
            let offcode = need(*pos)?;
            let offsets_off = *pos + 1;
            let blob_off = offsets_off + (count + 1) * offcode as usize;
            if bytes.len() < blob_off {
                return Err(Error::new(ErrorKind::Parse, "truncated posting block"));
            }
            let blob_len = read_array_entry(&bytes[offsets_off..], offcode, count)? as usize;
            let section = Section { offsets_off, offcode, blob_off };
            *pos = blob_off + blob_len;
            Ok(section)
        };

        let positions_section = if header.flags & FLAG_POSITIONS != 0 {
            Some(read_section(&mut pos)?)
        } else {
            None
        };
        let chars_section = if header.flags & FLAG_CHARS != 0 {
            Some(read_section(&mut pos)?)
        } else {
            None
        };
        let payloads_section = if header.flags & FLAG_PAYLOADS != 0 {
            Some(read_section(&mut pos)?)
        } else {
            None
        };

        if pos - base != header.block_len as usize {
            return Err(Error::new(ErrorKind::Parse, "posting block length mismatch"));
        }

        Ok(BlockReader {
            data,
            base,
            header,
            lengths_section,
            weights,
            positions_section,
            chars_section,
            payloads_section,
            ids_cache: None,
            positions_cache: vec![None; count],
            chars_cache: vec![None; count],
        })
    }

    pub fn len(&self) -> usize {
        self.header.count as usize
    }

    /// Offset of the block following this one.
    pub fn end(&self) -> usize {
        self.base + self.header.block_len as usize
    }

    pub fn ids(&mut self) -> Result<&[u64]> {
        if self.ids_cache.is_none() {
            let count = self.header.count as usize;
            let gaps = read_array(
                &self.data.data()[self.base + HEADER_LEN..],
                self.header.idcode,
                count.saturating_sub(1),
            )?;
            let mut ids = Vec::with_capacity(count);
            let mut acc = self.header.min_id;
            ids.push(acc);
            for gap in gaps {
                acc += gap;
                ids.push(acc);
            }
            self.ids_cache = Some(ids);
        }
        Ok(self.ids_cache.as_deref().unwrap_or(&[]))
    }

    pub fn id_at(&mut self, index: usize) -> Result<DocId> {
        let ids = self.ids()?;
        ids.get(index)
            .map(|&id| DocId(id))
            .ok_or_else(|| Error::new(ErrorKind::Parse, "posting index out of range"))
    }

    /// Index of the first id >= target; block length when none.
    pub fn lower_bound(&mut self, target: u64) -> Result<usize> {
        let ids = self.ids()?;
        Ok(ids.partition_point(|&id| id < target))
    }

    pub fn weight_at(&self, index: usize) -> Result<f32> {
        match self.weights {
            Weights::Implicit => Ok(1.0),
            Weights::Uniform(w) => Ok(w),
            Weights::Array(off) => {
                let at = off + index * 4;
                let bytes = self.data.data();
                if bytes.len() < at + 4 {
                    return Err(Error::new(ErrorKind::Parse, "truncated weights array"));
                }
                Ok(f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]))
            }
        }
    }

    pub fn length_at(&self, index: usize) -> Result<u32> {
        match self.lengths_section {
            None => Ok(1),
            Some((lencode, off)) => {
                let v = read_array_entry(&self.data.data()[off..], lencode, index)?;
                Ok(v as u32)
            }
        }
    }

    fn chunk(&self, section: &Section, index: usize) -> Result<&[u8]> {
        let bytes = self.data.data();
        let start = read_array_entry(&bytes[section.offsets_off..], section.offcode, index)? as usize;
        let end = read_array_entry(&bytes[section.offsets_off..], section.offcode, index + 1)? as usize;
        let lo = section.blob_off + start;
        let hi = section.blob_off + end;
        if bytes.len() < hi || lo > hi {
            return Err(Error::new(ErrorKind::Parse, "feature chunk out of range"));
        }
        Ok(&bytes[lo..hi])
    }

    pub fn positions_at(&mut self, index: usize) -> Result<Vec<u32>> {
        if let Some(Some(cached)) = self.positions_cache.get(index) {
            return Ok(cached.clone());
        }
        let section = self
            .positions_section
            .as_ref()
            .ok_or_else(|| Error::not_found("positions not tracked"))?;
        let decoded = decode_positions(self.chunk(section, index)?)?;
        if let Some(slot) = self.positions_cache.get_mut(index) {
            *slot = Some(decoded.clone());
        }
        Ok(decoded)
    }

    pub fn chars_at(&mut self, index: usize) -> Result<Vec<(u32, u32)>> {
        if let Some(Some(cached)) = self.chars_cache.get(index) {
            return Ok(cached.clone());
        }
        let section = self
            .chars_section
            .as_ref()
            .ok_or_else(|| Error::not_found("character ranges not tracked"))?;
        let decoded = decode_chars(self.chunk(section, index)?)?;
        if let Some(slot) = self.chars_cache.get_mut(index) {
            *slot = Some(decoded.clone());
        }
        Ok(decoded)
    }

    pub fn payload_at(&self, index: usize) -> Result<Vec<u8>> {
        let section = self
            .payloads_section
            .as_ref()
            .ok_or_else(|| Error::not_found("payloads not tracked"))?;
        Ok(self.chunk(section, index)?.to_vec())
    }

    /// Fully decode the block back into postings.
    pub fn decode_all(&mut self, format: &PostingFormat) -> Result<Vec<Posting>> {
        let count = self.len();
        let ids: Vec<u64> = self.ids()?.to_vec();
        let mut out = Vec::with_capacity(count);
        for (i, id) in ids.into_iter().enumerate() {
            out.push(Posting {
                doc_id: DocId(id),
                length: if format.has_lengths {
                    Some(self.length_at(i)?)
                } else {
                    None
                },
                weight: if format.has_weights {
                    Some(self.weight_at(i)?)
                } else {
                    None
                },
                positions: if format.has_positions {
                    Some(self.positions_at(i)?)
                } else {
                    None
                },
                chars: if format.has_chars {
                    Some(self.chars_at(i)?)
                } else {
                    None
                },
                payload: if format.has_payloads {
                    Some(self.payload_at(i)?)
                } else {
                    None
                },
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_postings() -> Vec<Posting> {
        vec![
            Posting {
                doc_id: DocId(3),
                length: Some(10),
                weight: Some(2.0),
                positions: Some(vec![1, 5, 9]),
                chars: Some(vec![(0, 4), (20, 24)]),
                payload: Some(b"pay".to_vec()),
            },
            Posting {
                doc_id: DocId(7),
                length: Some(4),
                weight: Some(1.0),
                positions: Some(vec![2]),
                chars: Some(vec![(8, 12)]),
                payload: Some(Vec::new()),
            },
            Posting {
                doc_id: DocId(300),
                length: Some(9),
                weight: Some(5.5),
                positions: Some(vec![]),
                chars: Some(vec![]),
                payload: Some(b"x".to_vec()),
            },
        ]
    }

    #[test]
    fn block_round_trip_full_features() {
        let format = PostingFormat::characters();
        let postings = sample_postings();
        let bytes = encode_block(&format, &postings).unwrap();
        let mut reader =
            BlockReader::parse(Arc::new(MmapFile::from_vec(bytes)), 0).unwrap();
        assert_eq!(reader.header.min_id, 3);
        assert_eq!(reader.header.max_id, 300);
        assert_eq!(reader.header.max_weight, 5.5);
        assert_eq!(reader.header.min_length, 4);
        assert_eq!(reader.header.max_length, 10);
        assert_eq!(reader.decode_all(&format).unwrap(), postings);
    }

    #[test]
    fn uniform_weights_stored_once() {
        let format = PostingFormat::frequencies();
        let postings: Vec<Posting> = (0..10)
            .map(|i| Posting {
                doc_id: DocId(i * 2 + 1),
                length: Some(3),
                weight: Some(1.0),
                positions: None,
                chars: None,
                payload: None,
            })
            .collect();
        let uniform = encode_block(&format, &postings).unwrap();

        let mut varied = postings.clone();
        varied[4].weight = Some(9.0);
        let full = encode_block(&format, &varied).unwrap();
        assert!(uniform.len() < full.len());

        let mut reader = BlockReader::parse(Arc::new(MmapFile::from_vec(uniform)), 0).unwrap();
        assert_eq!(reader.weight_at(7).unwrap(), 1.0);
        assert_eq!(reader.ids().unwrap().len(), 10);
    }

    #[test]
    fn out_of_order_ids_rejected() {
        let format = PostingFormat::existence();
        let postings = vec![Posting::id_only(DocId(5)), Posting::id_only(DocId(5))];
        let err = encode_block(&format, &postings).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfOrder);
    }

    #[test]
    fn rebase_shifts_only_header_ids() {
        let format = PostingFormat::existence();
        let postings = vec![
            Posting::id_only(DocId(0)),
            Posting::id_only(DocId(4)),
            Posting::id_only(DocId(9)),
        ];
        let bytes = encode_block(&format, &postings).unwrap();
        let rebased = rebase_block(&bytes, 100).unwrap();
        assert_eq!(bytes.len(), rebased.len());
        // Bodies are byte-identical; only the header ids moved.
        assert_eq!(&bytes[HEADER_LEN..], &rebased[HEADER_LEN..]);
        let mut reader = BlockReader::parse(Arc::new(MmapFile::from_vec(rebased)), 0).unwrap();
        assert_eq!(reader.ids().unwrap(), &[100, 104, 109]);
    }
}
