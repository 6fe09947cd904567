use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::mmap_file::MmapFile;
use crate::util::varint::{min_array_code, read_array_entry, read_varint, write_array, write_varint};

/// Array typecode meaning "not present; lengths are fixed / offsets are
/// computable".
pub const CODE_ABSENT: u8 = 0xFF;

/// Longest common key prefix stripped into the region header.
pub const MAX_PREFIX: usize = 16;

/// Serialize one region: header, optional position/key-length/value-length
/// parallel arrays, then the concatenated (suffix-key, value) bytes in
/// ascending key order. Keys must be strictly ascending.
pub fn encode_region(items: &[(&[u8], &[u8])]) -> Result<Vec<u8>> {
    if items.is_empty() {
        return Err(Error::new(ErrorKind::InvalidValue, "empty region"));
    }
    for window in items.windows(2) {
        if window[0].0 >= window[1].0 {
            return Err(Error::out_of_order(format!(
                "region key {:?} not above {:?}",
                String::from_utf8_lossy(window[1].0),
                String::from_utf8_lossy(window[0].0)
            )));
        }
    }

    // Common byte prefix across every key, capped.
    let first = items[0].0;
    let mut prefix_len = first.len().min(MAX_PREFIX);
    for (key, _) in &items[1..] {
        let shared = key.iter().zip(first.iter()).take_while(|(a, b)| a == b).count();
        prefix_len = prefix_len.min(shared);
        if prefix_len == 0 {
            break;
        }
    }

    let key_lens: Vec<u64> = items.iter().map(|(k, _)| (k.len() - prefix_len) as u64).collect();
    let val_lens: Vec<u64> = items.iter().map(|(_, v)| v.len() as u64).collect();
    let fixed_klen = key_lens.iter().all(|&l| l == key_lens[0]);
    let fixed_vlen = val_lens.iter().all(|&l| l == val_lens[0]);

    let mut positions = Vec::with_capacity(items.len());
    let mut pos = 0u64;
    for i in 0..items.len() {
        positions.push(pos);
        pos += key_lens[i] + val_lens[i];
    }

    let mut out = Vec::new();
    out.extend_from_slice(&(items.len() as u32).to_le_bytes());

    // Offsets are computable by multiplication when both lengths are fixed.
    let poscode = if fixed_klen && fixed_vlen {
        CODE_ABSENT
    } else {
        min_array_code(pos)
    };
    let keylencode = if fixed_klen {
        CODE_ABSENT
    } else {
        min_array_code(*key_lens.iter().max().unwrap_or(&0))
    };
    let vallencode = if fixed_vlen {
        CODE_ABSENT
    } else {
        min_array_code(*val_lens.iter().max().unwrap_or(&0))
    };
    out.push(poscode);
    out.push(keylencode);
    out.push(vallencode);
    out.push(prefix_len as u8);
    out.extend_from_slice(&first[..prefix_len]);
    if fixed_klen {
        write_varint(&mut out, key_lens[0]);
    }
    if fixed_vlen {
        write_varint(&mut out, val_lens[0]);
    }

    if poscode != CODE_ABSENT {
        write_array(&mut out, poscode, &positions)?;
    }
    if keylencode != CODE_ABSENT {
        write_array(&mut out, keylencode, &key_lens)?;
    }
    if vallencode != CODE_ABSENT {
        write_array(&mut out, vallencode, &val_lens)?;
    }
    for (key, value) in items {
        out.extend_from_slice(&key[prefix_len..]);
        out.extend_from_slice(value);
    }
    Ok(out)
}

/// An immutable, sorted, prefix-compressed block of key/value pairs, read in
/// place from mapped bytes.
pub struct Region {
    data: Arc<MmapFile>,
    count: usize,
    poscode: u8,
    keylencode: u8,
    vallencode: u8,
    prefix: Vec<u8>,
    fixed_klen: u64,
    fixed_vlen: u64,
    positions_off: usize,
    keylens_off: usize,
    vallens_off: usize,
    payload_off: usize,
    /// Optional key -> index map traded for O(1) lookups (merge scans).
    preread: Option<HashMap<Vec<u8>, usize>>,
}

impl Region {
    /// Parse the header of a region starting at `base` in `data`.
    pub fn parse(data: Arc<MmapFile>, base: usize) -> Result<Self> {
        let bytes = data.data();
        if bytes.len() < base + 8 {
            return Err(Error::new(ErrorKind::Parse, "truncated region header"));
        }
        let count = u32::from_le_bytes([
            bytes[base], bytes[base + 1], bytes[base + 2], bytes[base + 3],
        ]) as usize;
        let poscode = bytes[base + 4];
        let keylencode = bytes[base + 5];
        let vallencode = bytes[base + 6];
        let prefix_len = bytes[base + 7] as usize;
        if prefix_len > MAX_PREFIX {
            return Err(Error::new(ErrorKind::Parse, "region prefix too long"));
        }
        let mut pos = base + 8;
        if bytes.len() < pos + prefix_len {
            return Err(Error::new(ErrorKind::Parse, "truncated region prefix"));
        }
        let prefix = bytes[pos..pos + prefix_len].to_vec();
        pos += prefix_len;

        let mut fixed_klen = 0;
        if keylencode == CODE_ABSENT {
            let (v, n) = read_varint(&bytes[pos..])?;
            fixed_klen = v;
            pos += n;
        }
        let mut fixed_vlen = 0;
        if vallencode == CODE_ABSENT {
            let (v, n) = read_varint(&bytes[pos..])?;
            fixed_vlen = v;
            pos += n;
        }

        let positions_off = pos;
        if poscode != CODE_ABSENT {
            pos += poscode as usize * count;
        }
        let keylens_off = pos;
        if keylencode != CODE_ABSENT {
            pos += keylencode as usize * count;
        }
        let vallens_off = pos;
        if vallencode != CODE_ABSENT {
            pos += vallencode as usize * count;
        }
        let payload_off = pos;
        if bytes.len() < payload_off {
            return Err(Error::new(ErrorKind::Parse, "truncated region arrays"));
        }

        Ok(Region {
            data,
            count,
            poscode,
            keylencode,
            vallencode,
            prefix,
            fixed_klen,
            fixed_vlen,
            positions_off,
            keylens_off,
            vallens_off,
            payload_off,
            preread: None,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn bytes(&self) -> &[u8] {
        self.data.data()
    }

    fn position(&self, index: usize) -> Result<usize> {
        if self.poscode == CODE_ABSENT {
            Ok(index * (self.fixed_klen + self.fixed_vlen) as usize)
        } else {
            let v = read_array_entry(&self.bytes()[self.positions_off..], self.poscode, index)?;
            Ok(v as usize)
        }
    }

    fn key_len(&self, index: usize) -> Result<usize> {
        if self.keylencode == CODE_ABSENT {
            Ok(self.fixed_klen as usize)
        } else {
            let v = read_array_entry(&self.bytes()[self.keylens_off..], self.keylencode, index)?;
            Ok(v as usize)
        }
    }

    fn val_len(&self, index: usize) -> Result<usize> {
        if self.vallencode == CODE_ABSENT {
            Ok(self.fixed_vlen as usize)
        } else {
            let v = read_array_entry(&self.bytes()[self.vallens_off..], self.vallencode, index)?;
            Ok(v as usize)
        }
    }

    fn key_suffix(&self, index: usize) -> Result<&[u8]> {
        let start = self.payload_off + self.position(index)?;
        let len = self.key_len(index)?;
        let bytes = self.bytes();
        if bytes.len() < start + len {
            return Err(Error::new(ErrorKind::Parse, "region key out of range"));
        }
        Ok(&bytes[start..start + len])
    }

    /// Full key (stripped prefix re-added).
    pub fn key_at(&self, index: usize) -> Result<Vec<u8>> {
        let mut key = self.prefix.clone();
        key.extend_from_slice(self.key_suffix(index)?);
        Ok(key)
    }

    pub fn value_at(&self, index: usize) -> Result<Vec<u8>> {
        let klen = self.key_len(index)?;
        let vlen = self.val_len(index)?;
        let start = self.payload_off + self.position(index)? + klen;
        let bytes = self.bytes();
        if bytes.len() < start + vlen {
            return Err(Error::new(ErrorKind::Parse, "region value out of range"));
        }
        Ok(bytes[start..start + vlen].to_vec())
    }

    pub fn min_key(&self) -> Result<Vec<u8>> {
        self.key_at(0)
    }

    pub fn max_key(&self) -> Result<Vec<u8>> {
        self.key_at(self.count - 1)
    }

    /// Index of the first key >= `key`; `count` when all keys are smaller.
    pub fn lower_bound(&self, key: &[u8]) -> Result<usize> {
        let mut lo = 0;
        let mut hi = self.count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.key_at(mid)?.as_slice() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    pub fn find(&self, key: &[u8]) -> Result<Option<usize>> {
        if let Some(map) = &self.preread {
            return Ok(map.get(key).copied());
        }
        if !key.starts_with(&self.prefix) {
            return Ok(None);
        }
        let idx = self.lower_bound(key)?;
        if idx < self.count && self.key_at(idx)? == key {
            Ok(Some(idx))
        } else {
            Ok(None)
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.find(key)? {
            Some(idx) => Ok(Some(self.value_at(idx)?)),
            None => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.find(key)?.is_some())
    }

    pub fn items(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::with_capacity(self.count);
        for i in 0..self.count {
            out.push((self.key_at(i)?, self.value_at(i)?));
        }
        Ok(out)
    }

    /// Precompute the full key -> index map.
    pub fn preread(&mut self) -> Result<()> {
        let mut map = HashMap::with_capacity(self.count);
        for i in 0..self.count {
            map.insert(self.key_at(i)?, i);
        }
        self.preread = Some(map);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_of(items: &[(&[u8], &[u8])]) -> Region {
        let bytes = encode_region(items).unwrap();
        Region::parse(Arc::new(MmapFile::from_vec(bytes)), 0).unwrap()
    }

    #[test]
    fn round_trip_varied_lengths() {
        let items: Vec<(&[u8], &[u8])> = vec![
            (b"alpha", b"1"),
            (b"beta", b"two"),
            (b"gamma", b"three33"),
        ];
        let region = region_of(&items);
        assert_eq!(region.len(), 3);
        for (k, v) in &items {
            assert_eq!(region.get(k).unwrap().as_deref(), Some(*v));
        }
        assert_eq!(region.get(b"delta").unwrap(), None);
        assert_eq!(region.min_key().unwrap(), b"alpha".to_vec());
        assert_eq!(region.max_key().unwrap(), b"gamma".to_vec());
    }

    #[test]
    fn fixed_lengths_omit_arrays() {
        // Same key and value widths: positions and length arrays all absent.
        let items: Vec<(&[u8], &[u8])> = vec![
            (b"k001", b"v001"),
            (b"k002", b"v002"),
            (b"k003", b"v003"),
        ];
        let bytes = encode_region(&items).unwrap();
        assert_eq!(bytes[4], CODE_ABSENT);
        assert_eq!(bytes[5], CODE_ABSENT);
        assert_eq!(bytes[6], CODE_ABSENT);
        let region = region_of(&items);
        assert_eq!(region.get(b"k002").unwrap(), Some(b"v002".to_vec()));
    }

    #[test]
    fn prefix_compression() {
        let items: Vec<(&[u8], &[u8])> = vec![
            (b"prefix/aaa", b"1"),
            (b"prefix/bbb", b"2"),
        ];
        let region = region_of(&items);
        assert_eq!(region.prefix, b"prefix/".to_vec());
        assert_eq!(region.get(b"prefix/bbb").unwrap(), Some(b"2".to_vec()));
        assert_eq!(region.get(b"other/aaa").unwrap(), None);
    }

    #[test]
    fn out_of_order_rejected() {
        let items: Vec<(&[u8], &[u8])> = vec![(b"b", b"1"), (b"a", b"2")];
        let err = encode_region(&items).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfOrder);
    }

    #[test]
    fn preread_lookup() {
        let items: Vec<(&[u8], &[u8])> = vec![(b"one", b"1"), (b"two", b"2")];
        let mut region = region_of(&items);
        region.preread().unwrap();
        assert_eq!(region.get(b"two").unwrap(), Some(b"2".to_vec()));
        assert_eq!(region.get(b"three").unwrap(), None);
    }
}
