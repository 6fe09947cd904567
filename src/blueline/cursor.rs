use std::sync::Arc;

use crate::blueline::region::Region;
use crate::core::error::Result;

/// A cursor rests on one key position of a sorted key/value sequence.
pub trait KvCursor {
    fn first(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<()>;
    /// Move to the first key >= `key`.
    fn seek(&mut self, key: &[u8]) -> Result<()>;
    fn is_valid(&self) -> bool;
    fn key(&self) -> Result<Option<Vec<u8>>>;
    fn value(&self) -> Result<Option<Vec<u8>>>;
}

/// Cursor over a single realized region.
pub struct RegionCursor {
    region: Arc<Region>,
    index: usize,
}

impl RegionCursor {
    pub fn new(region: Arc<Region>) -> Self {
        RegionCursor { region, index: 0 }
    }
}

impl KvCursor for RegionCursor {
    fn first(&mut self) -> Result<()> {
        self.index = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        if self.index < self.region.len() {
            self.index += 1;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.index = self.region.lower_bound(key)?;
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.index < self.region.len()
    }

    fn key(&self) -> Result<Option<Vec<u8>>> {
        if self.is_valid() {
            Ok(Some(self.region.key_at(self.index)?))
        } else {
            Ok(None)
        }
    }

    fn value(&self) -> Result<Option<Vec<u8>>> {
        if self.is_valid() {
            Ok(Some(self.region.value_at(self.index)?))
        } else {
            Ok(None)
        }
    }
}

/// Prefix-restricted view over another cursor. Yields keys with the prefix
/// stripped; keys outside the prefix range end the cursor.
pub struct SuffixCursor<C: KvCursor> {
    inner: C,
    prefix: Vec<u8>,
}

impl<C: KvCursor> SuffixCursor<C> {
    pub fn new(inner: C, prefix: Vec<u8>) -> Self {
        SuffixCursor { inner, prefix }
    }

    fn in_range(&self) -> Result<bool> {
        match self.inner.key()? {
            Some(key) => Ok(key.starts_with(&self.prefix)),
            None => Ok(false),
        }
    }
}

impl<C: KvCursor> KvCursor for SuffixCursor<C> {
    fn first(&mut self) -> Result<()> {
        self.inner.seek(&self.prefix)
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        self.inner.seek(&full)
    }

    fn is_valid(&self) -> bool {
        self.in_range().unwrap_or(false)
    }

    fn key(&self) -> Result<Option<Vec<u8>>> {
        if !self.in_range()? {
            return Ok(None);
        }
        match self.inner.key()? {
            Some(key) => Ok(Some(key[self.prefix.len()..].to_vec())),
            None => Ok(None),
        }
    }

    fn value(&self) -> Result<Option<Vec<u8>>> {
        if !self.in_range()? {
            return Ok(None);
        }
        self.inner.value()
    }
}

/// Deduplicating merge of a sorted in-memory buffer with an on-disk cursor.
/// Buffered entries shadow on-disk entries with equal keys; a `None` buffered
/// value is a tombstone hiding the key entirely.
pub struct BufferedCursor<C: KvCursor> {
    buffer: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    bindex: usize,
    inner: C,
}

impl<C: KvCursor> BufferedCursor<C> {
    /// `buffer` must be sorted by key.
    pub fn new(buffer: Vec<(Vec<u8>, Option<Vec<u8>>)>, inner: C) -> Self {
        BufferedCursor { buffer, bindex: 0, inner }
    }

    /// True when the current position comes from the buffer.
    fn buffer_leads(&self) -> Result<Option<bool>> {
        let bkey = self.buffer.get(self.bindex).map(|(k, _)| k.as_slice());
        let ikey = self.inner.key()?;
        Ok(match (bkey, &ikey) {
            (None, None) => None,
            (Some(_), None) => Some(true),
            (None, Some(_)) => Some(false),
            (Some(b), Some(i)) => Some(b <= i.as_slice()),
        })
    }

    /// Step past the current position, advancing both sides on a shared key.
    fn advance(&mut self) -> Result<()> {
        let bkey = self.buffer.get(self.bindex).map(|(k, _)| k.clone());
        let ikey = self.inner.key()?;
        match (bkey, ikey) {
            (Some(b), Some(i)) => {
                if b <= i {
                    self.bindex += 1;
                }
                if i <= b {
                    self.inner.next()?;
                }
            }
            (Some(_), None) => self.bindex += 1,
            (None, Some(_)) => self.inner.next()?,
            (None, None) => {}
        }
        Ok(())
    }

    /// Skip tombstoned positions.
    fn settle(&mut self) -> Result<()> {
        loop {
            match self.buffer_leads()? {
                Some(true) => {
                    if self.buffer[self.bindex].1.is_none() {
                        self.advance()?;
                        continue;
                    }
                }
                _ => {}
            }
            return Ok(());
        }
    }
}

impl<C: KvCursor> KvCursor for BufferedCursor<C> {
    fn first(&mut self) -> Result<()> {
        self.bindex = 0;
        self.inner.first()?;
        self.settle()
    }

    fn next(&mut self) -> Result<()> {
        self.advance()?;
        self.settle()
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.bindex = self.buffer.partition_point(|(k, _)| k.as_slice() < key);
        self.inner.seek(key)?;
        self.settle()
    }

    fn is_valid(&self) -> bool {
        matches!(self.buffer_leads(), Ok(Some(_)))
    }

    fn key(&self) -> Result<Option<Vec<u8>>> {
        match self.buffer_leads()? {
            Some(true) => Ok(Some(self.buffer[self.bindex].0.clone())),
            Some(false) => self.inner.key(),
            None => Ok(None),
        }
    }

    fn value(&self) -> Result<Option<Vec<u8>>> {
        match self.buffer_leads()? {
            Some(true) => Ok(self.buffer[self.bindex].1.clone()),
            Some(false) => self.inner.value(),
            None => Ok(None),
        }
    }
}
