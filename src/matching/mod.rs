pub mod boolean;

pub use boolean::{
    AndMaybeMatcher, AndNotMatcher, DisjunctionMaxMatcher, IntersectionMatcher, RequireMatcher,
    UnionMatcher,
};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::postings::Posting;

/// Iterator-like cursor over a posting stream. Implementations are leaves
/// (decoded posting blocks, in-memory lists) or boolean combinators wrapping
/// other matchers.
pub trait Matcher {
    /// False once the underlying postings are exhausted.
    fn is_active(&self) -> bool;

    /// Current document id. Only meaningful while active.
    fn id(&self) -> DocId;

    /// Advance one posting. Returns true when a block boundary was crossed.
    fn next(&mut self) -> Result<bool>;

    /// Advance to the first id >= `id`, skipping whole blocks where possible.
    fn skip_to(&mut self, id: DocId) -> Result<()>;

    fn weight(&self) -> Result<f32>;

    fn score(&self) -> Result<f32>;

    /// Upper bound on any score this matcher can still produce.
    fn max_quality(&self) -> Result<f32>;

    /// Upper bound on scores within the current block.
    fn block_quality(&self) -> Result<f32>;

    /// Skip whole blocks while their best possible contribution is at or
    /// below `minquality`. Returns the number of blocks skipped.
    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize>;

    /// Return a possibly-simplified matcher once children are exhausted or
    /// provably non-competitive below `minquality`.
    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher>;

    fn children(&self) -> Vec<&dyn Matcher> {
        Vec::new()
    }

    fn positions(&mut self) -> Result<Vec<u32>> {
        Err(Error::not_found("positions not tracked"))
    }

    fn chars(&mut self) -> Result<Vec<(u32, u32)>> {
        Err(Error::not_found("character ranges not tracked"))
    }

    fn payload(&mut self) -> Result<Vec<u8>> {
        Err(Error::not_found("payloads not tracked"))
    }
}

/// Permanently inactive matcher; the terminal form of `replace`.
pub struct NullMatcher;

impl Matcher for NullMatcher {
    fn is_active(&self) -> bool {
        false
    }

    fn id(&self) -> DocId {
        DocId(u64::MAX)
    }

    fn next(&mut self) -> Result<bool> {
        Err(Error::new(ErrorKind::InvalidState, "matcher exhausted"))
    }

    fn skip_to(&mut self, _id: DocId) -> Result<()> {
        Ok(())
    }

    fn weight(&self) -> Result<f32> {
        Ok(0.0)
    }

    fn score(&self) -> Result<f32> {
        Ok(0.0)
    }

    fn max_quality(&self) -> Result<f32> {
        Ok(0.0)
    }

    fn block_quality(&self) -> Result<f32> {
        Ok(0.0)
    }

    fn skip_to_quality(&mut self, _minquality: f32) -> Result<usize> {
        Ok(0)
    }

    fn replace(self: Box<Self>, _minquality: f32) -> Box<dyn Matcher> {
        self
    }
}

/// Leaf matcher over an in-memory posting list. Serves inline term infos,
/// decoded-and-remapped merge paths, and tests.
pub struct ListMatcher {
    postings: Vec<Posting>,
    index: usize,
    max_weight: f32,
}

impl ListMatcher {
    pub fn new(postings: Vec<Posting>) -> Self {
        let max_weight = postings
            .iter()
            .map(|p| p.weight.unwrap_or(1.0))
            .fold(0.0f32, f32::max);
        ListMatcher { postings, index: 0, max_weight }
    }

    /// Convenience leaf from (id, weight) pairs.
    pub fn from_pairs(pairs: &[(u64, f32)]) -> Self {
        ListMatcher::new(
            pairs
                .iter()
                .map(|&(id, w)| Posting {
                    doc_id: DocId(id),
                    length: None,
                    weight: Some(w),
                    positions: None,
                    chars: None,
                    payload: None,
                })
                .collect(),
        )
    }

    fn current(&self) -> Result<&Posting> {
        self.postings
            .get(self.index)
            .ok_or_else(|| Error::new(ErrorKind::InvalidState, "read past matcher end"))
    }
}

impl Matcher for ListMatcher {
    fn is_active(&self) -> bool {
        self.index < self.postings.len()
    }

    fn id(&self) -> DocId {
        self.postings
            .get(self.index)
            .map(|p| p.doc_id)
            .unwrap_or(DocId(u64::MAX))
    }

    fn next(&mut self) -> Result<bool> {
        if !self.is_active() {
            return Err(Error::new(ErrorKind::InvalidState, "read past matcher end"));
        }
        self.index += 1;
        Ok(false)
    }

    fn skip_to(&mut self, id: DocId) -> Result<()> {
        while self.is_active() && self.id() < id {
            self.next()?;
        }
        Ok(())
    }

    fn weight(&self) -> Result<f32> {
        Ok(self.current()?.weight.unwrap_or(1.0))
    }

    fn score(&self) -> Result<f32> {
        self.weight()
    }

    fn max_quality(&self) -> Result<f32> {
        Ok(self.max_weight)
    }

    fn block_quality(&self) -> Result<f32> {
        Ok(self.max_weight)
    }

    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize> {
        // One logical block: either it competes or the list is exhausted.
        if self.max_weight <= minquality {
            self.index = self.postings.len();
        }
        Ok(0)
    }

    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher> {
        if !self.is_active() || self.max_weight < minquality {
            Box::new(NullMatcher)
        } else {
            self
        }
    }

    fn positions(&mut self) -> Result<Vec<u32>> {
        match &self.current()?.positions {
            Some(positions) => Ok(positions.clone()),
            None => Err(Error::not_found("positions not tracked")),
        }
    }

    fn chars(&mut self) -> Result<Vec<(u32, u32)>> {
        match &self.current()?.chars {
            Some(chars) => Ok(chars.clone()),
            None => Err(Error::not_found("character ranges not tracked")),
        }
    }

    fn payload(&mut self) -> Result<Vec<u8>> {
        match &self.current()?.payload {
            Some(payload) => Ok(payload.clone()),
            None => Err(Error::not_found("payloads not tracked")),
        }
    }
}

/// Drain a matcher into its remaining document ids.
pub fn all_ids(matcher: &mut dyn Matcher) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    while matcher.is_active() {
        out.push(matcher.id().0);
        matcher.next()?;
    }
    Ok(out)
}
