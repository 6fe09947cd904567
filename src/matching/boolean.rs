use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::matching::{Matcher, NullMatcher};

fn quality_or_max(m: &dyn Matcher) -> f32 {
    m.max_quality().unwrap_or(f32::MAX)
}

fn inactive_err() -> Error {
    Error::new(ErrorKind::InvalidState, "read past matcher end")
}

/// OR: active while either child is; yields the union of ids, summing
/// contributions where both children share an id.
pub struct UnionMatcher {
    a: Box<dyn Matcher>,
    b: Box<dyn Matcher>,
}

impl UnionMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Self {
        UnionMatcher { a, b }
    }
}

impl Matcher for UnionMatcher {
    fn is_active(&self) -> bool {
        self.a.is_active() || self.b.is_active()
    }

    fn id(&self) -> DocId {
        match (self.a.is_active(), self.b.is_active()) {
            (true, true) => self.a.id().min(self.b.id()),
            (true, false) => self.a.id(),
            (false, true) => self.b.id(),
            (false, false) => DocId(u64::MAX),
        }
    }

    fn next(&mut self) -> Result<bool> {
        if !self.is_active() {
            return Err(inactive_err());
        }
        let id = self.id();
        let mut crossed = false;
        if self.a.is_active() && self.a.id() == id {
            crossed |= self.a.next()?;
        }
        if self.b.is_active() && self.b.id() == id {
            crossed |= self.b.next()?;
        }
        Ok(crossed)
    }

    fn skip_to(&mut self, id: DocId) -> Result<()> {
        if self.a.is_active() {
            self.a.skip_to(id)?;
        }
        if self.b.is_active() {
            self.b.skip_to(id)?;
        }
        Ok(())
    }

    fn weight(&self) -> Result<f32> {
        let id = self.id();
        let mut total = 0.0;
        if self.a.is_active() && self.a.id() == id {
            total += self.a.weight()?;
        }
        if self.b.is_active() && self.b.id() == id {
            total += self.b.weight()?;
        }
        Ok(total)
    }

    fn score(&self) -> Result<f32> {
        let id = self.id();
        let mut total = 0.0;
        if self.a.is_active() && self.a.id() == id {
            total += self.a.score()?;
        }
        if self.b.is_active() && self.b.id() == id {
            total += self.b.score()?;
        }
        Ok(total)
    }

    fn max_quality(&self) -> Result<f32> {
        Ok(self.a.max_quality()? + self.b.max_quality()?)
    }

    fn block_quality(&self) -> Result<f32> {
        let mut total = 0.0;
        if self.a.is_active() {
            total += self.a.block_quality()?;
        }
        if self.b.is_active() {
            total += self.b.block_quality()?;
        }
        Ok(total)
    }

    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize> {
        let mut skipped = 0;
        while self.a.is_active() && self.b.is_active() {
            let aq = self.a.block_quality()?;
            let bq = self.b.block_quality()?;
            if aq + bq > minquality {
                return Ok(skipped);
            }
            // Skip whichever side currently bounds lower.
            if aq < bq {
                skipped += self.a.skip_to_quality(minquality - bq)?;
            } else {
                skipped += self.b.skip_to_quality(minquality - aq)?;
            }
        }
        if self.a.is_active() {
            skipped += self.a.skip_to_quality(minquality)?;
        } else if self.b.is_active() {
            skipped += self.b.skip_to_quality(minquality)?;
        }
        Ok(skipped)
    }

    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher> {
        let UnionMatcher { a, b } = *self;
        match (a.is_active(), b.is_active()) {
            (false, false) => Box::new(NullMatcher),
            (true, false) => a.replace(minquality),
            (false, true) => b.replace(minquality),
            (true, true) => {
                if quality_or_max(a.as_ref()) + quality_or_max(b.as_ref()) < minquality {
                    Box::new(NullMatcher)
                } else {
                    Box::new(UnionMatcher { a, b })
                }
            }
        }
    }

    fn children(&self) -> Vec<&dyn Matcher> {
        vec![self.a.as_ref(), self.b.as_ref()]
    }
}

/// AND: active only while both children rest on the same id.
pub struct IntersectionMatcher {
    a: Box<dyn Matcher>,
    b: Box<dyn Matcher>,
}

impl IntersectionMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Result<Self> {
        let mut matcher = IntersectionMatcher { a, b };
        matcher.sync()?;
        Ok(matcher)
    }

    /// Skip the behind child forward until both rest on one id or one ends.
    fn sync(&mut self) -> Result<()> {
        while self.a.is_active() && self.b.is_active() && self.a.id() != self.b.id() {
            if self.a.id() < self.b.id() {
                self.a.skip_to(self.b.id())?;
            } else {
                self.b.skip_to(self.a.id())?;
            }
        }
        Ok(())
    }
}

impl Matcher for IntersectionMatcher {
    fn is_active(&self) -> bool {
        self.a.is_active() && self.b.is_active() && self.a.id() == self.b.id()
    }

    fn id(&self) -> DocId {
        if self.is_active() { self.a.id() } else { DocId(u64::MAX) }
    }

    fn next(&mut self) -> Result<bool> {
        if !self.is_active() {
            return Err(inactive_err());
        }
        let crossed = self.a.next()?;
        self.sync()?;
        Ok(crossed)
    }

    fn skip_to(&mut self, id: DocId) -> Result<()> {
        if self.a.is_active() {
            self.a.skip_to(id)?;
        }
        if self.b.is_active() {
            self.b.skip_to(id)?;
        }
        self.sync()
    }

    fn weight(&self) -> Result<f32> {
        Ok(self.a.weight()? + self.b.weight()?)
    }

    fn score(&self) -> Result<f32> {
        Ok(self.a.score()? + self.b.score()?)
    }

    fn max_quality(&self) -> Result<f32> {
        Ok(self.a.max_quality()? + self.b.max_quality()?)
    }

    fn block_quality(&self) -> Result<f32> {
        Ok(self.a.block_quality()? + self.b.block_quality()?)
    }

    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize> {
        let mut skipped = 0;
        while self.a.is_active()
            && self.b.is_active()
            && self.a.block_quality()? + self.b.block_quality()? <= minquality
        {
            let aq = self.a.block_quality()?;
            let bq = self.b.block_quality()?;
            let before = skipped;
            if aq < bq {
                skipped += self.a.skip_to_quality(minquality - bq)?;
            } else {
                skipped += self.b.skip_to_quality(minquality - aq)?;
            }
            if skipped == before {
                break;
            }
        }
        self.sync()?;
        Ok(skipped)
    }

    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher> {
        if !self.a.is_active() || !self.b.is_active() {
            return Box::new(NullMatcher);
        }
        if quality_or_max(self.a.as_ref()) + quality_or_max(self.b.as_ref()) < minquality {
            return Box::new(NullMatcher);
        }
        self
    }

    fn children(&self) -> Vec<&dyn Matcher> {
        vec![self.a.as_ref(), self.b.as_ref()]
    }
}

/// Yields the first child's postings except ids present in the second.
pub struct AndNotMatcher {
    a: Box<dyn Matcher>,
    b: Box<dyn Matcher>,
}

impl AndNotMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Result<Self> {
        let mut matcher = AndNotMatcher { a, b };
        matcher.settle()?;
        Ok(matcher)
    }

    /// Keep the negative side skipped forward; step over excluded ids.
    fn settle(&mut self) -> Result<()> {
        while self.a.is_active() && self.b.is_active() {
            if self.b.id() < self.a.id() {
                self.b.skip_to(self.a.id())?;
                continue;
            }
            if self.b.id() == self.a.id() {
                self.a.next()?;
                continue;
            }
            break;
        }
        Ok(())
    }
}

impl Matcher for AndNotMatcher {
    fn is_active(&self) -> bool {
        self.a.is_active()
    }

    fn id(&self) -> DocId {
        self.a.id()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.is_active() {
            return Err(inactive_err());
        }
        let crossed = self.a.next()?;
        self.settle()?;
        Ok(crossed)
    }

    fn skip_to(&mut self, id: DocId) -> Result<()> {
        if self.a.is_active() {
            self.a.skip_to(id)?;
        }
        self.settle()
    }

    fn weight(&self) -> Result<f32> {
        self.a.weight()
    }

    fn score(&self) -> Result<f32> {
        self.a.score()
    }

    fn max_quality(&self) -> Result<f32> {
        self.a.max_quality()
    }

    fn block_quality(&self) -> Result<f32> {
        self.a.block_quality()
    }

    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize> {
        let skipped = self.a.skip_to_quality(minquality)?;
        self.settle()?;
        Ok(skipped)
    }

    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher> {
        let AndNotMatcher { a, b } = *self;
        if !a.is_active() {
            return Box::new(NullMatcher);
        }
        if !b.is_active() {
            return a.replace(minquality);
        }
        match AndNotMatcher::new(a, b) {
            Ok(matcher) => Box::new(matcher),
            Err(_) => Box::new(NullMatcher),
        }
    }

    fn children(&self) -> Vec<&dyn Matcher> {
        vec![self.a.as_ref(), self.b.as_ref()]
    }
}

/// Yields all of the first child's postings; the second only adds weight
/// where it shares the id, never filtering anything out.
pub struct AndMaybeMatcher {
    a: Box<dyn Matcher>,
    b: Box<dyn Matcher>,
}

impl AndMaybeMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Result<Self> {
        let mut matcher = AndMaybeMatcher { a, b };
        matcher.settle()?;
        Ok(matcher)
    }

    fn settle(&mut self) -> Result<()> {
        if self.a.is_active() && self.b.is_active() && self.b.id() < self.a.id() {
            self.b.skip_to(self.a.id())?;
        }
        Ok(())
    }

    fn optional_synced(&self) -> bool {
        self.a.is_active() && self.b.is_active() && self.a.id() == self.b.id()
    }
}

impl Matcher for AndMaybeMatcher {
    fn is_active(&self) -> bool {
        self.a.is_active()
    }

    fn id(&self) -> DocId {
        self.a.id()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.is_active() {
            return Err(inactive_err());
        }
        let crossed = self.a.next()?;
        self.settle()?;
        Ok(crossed)
    }

    fn skip_to(&mut self, id: DocId) -> Result<()> {
        if self.a.is_active() {
            self.a.skip_to(id)?;
        }
        self.settle()
    }

    fn weight(&self) -> Result<f32> {
        let mut total = self.a.weight()?;
        if self.optional_synced() {
            total += self.b.weight()?;
        }
        Ok(total)
    }

    fn score(&self) -> Result<f32> {
        let mut total = self.a.score()?;
        if self.optional_synced() {
            total += self.b.score()?;
        }
        Ok(total)
    }

    fn max_quality(&self) -> Result<f32> {
        Ok(self.a.max_quality()? + self.b.max_quality()?)
    }

    fn block_quality(&self) -> Result<f32> {
        let mut total = self.a.block_quality()?;
        if self.b.is_active() {
            total += self.b.block_quality()?;
        }
        Ok(total)
    }

    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize> {
        let optional = if self.b.is_active() {
            self.b.block_quality()?
        } else {
            0.0
        };
        let skipped = self.a.skip_to_quality(minquality - optional)?;
        self.settle()?;
        Ok(skipped)
    }

    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher> {
        let AndMaybeMatcher { a, b } = *self;
        if !a.is_active() {
            return Box::new(NullMatcher);
        }
        if !b.is_active() {
            return a.replace(minquality);
        }
        if quality_or_max(a.as_ref()) + quality_or_max(b.as_ref()) < minquality {
            return Box::new(NullMatcher);
        }
        match AndMaybeMatcher::new(a, b) {
            Ok(matcher) => Box::new(matcher),
            Err(_) => Box::new(NullMatcher),
        }
    }

    fn children(&self) -> Vec<&dyn Matcher> {
        vec![self.a.as_ref(), self.b.as_ref()]
    }
}

/// Intersection that narrows results without affecting ranking: only the
/// first child's score is reported.
pub struct RequireMatcher {
    inner: IntersectionMatcher,
}

impl RequireMatcher {
    pub fn new(scored: Box<dyn Matcher>, filter: Box<dyn Matcher>) -> Result<Self> {
        Ok(RequireMatcher {
            inner: IntersectionMatcher::new(scored, filter)?,
        })
    }

    fn scored(&self) -> &dyn Matcher {
        self.inner.a.as_ref()
    }
}

impl Matcher for RequireMatcher {
    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn id(&self) -> DocId {
        self.inner.id()
    }

    fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    fn skip_to(&mut self, id: DocId) -> Result<()> {
        self.inner.skip_to(id)
    }

    fn weight(&self) -> Result<f32> {
        self.scored().weight()
    }

    fn score(&self) -> Result<f32> {
        self.scored().score()
    }

    fn max_quality(&self) -> Result<f32> {
        self.scored().max_quality()
    }

    fn block_quality(&self) -> Result<f32> {
        self.scored().block_quality()
    }

    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize> {
        let skipped = self.inner.a.skip_to_quality(minquality)?;
        self.inner.sync()?;
        Ok(skipped)
    }

    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher> {
        if !self.inner.a.is_active() || !self.inner.b.is_active() {
            return Box::new(NullMatcher);
        }
        if quality_or_max(self.inner.a.as_ref()) < minquality {
            return Box::new(NullMatcher);
        }
        self
    }

    fn children(&self) -> Vec<&dyn Matcher> {
        self.inner.children()
    }
}

/// OR that scores with the maximum of its children's contributions rather
/// than their sum.
pub struct DisjunctionMaxMatcher {
    inner: UnionMatcher,
}

impl DisjunctionMaxMatcher {
    pub fn new(a: Box<dyn Matcher>, b: Box<dyn Matcher>) -> Self {
        DisjunctionMaxMatcher {
            inner: UnionMatcher::new(a, b),
        }
    }
}

impl Matcher for DisjunctionMaxMatcher {
    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn id(&self) -> DocId {
        self.inner.id()
    }

    fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    fn skip_to(&mut self, id: DocId) -> Result<()> {
        self.inner.skip_to(id)
    }

    fn weight(&self) -> Result<f32> {
        let id = self.inner.id();
        let mut best = 0.0f32;
        if self.inner.a.is_active() && self.inner.a.id() == id {
            best = best.max(self.inner.a.weight()?);
        }
        if self.inner.b.is_active() && self.inner.b.id() == id {
            best = best.max(self.inner.b.weight()?);
        }
        Ok(best)
    }

    fn score(&self) -> Result<f32> {
        let id = self.inner.id();
        let mut best = 0.0f32;
        if self.inner.a.is_active() && self.inner.a.id() == id {
            best = best.max(self.inner.a.score()?);
        }
        if self.inner.b.is_active() && self.inner.b.id() == id {
            best = best.max(self.inner.b.score()?);
        }
        Ok(best)
    }

    fn max_quality(&self) -> Result<f32> {
        Ok(self.inner.a.max_quality()?.max(self.inner.b.max_quality()?))
    }

    fn block_quality(&self) -> Result<f32> {
        let mut best = 0.0f32;
        if self.inner.a.is_active() {
            best = best.max(self.inner.a.block_quality()?);
        }
        if self.inner.b.is_active() {
            best = best.max(self.inner.b.block_quality()?);
        }
        Ok(best)
    }

    fn skip_to_quality(&mut self, minquality: f32) -> Result<usize> {
        let mut skipped = 0;
        loop {
            let a_active = self.inner.a.is_active();
            let b_active = self.inner.b.is_active();
            if !a_active && !b_active {
                return Ok(skipped);
            }
            if self.block_quality()? > minquality {
                return Ok(skipped);
            }
            let before = skipped;
            if a_active {
                skipped += self.inner.a.skip_to_quality(minquality)?;
            }
            if b_active {
                skipped += self.inner.b.skip_to_quality(minquality)?;
            }
            if skipped == before {
                return Ok(skipped);
            }
        }
    }

    fn replace(self: Box<Self>, minquality: f32) -> Box<dyn Matcher> {
        let inner = self.inner;
        let UnionMatcher { a, b } = inner;
        match (a.is_active(), b.is_active()) {
            (false, false) => Box::new(NullMatcher),
            (true, false) => a.replace(minquality),
            (false, true) => b.replace(minquality),
            (true, true) => {
                if quality_or_max(a.as_ref()).max(quality_or_max(b.as_ref())) < minquality {
                    Box::new(NullMatcher)
                } else {
                    Box::new(DisjunctionMaxMatcher {
                        inner: UnionMatcher::new(a, b),
                    })
                }
            }
        }
    }

    fn children(&self) -> Vec<&dyn Matcher> {
        self.inner.children()
    }
}
