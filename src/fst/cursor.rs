use crate::core::error::Result;
use crate::fst::arc::GraphArc;
use crate::fst::reader::GraphReader;
use crate::fst::values::{Value, ValuesType};

#[derive(Clone)]
struct Level {
    arcs: Vec<GraphArc>,
    idx: usize,
}

/// Walks one field's graph arc-by-arc. The stack holds the current arc at
/// each depth; an exhausted cursor has an empty stack. Copies are cheap
/// enough to restart iteration from a saved position.
#[derive(Clone)]
pub struct Cursor<'a> {
    reader: &'a GraphReader,
    vtype: ValuesType,
    stack: Vec<Level>,
}

impl<'a> Cursor<'a> {
    pub fn new(reader: &'a GraphReader, field: &str) -> Result<Self> {
        let mut stack = Vec::new();
        if let Some(root) = reader.root(field)? {
            let arcs = reader.arcs_at(root)?;
            if !arcs.is_empty() {
                stack.push(Level { arcs, idx: 0 });
            }
        }
        Ok(Cursor {
            reader,
            vtype: reader.values_type(),
            stack,
        })
    }

    pub fn is_valid(&self) -> bool {
        !self.stack.is_empty()
    }

    fn current_arc(&self) -> Option<&GraphArc> {
        self.stack.last().map(|level| &level.arcs[level.idx])
    }

    /// Byte path from the root to the current arc, inclusive.
    pub fn key(&self) -> Vec<u8> {
        let mut key = Vec::new();
        for level in &self.stack {
            key.extend_from_slice(&level.arcs[level.idx].label);
        }
        key
    }

    /// The current arc ends a stored key.
    pub fn is_accept(&self) -> bool {
        self.current_arc().map(|a| a.accept).unwrap_or(false)
    }

    /// Sum of value contributions along the current path, plus the accept
    /// value when the position is an accept state.
    pub fn value(&self) -> Value {
        let mut acc = Value::None;
        for level in &self.stack {
            acc = self.vtype.add(&acc, &level.arcs[level.idx].value);
        }
        if let Some(arc) = self.current_arc() {
            if arc.accept {
                acc = self.vtype.add(&acc, &arc.accept_value);
            }
        }
        acc
    }

    /// Descend through the current arc's target. Returns false on a stop arc.
    pub fn follow(&mut self) -> Result<bool> {
        let target = match self.current_arc().and_then(|a| a.target) {
            Some(target) => target,
            None => return Ok(false),
        };
        let arcs = self.reader.arcs_at(target)?;
        if arcs.is_empty() {
            return Ok(false);
        }
        self.stack.push(Level { arcs, idx: 0 });
        Ok(true)
    }

    /// Advance to the next arc in depth-first order: pop exhausted levels,
    /// then step the sibling at the new top. False when the graph is done.
    pub fn next_arc(&mut self) -> bool {
        while let Some(top) = self.stack.last_mut() {
            top.idx += 1;
            if top.idx < top.arcs.len() {
                return true;
            }
            self.stack.pop();
        }
        false
    }

    /// Move forward among the current node's remaining siblings to an exact
    /// label. Position is untouched when the label is absent.
    pub fn switch_to(&mut self, label: &[u8]) -> bool {
        let top = match self.stack.last_mut() {
            Some(top) => top,
            None => return false,
        };
        for i in top.idx..top.arcs.len() {
            match top.arcs[i].label.as_slice().cmp(label) {
                std::cmp::Ordering::Equal => {
                    top.idx = i;
                    return true;
                }
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Less => {}
            }
        }
        false
    }

    /// Greedily trace a byte path from the current position. Returns false
    /// if the path is not present.
    pub fn find_path(&mut self, path: &[u8]) -> Result<bool> {
        for (i, &b) in path.iter().enumerate() {
            if i > 0 && !self.follow()? {
                return Ok(false);
            }
            if !self.switch_to(&[b]) {
                return Ok(false);
            }
        }
        Ok(!path.is_empty())
    }

    /// Advance in depth-first order until the current key is >= `key`.
    pub fn skip_to(&mut self, key: &[u8]) -> Result<()> {
        while self.is_valid() {
            let current = self.key();
            if current.as_slice() >= key {
                break;
            }
            if key.starts_with(&current) && self.follow()? {
                continue;
            }
            if !self.next_arc() {
                break;
            }
        }
        Ok(())
    }

    /// Lazy lexicographic sequence of accepted keys from this position.
    pub fn flatten(self) -> FlattenIter<'a> {
        FlattenIter { cursor: self, started: false }
    }
}

/// Depth-first iterator over accepted (key, value) pairs.
pub struct FlattenIter<'a> {
    cursor: Cursor<'a>,
    started: bool,
}

impl<'a> Iterator for FlattenIter<'a> {
    type Item = Result<(Vec<u8>, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if !self.started {
                self.started = true;
            } else {
                match self.cursor.follow() {
                    Ok(true) => {}
                    Ok(false) => {
                        if !self.cursor.next_arc() {
                            return None;
                        }
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
            if !self.cursor.is_valid() {
                return None;
            }
            if self.cursor.is_accept() {
                return Some(Ok((self.cursor.key(), self.cursor.value())));
            }
        }
    }
}
