use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::fst::arc::{FIXED_MARKER, GraphArc};
use crate::fst::values::{Value, ValuesType};
use crate::util::varint::write_varint;

pub const MAGIC: &[u8; 4] = b"QLG1";
pub const VERSION: u32 = 1;
/// magic + version + directory pointer
pub const HEADER_LEN: u64 = 16;

const MAX_KEY_LEN: usize = 65_535;

/// Trailing directory, bincode-encoded after all fields are closed. The
/// header pointer is backpatched to its offset.
#[derive(Debug, Serialize, Deserialize)]
pub struct GraphDirectory {
    pub vtype_code: u8,
    pub fixed_len: u8,
    pub roots: BTreeMap<String, Option<u64>>,
}

/// Construction counters, exposed so callers can observe suffix sharing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCounters {
    pub keys_inserted: u64,
    pub nodes_written: u64,
    pub nodes_deduped: u64,
    pub arcs_written: u64,
}

/// Transient node during construction. Compiled (written and replaced by its
/// file address) once no future key can extend it.
struct UncompiledNode {
    arcs: Vec<GraphArc>,
    /// This node ends a stored key.
    accept: bool,
    /// Value contributed at acceptance.
    value: Value,
}

impl UncompiledNode {
    fn new() -> Self {
        UncompiledNode {
            arcs: Vec::new(),
            accept: false,
            value: Value::None,
        }
    }

    fn add_arc(&mut self, label: u8) {
        self.arcs.push(GraphArc::new(vec![label]));
    }

    /// Push a value prefix down into everything reachable through this node.
    fn prepend_value(&mut self, prefix: &Value, vtype: ValuesType) {
        for arc in &mut self.arcs {
            arc.value = vtype.add(prefix, &arc.value);
        }
        if self.accept {
            self.value = vtype.add(prefix, &self.value);
        }
    }
}

/// Writes a minimal acyclic graph of byte-string keys. Keys must arrive in
/// strictly ascending order within each field; structurally identical
/// suffixes share one on-disk node.
pub struct GraphWriter {
    out: File,
    pos: u64,
    vtype: ValuesType,
    roots: BTreeMap<String, Option<u64>>,
    current_field: Option<String>,
    node_stack: Vec<UncompiledNode>,
    lastkey: Vec<u8>,
    /// serialized node bytes -> address of the first identical node
    seen: HashMap<Vec<u8>, u64>,
    counters: GraphCounters,
}

impl GraphWriter {
    pub fn create(path: impl AsRef<Path>, vtype: ValuesType) -> Result<Self> {
        let mut out = File::create(path)?;
        out.write_all(MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&0u64.to_le_bytes())?; // directory pointer, backpatched

        Ok(GraphWriter {
            out,
            pos: HEADER_LEN,
            vtype,
            roots: BTreeMap::new(),
            current_field: None,
            node_stack: Vec::new(),
            lastkey: Vec::new(),
            seen: HashMap::new(),
            counters: GraphCounters::default(),
        })
    }

    pub fn values_type(&self) -> ValuesType {
        self.vtype
    }

    pub fn counters(&self) -> GraphCounters {
        self.counters
    }

    pub fn start_field(&mut self, name: &str) -> Result<()> {
        if self.current_field.is_some() {
            return Err(Error::new(ErrorKind::InvalidState, "field already open"));
        }
        if self.roots.contains_key(name) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("field {:?} already written", name),
            ));
        }
        self.current_field = Some(name.to_string());
        self.node_stack = vec![UncompiledNode::new()];
        self.lastkey.clear();
        Ok(())
    }

    /// Insert the next key. Fails with `OutOfOrder` unless `key` is strictly
    /// greater than the previous key in this field; an identical key merges
    /// values instead of adding arcs.
    pub fn insert(&mut self, key: &[u8], value: Value) -> Result<()> {
        if self.current_field.is_none() {
            self.start_field("")?;
        }
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(Error::new(
                ErrorKind::InvalidValue,
                format!("key length {} out of range", key.len()),
            ));
        }
        if !self.vtype.is_valid(&value) {
            return Err(Error::new(
                ErrorKind::InvalidValue,
                format!("value {:?} not valid for {:?}", value, self.vtype),
            ));
        }

        let duplicate = match (&key[..]).cmp(&self.lastkey[..]) {
            std::cmp::Ordering::Less => {
                return Err(Error::out_of_order(format!(
                    "key {:?} after {:?}",
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(&self.lastkey)
                )));
            }
            std::cmp::Ordering::Equal => !self.lastkey.is_empty(),
            std::cmp::Ordering::Greater => false,
        };

        let prefixlen = key
            .iter()
            .zip(self.lastkey.iter())
            .take_while(|(a, b)| a == b)
            .count();

        self.freeze_tail(prefixlen)?;

        // Hoist shared value prefixes toward the root along the common path.
        // This must run before the new suffix arcs exist: a pushed-down
        // prefix belongs to the previous key's subtree only.
        let mut rest = value;
        if self.vtype != ValuesType::None {
            for depth in 1..=prefixlen {
                let arc_value = self.path_arc(depth - 1)?.value.clone();
                let common = self.vtype.common(&arc_value, &rest);
                let pushed_down = self.vtype.subtract(&arc_value, &common);
                let remainder = self.vtype.subtract(&rest, &common);
                self.path_arc_mut(depth - 1)?.value = common;
                if !pushed_down.is_none() {
                    let vtype = self.vtype;
                    self.node_stack[depth].prepend_value(&pushed_down, vtype);
                }
                rest = remainder;
            }
        }

        // Append uncompiled nodes for the new suffix.
        for &b in &key[prefixlen..] {
            let parent = self.top_node_mut()?;
            parent.add_arc(b);
            self.node_stack.push(UncompiledNode::new());
        }
        if duplicate {
            let vtype = self.vtype;
            let node = self.top_node_mut()?;
            node.value = vtype.merge(&node.value, &rest);
        } else {
            self.top_node_mut()?.accept = true;
            // The residual value rides on the first arc of the new suffix.
            if !rest.is_none() {
                self.path_arc_mut(prefixlen)?.value = rest;
            }
        }

        self.lastkey = key.to_vec();
        self.counters.keys_inserted += 1;
        Ok(())
    }

    pub fn finish_field(&mut self) -> Result<()> {
        let name = match self.current_field.take() {
            Some(name) => name,
            None => return Err(Error::new(ErrorKind::InvalidState, "no field open")),
        };

        self.freeze_tail(0)?;
        let root = match self.node_stack.pop() {
            Some(node) => self.compile(node)?,
            None => None,
        };
        self.roots.insert(name, root);
        self.node_stack.clear();
        self.lastkey.clear();
        Ok(())
    }

    /// Finish any open field, write the field-root directory, backpatch the
    /// header pointer.
    pub fn close(mut self) -> Result<GraphCounters> {
        if self.current_field.is_some() {
            self.finish_field()?;
        }

        let dir_offset = self.pos;
        let (vtype_code, fixed_len) = match self.vtype {
            ValuesType::FixedBytes(n) => (self.vtype.code(), n),
            _ => (self.vtype.code(), 0),
        };
        let directory = GraphDirectory {
            vtype_code,
            fixed_len,
            roots: std::mem::take(&mut self.roots),
        };
        let encoded = bincode::serialize(&directory)?;
        self.emit(&encoded)?;

        self.out.seek(SeekFrom::Start(8))?;
        self.out.write_all(&dir_offset.to_le_bytes())?;
        self.out.sync_all()?;
        Ok(self.counters)
    }

    /// Compile and link every node strictly below the shared-prefix depth.
    /// Sorted key order guarantees those suffixes can never be extended.
    fn freeze_tail(&mut self, prefixlen: usize) -> Result<()> {
        while self.node_stack.len() > prefixlen + 1 {
            let node = match self.node_stack.pop() {
                Some(node) => node,
                None => return Err(Error::new(ErrorKind::Internal, "empty node stack")),
            };
            let accept = node.accept;
            let accept_value = node.value.clone();
            let addr = self.compile(node)?;

            let arc = match self.node_stack.last_mut().and_then(|n| n.arcs.last_mut()) {
                Some(arc) => arc,
                None => return Err(Error::new(ErrorKind::Internal, "frozen node has no parent arc")),
            };
            arc.target = addr;
            arc.accept = accept;
            arc.accept_value = accept_value;
        }
        Ok(())
    }

    /// Serialize a node's arcs and write them, deduplicating structurally
    /// identical nodes by their exact serialized bytes. Returns the node
    /// address, or None for an arc-less node (stop state).
    fn compile(&mut self, mut node: UncompiledNode) -> Result<Option<u64>> {
        if node.arcs.is_empty() {
            return Ok(None);
        }

        let arc_count = node.arcs.len();
        if let Some(last) = node.arcs.last_mut() {
            last.lastarc = true;
        }

        let mut encoded_arcs: Vec<Vec<u8>> = Vec::with_capacity(arc_count);
        for arc in &node.arcs {
            let mut buf = Vec::new();
            arc.encode(&mut buf, self.vtype)?;
            encoded_arcs.push(buf);
        }

        let mut bytes = Vec::new();
        let uniform = encoded_arcs.len() > 1
            && encoded_arcs.windows(2).all(|w| w[0].len() == w[1].len());
        if uniform {
            bytes.push(FIXED_MARKER);
            write_varint(&mut bytes, encoded_arcs[0].len() as u64);
            write_varint(&mut bytes, encoded_arcs.len() as u64);
        }
        for arc in &encoded_arcs {
            bytes.extend_from_slice(arc);
        }

        if let Some(&addr) = self.seen.get(&bytes) {
            self.counters.nodes_deduped += 1;
            return Ok(Some(addr));
        }

        let addr = self.pos;
        self.emit(&bytes)?;
        self.seen.insert(bytes, addr);
        self.counters.nodes_written += 1;
        self.counters.arcs_written += arc_count as u64;
        Ok(Some(addr))
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    fn top_node_mut(&mut self) -> Result<&mut UncompiledNode> {
        self.node_stack
            .last_mut()
            .ok_or_else(|| Error::new(ErrorKind::Internal, "empty node stack"))
    }

    /// Last arc of the node at `depth`, i.e. the arc on the current path.
    fn path_arc(&self, depth: usize) -> Result<&GraphArc> {
        self.node_stack
            .get(depth)
            .and_then(|n| n.arcs.last())
            .ok_or_else(|| Error::new(ErrorKind::Internal, "missing path arc"))
    }

    fn path_arc_mut(&mut self, depth: usize) -> Result<&mut GraphArc> {
        self.node_stack
            .get_mut(depth)
            .and_then(|n| n.arcs.last_mut())
            .ok_or_else(|| Error::new(ErrorKind::Internal, "missing path arc"))
    }
}
