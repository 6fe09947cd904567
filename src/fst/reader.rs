use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind, Result};
use crate::fst::arc::{FIXED_MARKER, GraphArc};
use crate::fst::builder::{GraphDirectory, HEADER_LEN, MAGIC, VERSION};
use crate::fst::values::ValuesType;
use crate::storage::mmap_file::MmapFile;
use crate::util::varint::read_varint;

/// Read side of a graph file: validates the header, loads the field-root
/// directory, and decodes nodes on demand from the mapped bytes.
#[derive(Debug)]
pub struct GraphReader {
    data: Arc<MmapFile>,
    vtype: ValuesType,
    roots: BTreeMap<String, Option<u64>>,
}

impl GraphReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_mmap(Arc::new(MmapFile::open_read_only(path)?))
    }

    pub fn from_mmap(data: Arc<MmapFile>) -> Result<Self> {
        let bytes = data.data();
        if bytes.len() < HEADER_LEN as usize {
            return Err(Error::format("graph file shorter than header"));
        }
        if &bytes[..4] != MAGIC {
            return Err(Error::format("bad graph magic"));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != VERSION {
            return Err(Error::format(format!("unsupported graph version {}", version)));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[8..16]);
        let dir_offset = u64::from_le_bytes(raw) as usize;
        if dir_offset < HEADER_LEN as usize || dir_offset > bytes.len() {
            return Err(Error::format("graph directory pointer out of range"));
        }

        let directory: GraphDirectory = bincode::deserialize(&bytes[dir_offset..])?;
        let vtype = ValuesType::from_code(directory.vtype_code, directory.fixed_len)?;

        Ok(GraphReader {
            data,
            vtype,
            roots: directory.roots,
        })
    }

    pub fn values_type(&self) -> ValuesType {
        self.vtype
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(|s| s.as_str())
    }

    /// Root node address of one field's graph. None means the field was
    /// written but holds no keys.
    pub fn root(&self, field: &str) -> Result<Option<u64>> {
        match self.roots.get(field) {
            Some(root) => Ok(*root),
            None => Err(Error::not_found(format!("no graph for field {:?}", field))),
        }
    }

    /// Decode all outgoing arcs of the node at `addr`, in label order.
    pub fn arcs_at(&self, addr: u64) -> Result<Vec<GraphArc>> {
        let bytes = self.data.data();
        let mut pos = addr as usize;
        if pos >= bytes.len() {
            return Err(Error::new(ErrorKind::Parse, "node address out of range"));
        }

        let mut arcs = Vec::new();
        if bytes[pos] == FIXED_MARKER {
            pos += 1;
            let (size, n) = read_varint(&bytes[pos..])?;
            pos += n;
            let (count, n) = read_varint(&bytes[pos..])?;
            pos += n;
            for _ in 0..count {
                let (arc, used) = GraphArc::decode(&bytes[pos..], self.vtype)?;
                if used != size as usize {
                    return Err(Error::new(ErrorKind::Parse, "fixed-size arc length mismatch"));
                }
                pos += used;
                arcs.push(arc);
            }
        } else {
            loop {
                let (arc, used) = GraphArc::decode(&bytes[pos..], self.vtype)?;
                pos += used;
                let last = arc.lastarc;
                arcs.push(arc);
                if last {
                    break;
                }
            }
        }
        Ok(arcs)
    }

    /// Find the arc with an exact label at the node at `addr`. Fixed-size
    /// nodes binary-search by label; others scan.
    pub fn find_arc(&self, addr: u64, label: &[u8]) -> Result<Option<GraphArc>> {
        let arcs = self.arcs_at(addr)?;
        match arcs.binary_search_by(|a| a.label.as_slice().cmp(label)) {
            Ok(i) => Ok(Some(arcs[i].clone())),
            Err(_) => Ok(None),
        }
    }
}
