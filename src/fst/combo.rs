use crate::core::error::Result;
use crate::fst::reader::GraphReader;

/// One node of a single graph, addressed lazily.
pub struct NodeView<'a> {
    reader: &'a GraphReader,
    addr: Option<u64>,
}

impl<'a> NodeView<'a> {
    pub fn at_root(reader: &'a GraphReader, field: &str) -> Result<Self> {
        Ok(NodeView { reader, addr: reader.root(field)? })
    }

    fn labels(&self) -> Result<Vec<Vec<u8>>> {
        match self.addr {
            None => Ok(Vec::new()),
            Some(addr) => Ok(self
                .reader
                .arcs_at(addr)?
                .into_iter()
                .map(|a| a.label)
                .collect()),
        }
    }

    fn edge(&self, label: &[u8]) -> Result<Option<(bool, Option<NodeView<'a>>)>> {
        let addr = match self.addr {
            Some(addr) => addr,
            None => return Ok(None),
        };
        match self.reader.find_arc(addr, label)? {
            Some(arc) => {
                let child = arc.target.map(|t| NodeView {
                    reader: self.reader,
                    addr: Some(t),
                });
                Ok(Some((arc.accept, child)))
            }
            None => Ok(None),
        }
    }
}

/// Lazy combination of two graphs' edge sets. Nothing is materialized; each
/// step computes the combined outgoing edges of the wrapped nodes.
pub enum ComboNode<'a> {
    Simple(NodeView<'a>),
    /// Edges present in either side.
    Union(Box<ComboNode<'a>>, Box<ComboNode<'a>>),
    /// Edges present in both sides.
    Intersection(Box<ComboNode<'a>>, Box<ComboNode<'a>>),
}

impl<'a> ComboNode<'a> {
    pub fn union(a: NodeView<'a>, b: NodeView<'a>) -> Self {
        ComboNode::Union(Box::new(ComboNode::Simple(a)), Box::new(ComboNode::Simple(b)))
    }

    pub fn intersection(a: NodeView<'a>, b: NodeView<'a>) -> Self {
        ComboNode::Intersection(Box::new(ComboNode::Simple(a)), Box::new(ComboNode::Simple(b)))
    }

    /// Combined outgoing edge labels, sorted and distinct.
    pub fn edges(&self) -> Result<Vec<Vec<u8>>> {
        match self {
            ComboNode::Simple(view) => view.labels(),
            ComboNode::Union(a, b) => {
                let mut labels = a.edges()?;
                labels.extend(b.edges()?);
                labels.sort();
                labels.dedup();
                Ok(labels)
            }
            ComboNode::Intersection(a, b) => {
                let left = a.edges()?;
                let right = b.edges()?;
                Ok(left.into_iter().filter(|l| right.contains(l)).collect())
            }
        }
    }

    /// Follow one labeled edge: (accept, continuation node).
    pub fn edge(&self, label: &[u8]) -> Result<Option<(bool, Option<ComboNode<'a>>)>> {
        match self {
            ComboNode::Simple(view) => Ok(view
                .edge(label)?
                .map(|(accept, child)| (accept, child.map(ComboNode::Simple)))),
            ComboNode::Union(a, b) => {
                let left = a.edge(label)?;
                let right = b.edge(label)?;
                Ok(match (left, right) {
                    (None, None) => None,
                    (Some(edge), None) | (None, Some(edge)) => Some(edge),
                    (Some((acc_a, child_a)), Some((acc_b, child_b))) => {
                        let child = match (child_a, child_b) {
                            (Some(x), Some(y)) => {
                                Some(ComboNode::Union(Box::new(x), Box::new(y)))
                            }
                            (Some(x), None) => Some(x),
                            (None, Some(y)) => Some(y),
                            (None, None) => None,
                        };
                        Some((acc_a || acc_b, child))
                    }
                })
            }
            ComboNode::Intersection(a, b) => {
                let left = a.edge(label)?;
                let right = b.edge(label)?;
                Ok(match (left, right) {
                    (Some((acc_a, child_a)), Some((acc_b, child_b))) => {
                        let child = match (child_a, child_b) {
                            (Some(x), Some(y)) => {
                                Some(ComboNode::Intersection(Box::new(x), Box::new(y)))
                            }
                            _ => None,
                        };
                        Some((acc_a && acc_b, child))
                    }
                    _ => None,
                })
            }
        }
    }

    /// All accepted keys of the combined view, in lexicographic order.
    pub fn flatten(&self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        self.flatten_into(&mut prefix, &mut out)?;
        Ok(out)
    }

    fn flatten_into(&self, prefix: &mut Vec<u8>, out: &mut Vec<Vec<u8>>) -> Result<()> {
        for label in self.edges()? {
            if let Some((accept, child)) = self.edge(&label)? {
                prefix.extend_from_slice(&label);
                if accept {
                    out.push(prefix.clone());
                }
                if let Some(child) = child {
                    child.flatten_into(prefix, out)?;
                }
                prefix.truncate(prefix.len() - label.len());
            }
        }
        Ok(())
    }
}
