//! The prototype tree: the type schema of one record in a compressed
//! vector.
//!
//! A prototype is an ordered tree of nodes. Interior nodes are structures
//! (named children) and vectors (positional children, optionally restricted
//! to one child kind). Terminal leaves are integers, scaled integers,
//! floats, and strings; each terminal is assigned a bytestream number by
//! pre-order left-to-right enumeration, and that numbering is what ties a
//! source/dest buffer to its slice of every data packet.
//!
//! Nodes live in an arena indexed by [`NodeId`]; parents are ids, not owning
//! references, so child→parent navigation is a lookup.

use crate::buffer::SourceDestBuffer;
use crate::error::{Error, Result};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPrecision {
    Single,
    Double,
}

/// Node kinds.
///
/// Signed, unsigned, and boolean wire fields are all `Integer` nodes; the
/// closed `[min, max]` interval carries the distinction (a boolean field is
/// `Integer { min: 0, max: 1 }`), exactly as the bit-packed encoding sees
/// it.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Structure,
    Vector { allow_hetero: bool },
    Integer { min: i64, max: i64 },
    ScaledInteger { min: i64, max: i64, scale: f64, offset: f64 },
    Float { precision: FloatPrecision },
    String,
}

impl NodeKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeKind::Structure | NodeKind::Vector { .. })
    }

    fn same_shape(&self, other: &NodeKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Debug)]
struct ProtoNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// The record type schema. Immutable once handed to a compressed-vector
/// node.
#[derive(Debug)]
pub struct Prototype {
    nodes: Vec<ProtoNode>,
}

impl Default for Prototype {
    fn default() -> Self {
        Self::new()
    }
}

impl Prototype {
    /// A prototype whose root is an empty structure.
    pub fn new() -> Self {
        Self {
            nodes: vec![ProtoNode {
                name: String::new(),
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Structure,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    /// Add a child under `parent`.
    ///
    /// Structure children are addressed by `name`; vector children are
    /// positional and their element name is their index, whatever `name`
    /// says. A homogeneous vector rejects a child whose kind differs in
    /// shape from its first child.
    pub fn add(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId> {
        let parent_kind = self
            .nodes
            .get(parent)
            .map(|n| n.kind.clone())
            .ok_or_else(|| Error::Internal(format!("no such node id {}", parent)))?;

        let name = match parent_kind {
            NodeKind::Structure => {
                if name.is_empty() || name.contains('/') {
                    return Err(Error::BadPathName(format!("bad element name {:?}", name)));
                }
                if self.child_by_name(parent, name).is_some() {
                    return Err(Error::BadApiArgument(format!(
                        "duplicate element name {:?}",
                        name
                    )));
                }
                name.to_string()
            }
            NodeKind::Vector { allow_hetero } => {
                if !allow_hetero {
                    if let Some(&first) = self.nodes[parent].children.first() {
                        if !self.nodes[first].kind.same_shape(&kind) {
                            return Err(Error::BadApiArgument(
                                "homogeneous vector children must share one kind".into(),
                            ));
                        }
                    }
                }
                self.nodes[parent].children.len().to_string()
            }
            _ => {
                return Err(Error::BadApiArgument(
                    "cannot add a child to a terminal node".into(),
                ))
            }
        };

        let id = self.nodes.len();
        self.nodes.push(ProtoNode {
            name,
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.nodes[id].children.len()
    }

    /// Absolute path of a node, e.g. `/cartesian/x`. The root is `/`.
    pub fn path_name(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut at = id;
        while let Some(parent) = self.nodes[at].parent {
            parts.push(self.nodes[at].name.as_str());
            at = parent;
        }
        if parts.is_empty() {
            return "/".to_string();
        }
        parts.reverse();
        format!("/{}", parts.join("/"))
    }

    fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name)
    }

    /// Resolve an absolute (leading `/`) or root-relative path to a node.
    pub fn get(&self, path: &str) -> Result<NodeId> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Ok(self.root());
        }
        let mut at = self.root();
        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(Error::BadPathName(path.to_string()));
            }
            at = self
                .child_by_name(at, segment)
                .ok_or_else(|| Error::PathUndefined(path.to_string()))?;
        }
        Ok(at)
    }

    /// Number of terminal leaves, i.e. the bytestream count K.
    pub fn terminal_count(&self) -> usize {
        self.count_terminals(self.root())
    }

    fn count_terminals(&self, id: NodeId) -> usize {
        if self.nodes[id].kind.is_terminal() {
            return 1;
        }
        self.nodes[id]
            .children
            .iter()
            .map(|&c| self.count_terminals(c))
            .sum()
    }

    /// Bytestream number of a terminal: its position in the pre-order,
    /// declared-child-order enumeration of terminal leaves. `None` for
    /// interior nodes.
    pub fn find_terminal_position(&self, target: NodeId) -> Option<u64> {
        let mut position = 0u64;
        self.walk_terminals(self.root(), target, &mut position)
    }

    fn walk_terminals(&self, id: NodeId, target: NodeId, position: &mut u64) -> Option<u64> {
        if self.nodes[id].kind.is_terminal() {
            if id == target {
                return Some(*position);
            }
            *position += 1;
            return None;
        }
        for &child in &self.nodes[id].children {
            if let Some(found) = self.walk_terminals(child, target, position) {
                return Some(found);
            }
        }
        None
    }

    /// All terminal ids in bytestream order.
    pub fn terminals(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_terminals(self.root(), &mut out);
        out
    }

    fn collect_terminals(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if self.nodes[id].kind.is_terminal() {
            out.push(id);
            return;
        }
        for &child in &self.nodes[id].children {
            self.collect_terminals(child, out);
        }
    }

    /// Verify a buffer list against this prototype: every path must resolve
    /// to a distinct terminal; unless `allow_missing`, the list must also
    /// cover every terminal.
    pub fn check_buffers(&self, dbufs: &[SourceDestBuffer], allow_missing: bool) -> Result<()> {
        let mut seen: Vec<NodeId> = Vec::with_capacity(dbufs.len());
        for dbuf in dbufs {
            let id = self.get(&dbuf.path_name())?;
            if !self.nodes[id].kind.is_terminal() {
                return Err(Error::BadPathName(format!(
                    "{} is not a terminal node",
                    dbuf.path_name()
                )));
            }
            if seen.contains(&id) {
                return Err(Error::BadApiArgument(format!(
                    "duplicate buffer for path {}",
                    dbuf.path_name()
                )));
            }
            seen.push(id);
        }
        if !allow_missing {
            for terminal in self.terminals() {
                if !seen.contains(&terminal) {
                    return Err(Error::BadApiArgument(format!(
                        "no buffer supplied for {}",
                        self.path_name(terminal)
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// { cartesian: { x: Scaled, y: Scaled }, intensity: Int, labels: Vector[String, String] }
    fn sample() -> (Prototype, [NodeId; 5]) {
        let mut p = Prototype::new();
        let root = p.root();
        let cartesian = p.add(root, "cartesian", NodeKind::Structure).unwrap();
        let x = p
            .add(cartesian, "x", NodeKind::ScaledInteger { min: 0, max: 1000, scale: 0.01, offset: 0.0 })
            .unwrap();
        let y = p
            .add(cartesian, "y", NodeKind::ScaledInteger { min: 0, max: 1000, scale: 0.01, offset: 0.0 })
            .unwrap();
        let intensity = p
            .add(root, "intensity", NodeKind::Integer { min: 0, max: 255 })
            .unwrap();
        let labels = p
            .add(root, "labels", NodeKind::Vector { allow_hetero: false })
            .unwrap();
        let l0 = p.add(labels, "", NodeKind::String).unwrap();
        p.add(labels, "", NodeKind::String).unwrap();
        (p, [x, y, intensity, labels, l0])
    }

    #[test]
    fn path_resolution_absolute_and_relative() {
        let (p, [x, ..]) = sample();
        assert_eq!(p.get("/cartesian/x").unwrap(), x);
        assert_eq!(p.get("cartesian/x").unwrap(), x);
        assert_eq!(p.get("/").unwrap(), p.root());
        assert!(matches!(p.get("/cartesian/z"), Err(Error::PathUndefined(_))));
        assert!(matches!(p.get("/cartesian//x"), Err(Error::BadPathName(_))));
    }

    #[test]
    fn vector_children_are_positional() {
        let (p, [.., labels, l0]) = sample();
        assert_eq!(p.get("/labels/0").unwrap(), l0);
        assert_eq!(p.child_count(labels), 2);
        assert_eq!(p.path_name(l0), "/labels/0");
    }

    #[test]
    fn bytestream_numbering_is_preorder_over_terminals() {
        let (p, [x, y, intensity, labels, l0]) = sample();
        assert_eq!(p.terminal_count(), 5);
        assert_eq!(p.find_terminal_position(x), Some(0));
        assert_eq!(p.find_terminal_position(y), Some(1));
        assert_eq!(p.find_terminal_position(intensity), Some(2));
        assert_eq!(p.find_terminal_position(l0), Some(3));
        assert_eq!(p.find_terminal_position(labels), None); // interior
        assert_eq!(p.find_terminal_position(p.root()), None);
    }

    #[test]
    fn homogeneous_vector_rejects_mixed_kinds() {
        let mut p = Prototype::new();
        let v = p
            .add(p.root(), "v", NodeKind::Vector { allow_hetero: false })
            .unwrap();
        p.add(v, "", NodeKind::String).unwrap();
        assert!(p.add(v, "", NodeKind::Integer { min: 0, max: 1 }).is_err());

        let h = p
            .add(p.root(), "h", NodeKind::Vector { allow_hetero: true })
            .unwrap();
        p.add(h, "", NodeKind::String).unwrap();
        p.add(h, "", NodeKind::Integer { min: 0, max: 1 }).unwrap();
    }

    #[test]
    fn structure_rejects_duplicate_names() {
        let mut p = Prototype::new();
        p.add(p.root(), "x", NodeKind::String).unwrap();
        assert!(matches!(
            p.add(p.root(), "x", NodeKind::String),
            Err(Error::BadApiArgument(_))
        ));
        assert!(matches!(
            p.add(p.root(), "a/b", NodeKind::String),
            Err(Error::BadPathName(_))
        ));
    }
}
