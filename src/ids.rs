//! Tagged identifiers for move-tree nodes.
//!
//! "No move", "the cursor", and a concrete id are modeled as a proper
//! tagged variant rather than disjoint sentinel values sharing an integer
//! namespace with real ids, so a caller cannot mistake one for the other;
//! [`NodeRef::resolve`] collapses the variant to a concrete id once, at
//! the entry of each operation.

use std::fmt;

/// A concrete, resolved node id. Dense after `compact()`, stable in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A caller-supplied reference to a node: either a concrete id, the live
/// cursor, or "no move" (a failed lookup, or "not applicable").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Node(NodeId),
    Current,
    None,
}

impl NodeRef {
    /// Resolve against a cursor. Does not check liveness or bounds — callers
    /// still go through `NodeStore::get`/`get_mut`, which reject tombstones
    /// and out-of-range ids by returning `NodeRef::None`-equivalent results.
    pub fn resolve(self, cursor: NodeId) -> Option<NodeId> {
        match self {
            NodeRef::Node(id) => Some(id),
            NodeRef::Current => Some(cursor),
            NodeRef::None => None,
        }
    }
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        NodeRef::Node(id)
    }
}
