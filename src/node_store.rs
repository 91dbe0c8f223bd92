//! Append-only arena of move nodes with tombstones and compaction.

use std::collections::HashMap;

use crate::board::BoardMove;
use crate::ids::NodeId;

/// A single ply in the tree. Node 0 is the sentinel: its `mv` is `None`,
/// `ply` is 0, `prev`/`parent` are `None`.
#[derive(Debug, Clone)]
pub struct MoveNode {
    pub mv: Option<BoardMove>,
    pub ply: u32,
    pub nags: Vec<u8>,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
    pub parent: Option<NodeId>,
    pub variations: Vec<NodeId>,
    pub removed: bool,
}

impl MoveNode {
    fn sentinel() -> Self {
        MoveNode {
            mv: None,
            ply: 0,
            nags: Vec::new(),
            prev: None,
            next: None,
            parent: None,
            variations: Vec::new(),
            removed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeStore {
    nodes: Vec<MoveNode>,
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore {
    pub fn new() -> Self {
        NodeStore { nodes: vec![MoveNode::sentinel()] }
    }

    pub fn append(&mut self, node: MoveNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&MoveNode> {
        self.nodes.get(id.index()).filter(|n| !n.removed)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut MoveNode> {
        let removed = self.nodes.get(id.index()).map(|n| n.removed).unwrap_or(true);
        if removed { None } else { self.nodes.get_mut(id.index()) }
    }

    /// Bypasses the tombstone check — used internally by `compact` and by
    /// removal, which must still see the node while marking it dead.
    pub fn get_raw_mut(&mut self, id: NodeId) -> Option<&mut MoveNode> {
        self.nodes.get_mut(id.index())
    }

    pub fn get_raw(&self, id: NodeId) -> Option<&MoveNode> {
        self.nodes.get(id.index())
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id.index()).map(|n| !n.removed).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // A freshly constructed store always holds the sentinel, so
        // "empty" means no moves were ever added, not zero nodes.
        self.live_count() <= 1
    }

    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.removed).count()
    }

    /// Mark `id` and every node reachable from it (its `next` chain and
    /// every variation hanging off any node in that chain) as removed.
    pub fn tombstone_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(node) = self.nodes.get_mut(cur.index()) else { continue };
            if node.removed {
                continue;
            }
            node.removed = true;
            if let Some(next) = node.next {
                stack.push(next);
            }
            stack.extend(node.variations.iter().copied());
        }
    }

    /// Physically drop every tombstoned node, remapping all surviving
    /// references (`next`, `prev`, `parent`, `variations[]`) to dense ids.
    /// Returns the cursor's id in the new numbering, or `NodeId::ROOT` if
    /// the cursor itself was tombstoned (callers are expected to have
    /// already relocated the cursor to a live ancestor before compacting).
    pub fn compact(&mut self, cursor: NodeId) -> NodeId {
        let mut remap: HashMap<u32, u32> = HashMap::new();
        let mut new_nodes = Vec::with_capacity(self.nodes.len());
        for (old_idx, node) in self.nodes.iter().enumerate() {
            if node.removed {
                continue;
            }
            remap.insert(old_idx as u32, new_nodes.len() as u32);
            new_nodes.push(node.clone());
        }

        let remap_id = |remap: &HashMap<u32, u32>, id: Option<NodeId>| -> Option<NodeId> {
            id.and_then(|i| remap.get(&i.0)).map(|&n| NodeId(n))
        };

        for node in &mut new_nodes {
            node.prev = remap_id(&remap, node.prev);
            node.next = remap_id(&remap, node.next);
            node.parent = remap_id(&remap, node.parent);
            node.variations = node
                .variations
                .iter()
                .filter_map(|v| remap.get(&v.0).map(|&n| NodeId(n)))
                .collect();
            // Defensive filter: drop any variation entry remapped to id 0.
            // No live variation should ever point at the sentinel, so this
            // should be a no-op; kept with a debug assertion backing it.
            debug_assert!(
                node.variations.iter().all(|v| v.0 != 0),
                "variation unexpectedly remapped to the sentinel id"
            );
            node.variations.retain(|v| v.0 != 0);
        }

        self.nodes = new_nodes;

        remap
            .get(&cursor.0)
            .map(|&n| NodeId(n))
            .unwrap_or(NodeId::ROOT)
    }

    /// Compute the old-id-to-new-id mapping `compact()` would produce,
    /// without mutating anything. Callers that own side tables keyed by
    /// node id (annotations) use this to remap those tables in lockstep
    /// with the physical compaction.
    pub fn compute_live_remap(&self) -> HashMap<u32, u32> {
        let mut remap = HashMap::new();
        let mut next = 0u32;
        for (old_idx, node) in self.nodes.iter().enumerate() {
            if node.removed {
                continue;
            }
            remap.insert(old_idx as u32, next);
            next += 1;
        }
        remap
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (NodeId, &MoveNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.removed)
            .map(|(i, n)| (NodeId(i as u32), n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(prev: NodeId, ply: u32) -> MoveNode {
        MoveNode {
            mv: Some(BoardMove::Null),
            ply,
            nags: Vec::new(),
            prev: Some(prev),
            next: None,
            parent: None,
            variations: Vec::new(),
            removed: false,
        }
    }

    #[test]
    fn new_store_has_only_the_sentinel_live() {
        let store = NodeStore::new();
        assert!(store.is_empty());
        assert!(store.is_live(NodeId::ROOT));
    }

    #[test]
    fn append_then_tombstone_then_compact_shrinks_ids() {
        let mut store = NodeStore::new();
        let a = store.append(leaf(NodeId::ROOT, 1));
        store.get_raw_mut(NodeId::ROOT).unwrap().next = Some(a);
        let b = store.append(leaf(a, 2));
        store.get_raw_mut(a).unwrap().next = Some(b);

        store.tombstone_subtree(b);
        assert!(!store.is_live(b));
        assert!(store.is_live(a));

        let new_cursor = store.compact(a);
        assert_eq!(store.len(), 2); // sentinel + a
        assert_eq!(new_cursor, NodeId(1));
        assert_eq!(store.get(new_cursor).unwrap().prev, Some(NodeId::ROOT));
    }

    #[test]
    fn tombstone_subtree_follows_variations_too() {
        let mut store = NodeStore::new();
        let a = store.append(leaf(NodeId::ROOT, 1));
        store.get_raw_mut(NodeId::ROOT).unwrap().next = Some(a);
        let var = store.append(leaf(NodeId::ROOT, 1));
        store.get_raw_mut(a).unwrap().variations.push(var);

        store.tombstone_subtree(a);
        assert!(!store.is_live(a));
        assert!(!store.is_live(var));
    }
}
