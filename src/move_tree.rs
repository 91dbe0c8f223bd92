//! The node store plus a mounted, cursor-synchronized board.

use crate::board::{Board, BoardMove};
use crate::ids::NodeId;
use crate::node_store::{MoveNode, NodeStore};

/// Owns the arena, the live ("mounted") board, the starting position, and
/// the cursor. All navigation and replay funnel through here — the board
/// is never exposed as a resource shared outside this type.
#[derive(Debug, Clone)]
pub struct MoveTree {
    store: NodeStore,
    board: Board,
    starting_board: Board,
    start_ply: u32,
    cursor: NodeId,
}

impl MoveTree {
    pub fn new(starting_board: Board) -> Self {
        MoveTree {
            store: NodeStore::new(),
            board: starting_board.clone(),
            starting_board,
            start_ply: 0,
            cursor: NodeId::ROOT,
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut NodeStore {
        &mut self.store
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn starting_board(&self) -> &Board {
        &self.starting_board
    }

    pub fn start_ply(&self) -> u32 {
        self.start_ply
    }

    pub fn cursor(&self) -> NodeId {
        self.cursor
    }

    pub fn set_cursor_raw(&mut self, id: NodeId) {
        self.cursor = id;
    }

    /// Rebase the tree at a new starting position (used by
    /// `truncateVariation(BEFORE_MOVE)` and by `setStartingBoard`).
    pub fn set_starting_board(&mut self, board: Board, start_ply: u32) {
        self.starting_board = board.clone();
        self.start_ply = start_ply;
        self.board = board;
    }

    pub fn set_chess960(&mut self, on: bool) {
        self.board.set_chess960(on);
        self.starting_board.set_chess960(on);
    }

    /// Apply `mv` to the live board from the cursor's position and append
    /// a new node for it, advancing the cursor. Does not link the new node
    /// into any parent's `next`/`variations` — the caller decides whether
    /// this is a mainline continuation or a new variation.
    pub fn append_move_after_cursor(&mut self, mv: BoardMove) -> Option<NodeId> {
        if !self.board.do_move(&mv) {
            return None;
        }
        let parent_ply = self.store.get(self.cursor).map(|n| n.ply).unwrap_or(0);
        let id = self.store.append(MoveNode {
            mv: Some(mv),
            ply: parent_ply + 1,
            nags: Vec::new(),
            prev: Some(self.cursor),
            next: None,
            parent: None,
            variations: Vec::new(),
            removed: false,
        });
        self.cursor = id;
        Some(id)
    }

    // --- node-level move predicates -----------------------------------

    pub fn is_mainline(&self, id: NodeId) -> bool {
        id == NodeId::ROOT || self.store.get(id).map(|n| n.parent.is_none()).unwrap_or(false)
    }

    pub fn at_line_start(&self, id: NodeId) -> bool {
        match self.store.get(id) {
            None => false,
            Some(n) => n.prev == Some(NodeId::ROOT) || n.parent == n.prev,
        }
    }

    pub fn at_game_start(&self, id: NodeId) -> bool {
        id == NodeId::ROOT
    }

    pub fn at_line_end(&self, id: NodeId) -> bool {
        self.store.get(id).map(|n| n.next.is_none()).unwrap_or(true)
    }

    pub fn at_game_end(&self, id: NodeId) -> bool {
        self.is_mainline(id) && self.at_line_end(id)
    }

    /// The branch point for `id`: the node whose position precedes it.
    /// Every node's `prev` field already holds this, but naming it here
    /// keeps the sibling/variation bookkeeping below legible.
    fn branch_point(&self, id: NodeId) -> Option<NodeId> {
        self.store.get(id).and_then(|n| n.prev)
    }

    pub fn number_of_siblings(&self, id: NodeId) -> usize {
        match self.branch_point(id).and_then(|p| self.store.get(p)) {
            Some(p) => p.variations.len() + 1,
            None => 1,
        }
    }

    pub fn enumerate_variations(&self, id: NodeId) -> Vec<NodeId> {
        self.store.get(id).map(|n| n.variations.clone()).unwrap_or_default()
    }

    /// 1-based position among `id`'s siblings, or 0 if `id` is the
    /// mainline continuation of its branch point.
    pub fn variation_number(&self, id: NodeId) -> usize {
        let Some(p) = self.branch_point(id) else { return 0 };
        let Some(pnode) = self.store.get(p) else { return 0 };
        if pnode.next == Some(id) {
            0
        } else {
            pnode.variations.iter().position(|&v| v == id).map(|i| i + 1).unwrap_or(0)
        }
    }

    pub fn variation_has_siblings(&self, id: NodeId) -> bool {
        self.number_of_siblings(id) > 1
    }

    pub fn variation_start_move(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while !self.at_line_start(cur) {
            match self.branch_point(cur) {
                Some(p) => cur = p,
                None => break,
            }
        }
        cur
    }

    fn variations_slot<'a>(store: &'a mut NodeStore, p: NodeId) -> Option<&'a mut Vec<NodeId>> {
        store.get_raw_mut(p).map(|n| &mut n.variations)
    }

    pub fn can_move_variation_up(&self, id: NodeId) -> bool {
        let Some(p) = self.branch_point(id) else { return false };
        let Some(pnode) = self.store.get(p) else { return false };
        pnode.variations.iter().position(|&v| v == id).map(|i| i > 0).unwrap_or(false)
    }

    pub fn move_variation_up(&mut self, id: NodeId) -> bool {
        let Some(p) = self.branch_point(id) else { return false };
        let Some(vars) = Self::variations_slot(&mut self.store, p) else { return false };
        if let Some(i) = vars.iter().position(|&v| v == id) {
            if i > 0 {
                vars.swap(i, i - 1);
                return true;
            }
        }
        false
    }

    pub fn can_move_variation_down(&self, id: NodeId) -> bool {
        let Some(p) = self.branch_point(id) else { return false };
        let Some(pnode) = self.store.get(p) else { return false };
        pnode
            .variations
            .iter()
            .position(|&v| v == id)
            .map(|i| i + 1 < pnode.variations.len())
            .unwrap_or(false)
    }

    pub fn move_variation_down(&mut self, id: NodeId) -> bool {
        let Some(p) = self.branch_point(id) else { return false };
        let Some(vars) = Self::variations_slot(&mut self.store, p) else { return false };
        if let Some(i) = vars.iter().position(|&v| v == id) {
            if i + 1 < vars.len() {
                vars.swap(i, i + 1);
                return true;
            }
        }
        false
    }

    /// Rewrite `parent` across `first_of_variation`'s `next` chain only —
    /// nested variations off nodes in that chain keep their own parent
    /// (invariant 4 ties `parent` to the chain, not to descendants).
    pub fn reparent(&mut self, first_of_variation: NodeId, new_parent: Option<NodeId>) {
        let mut cur = Some(first_of_variation);
        while let Some(id) = cur {
            let Some(node) = self.store.get_raw_mut(id) else { break };
            node.parent = new_parent;
            cur = node.next;
        }
    }

    // --- navigation ------------------------------------------------------

    pub fn move_to_start(&mut self) {
        self.board = self.starting_board.clone();
        self.cursor = NodeId::ROOT;
    }

    /// Walk `next` without leaving the current line. Returns plies moved.
    pub fn move_to_line_end(&mut self) -> usize {
        let mut count = 0;
        while let Some(next) = self.store.get(self.cursor).and_then(|n| n.next) {
            if !self.step_forward_to(next) {
                break;
            }
            count += 1;
        }
        count
    }

    /// Climb to the mainline (regardless of current line), then walk to
    /// its end.
    pub fn move_to_end(&mut self) {
        let mut last = NodeId::ROOT;
        let mut cur = self.store.get(NodeId::ROOT).and_then(|n| n.next);
        while let Some(id) = cur {
            last = id;
            cur = self.store.get(id).and_then(|n| n.next);
        }
        self.move_to_id(last);
    }

    /// Apply one step forward along `next`, mutating `self.board`.
    fn step_forward_to(&mut self, target: NodeId) -> bool {
        let Some(mv) = self.store.get(target).and_then(|n| n.mv.clone()) else { return false };
        if self.board.do_move(&mv) {
            self.cursor = target;
            true
        } else {
            false
        }
    }

    /// Advance up to `k` plies along `next`. Returns plies actually moved.
    pub fn forward(&mut self, k: usize) -> usize {
        let mut moved = 0;
        for _ in 0..k {
            let Some(next) = self.store.get(self.cursor).and_then(|n| n.next) else { break };
            if !self.step_forward_to(next) {
                break;
            }
            moved += 1;
        }
        moved
    }

    /// Retreat up to `k` plies via `prev`. Returns plies actually moved.
    pub fn backward(&mut self, k: usize) -> usize {
        let mut moved = 0;
        for _ in 0..k {
            if self.cursor == NodeId::ROOT {
                break;
            }
            let Some(prev) = self.store.get(self.cursor).and_then(|n| n.prev) else { break };
            if !self.board.undo_move() {
                break;
            }
            self.cursor = prev;
            moved += 1;
        }
        moved
    }

    /// Move into a variation. Precondition: `first_id` is one of the
    /// cursor's `variations`.
    pub fn enter_variation(&mut self, first_id: NodeId) -> bool {
        let is_variation_of_cursor =
            self.store.get(self.cursor).map(|n| n.variations.contains(&first_id)).unwrap_or(false);
        if !is_variation_of_cursor {
            return false;
        }
        self.step_forward_to(first_id)
    }

    /// Teleport to `target`: reconstruct the path from node 0 (pushing
    /// `mv(n), mv(prev(n)), …` until `prev` is the sentinel), reset the
    /// board to the starting position, then replay that path forward. An
    /// optional algebraic-move accumulator is returned for engines that
    /// can consume a move sequence; it is cleared (`None`) if any move
    /// along the path is a null move, since UCI cannot express those.
    pub fn move_to_id(&mut self, target: NodeId) -> Option<Vec<String>> {
        if !self.store.is_live(target) {
            return None;
        }
        let mut path = Vec::new();
        let mut cur = target;
        while cur != NodeId::ROOT {
            path.push(cur);
            match self.store.get(cur).and_then(|n| n.prev) {
                Some(p) => cur = p,
                None => break,
            }
        }
        path.reverse();

        self.board = self.starting_board.clone();
        self.cursor = NodeId::ROOT;

        let mut algebraic = Some(Vec::new());
        for id in path {
            let Some(mv) = self.store.get(id).and_then(|n| n.mv.clone()) else { break };
            if mv.is_null() {
                algebraic = None;
            } else if let Some(acc) = algebraic.as_mut() {
                acc.push(self.board.move_to_san(&mv));
            }
            if !self.board.do_move(&mv) {
                break;
            }
            self.cursor = id;
        }
        algebraic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_store::MoveNode;

    fn push_move(tree: &mut MoveTree, parent: NodeId, san: &str) -> NodeId {
        let mv = tree.board().parse_move(san).expect("legal san in test");
        assert!(tree.board.do_move(&mv));
        let ply = tree.store.get(parent).map(|n| n.ply + 1).unwrap_or(1);
        let id = tree.store.append(MoveNode {
            mv: Some(mv),
            ply,
            nags: Vec::new(),
            prev: Some(parent),
            next: None,
            parent: None,
            variations: Vec::new(),
            removed: false,
        });
        if let Some(p) = tree.store.get_raw_mut(parent) {
            p.next = Some(id);
        }
        tree.cursor = id;
        id
    }

    fn e4_e5() -> MoveTree {
        let mut tree = MoveTree::new(Board::standard_start());
        let e4 = push_move(&mut tree, NodeId::ROOT, "e4");
        push_move(&mut tree, e4, "e5");
        tree
    }

    #[test]
    fn backward_then_forward_round_trips_board() {
        let mut tree = e4_e5();
        let fen_at_e5 = tree.board().to_fen();
        tree.backward(1);
        assert_ne!(tree.board().to_fen(), fen_at_e5);
        tree.forward(1);
        assert_eq!(tree.board().to_fen(), fen_at_e5);
    }

    #[test]
    fn move_to_start_resets_cursor_and_board() {
        let mut tree = e4_e5();
        tree.move_to_start();
        assert_eq!(tree.cursor(), NodeId::ROOT);
        assert_eq!(tree.board().to_fen(), tree.starting_board().to_fen());
    }

    #[test]
    fn move_to_id_teleports_across_unrelated_subtree() {
        let mut tree = e4_e5();
        let e4 = tree.store.get(NodeId::ROOT).unwrap().next.unwrap();
        tree.move_to_start();
        let acc = tree.move_to_id(e4);
        assert_eq!(tree.cursor(), e4);
        assert_eq!(acc, Some(vec!["e4".to_string()]));
    }

    #[test]
    fn variation_number_zero_for_mainline_nonzero_for_variation() {
        let mut tree = e4_e5();
        let e4 = tree.store.get(NodeId::ROOT).unwrap().next.unwrap();
        tree.move_to_id(e4);
        let c5_mv = tree.board().parse_move("c5").unwrap();
        tree.board.undo_move();
        tree.board.do_move(&c5_mv);
        let c5 = tree.store.append(MoveNode {
            mv: Some(c5_mv),
            ply: 2,
            nags: Vec::new(),
            prev: Some(e4),
            next: None,
            parent: Some(e4),
            variations: Vec::new(),
            removed: false,
        });
        tree.store.get_raw_mut(e4).unwrap().variations.push(c5);

        let e5 = tree.store.get(e4).unwrap().next.unwrap();
        assert_eq!(tree.variation_number(e5), 0);
        assert_eq!(tree.variation_number(c5), 1);
        assert!(!tree.is_mainline(c5));
        assert!(tree.is_mainline(e5));
    }
}
