//! The full editing API over a move tree, its annotations, and its tags.
//!
//! Every public mutator here follows the same three-step shape: snapshot
//! `self` by value, perform a private `db_…` mutator that never touches
//! the undo layer, then return `(prev_snapshot, label)`. There is no
//! observer/signal plumbing — the snapshot is simply the return value,
//! and maintaining an undo stack from these pairs is the caller's
//! concern.

use std::collections::HashSet;

use crate::annotation_codec;
use crate::annotations::{AnnotationPos, AnnotationTables};
use crate::board::{Board, BoardMove};
use crate::eco::EcoClassifier;
use crate::ids::{NodeId, NodeRef};
use crate::move_tree::MoveTree;
use crate::tag_map::TagMap;

/// Returned by `move_to_san`: the formatted move plus the annotations
/// carried at that node, assembled in one pass so a caller rendering a
/// line of text doesn't have to re-resolve the node id twice.
#[derive(Debug, Clone)]
pub struct SanRender {
    pub san: String,
    pub comment: String,
    pub nags: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Game {
    tree: MoveTree,
    annotations: AnnotationTables,
    tags: TagMap,
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

impl Game {
    pub fn new() -> Self {
        Game {
            tree: MoveTree::new(Board::standard_start()),
            annotations: AnnotationTables::new(),
            tags: TagMap::new(),
        }
    }

    pub fn from_fen(fen: &str) -> anyhow::Result<Self> {
        let board = Board::from_fen(fen)?;
        let mut game = Game {
            tree: MoveTree::new(board.clone()),
            annotations: AnnotationTables::new(),
            tags: TagMap::new(),
        };
        game.tags.set("FEN", fen);
        game.tags.set("SetUp", "1");
        Ok(game)
    }

    pub fn tree(&self) -> &MoveTree {
        &self.tree
    }

    pub fn cursor(&self) -> NodeId {
        self.tree.cursor()
    }

    // --- navigation (mutate only the cursor and Board, never the tree) --

    pub fn move_to_start(&mut self) {
        self.tree.move_to_start();
    }

    pub fn move_to_end(&mut self) {
        self.tree.move_to_end();
    }

    pub fn move_to_line_end(&mut self) -> usize {
        self.tree.move_to_line_end()
    }

    pub fn forward(&mut self, k: usize) -> usize {
        self.tree.forward(k)
    }

    pub fn backward(&mut self, k: usize) -> usize {
        self.tree.backward(k)
    }

    pub fn enter_variation(&mut self, first_id: NodeId) -> bool {
        self.tree.enter_variation(first_id)
    }

    pub fn move_to_id(&mut self, id: NodeId) -> Option<Vec<String>> {
        self.tree.move_to_id(id)
    }

    // --- compaction -------------------------------------------------

    /// Build the old-to-new id remap from the live set, drop tombstoned
    /// annotations, physically compact the store, then remap the
    /// surviving annotation keys through the same map.
    fn compact(&mut self) {
        let remap = self.tree.store().compute_live_remap();
        let live: HashSet<u32> = remap.keys().copied().collect();
        self.annotations.drop_tombstoned(&live);
        let new_cursor = self.tree.store_mut().compact(self.tree.cursor());
        self.tree.set_cursor_raw(new_cursor);
        self.annotations.remap_keys(&remap);
    }

    // --- adding moves -------------------------------------------------

    fn db_add_move(&mut self, mv: BoardMove) -> Option<NodeId> {
        if !self.tree.board().is_legal(&mv) {
            return None;
        }
        let parent = self.tree.cursor();
        let id = self.tree.append_move_after_cursor(mv)?;
        self.tree.store_mut().get_raw_mut(parent)?.next = Some(id);
        Some(id)
    }

    fn db_add_variation(&mut self, mv: BoardMove) -> Option<NodeId> {
        if !self.tree.board().is_legal(&mv) {
            return None;
        }
        let parent = self.tree.cursor();
        let id = self.tree.append_move_after_cursor(mv)?;
        self.tree.store_mut().get_raw_mut(id)?.parent = Some(parent);
        self.tree.store_mut().get_raw_mut(parent)?.variations.push(id);
        Some(id)
    }

    pub fn add_move(&mut self, mv: BoardMove) -> Option<(Game, &'static str)> {
        let prev = self.clone();
        self.db_add_move(mv)?;
        Some((prev, "add move"))
    }

    pub fn add_move_san(&mut self, san: &str) -> Option<(Game, &'static str)> {
        let mv = self.tree.board().parse_move(san)?;
        self.add_move(mv)
    }

    /// `addVariation`: attach as a new first-of-variation off the cursor,
    /// preserving the cursor's existing `next`.
    pub fn add_variation(&mut self, mv: BoardMove) -> Option<(Game, &'static str)> {
        let prev = self.clone();
        // If the cursor is simultaneously at game start and line end,
        // demote the single existing move into a variation first so the
        // new list becomes the mainline.
        let cursor = self.tree.cursor();
        if self.tree.at_game_start(cursor) && self.tree.at_line_end(cursor) {
            if let Some(existing_next) = self.tree.store().get(cursor)?.next {
                self.tree.store_mut().get_raw_mut(cursor)?.next = None;
                self.tree.store_mut().get_raw_mut(existing_next)?.parent = Some(cursor);
                self.tree.store_mut().get_raw_mut(cursor)?.variations.push(existing_next);
            }
        }
        self.db_add_variation(mv)?;
        Some((prev, "add variation"))
    }

    pub fn add_variation_san(&mut self, san: &str) -> Option<(Game, &'static str)> {
        let mv = self.tree.board().parse_move(san)?;
        self.add_variation(mv)
    }

    /// `dbAddSanVariation` extended over a move list: the first SAN move
    /// establishes the new variation (preserving `addVariation`'s
    /// game-start/line-end demotion special case), every subsequent move
    /// extends that variation's own line via `addMove`. Cursor is restored
    /// to its pre-call position; the annotation (if any) attaches to the
    /// last added node.
    pub fn add_san_variation(&mut self, sans: &[&str], comment: Option<&str>) -> Option<(Game, &'static str)> {
        let prev = self.clone();
        let start_cursor = self.tree.cursor();
        let mut iter = sans.iter();
        let first_san = iter.next()?;

        let cursor = self.tree.cursor();
        if self.tree.at_game_start(cursor) && self.tree.at_line_end(cursor) {
            if let Some(existing_next) = self.tree.store().get(cursor)?.next {
                self.tree.store_mut().get_raw_mut(cursor)?.next = None;
                self.tree.store_mut().get_raw_mut(existing_next)?.parent = Some(cursor);
                self.tree.store_mut().get_raw_mut(cursor)?.variations.push(existing_next);
            }
        }
        let first_mv = self.tree.board().parse_move(first_san)?;
        let mut last = self.db_add_variation(first_mv)?;

        for san in iter {
            let mv = self.tree.board().parse_move(san)?;
            last = self.db_add_move(mv)?;
        }

        if let Some(text) = comment {
            self.annotations.set(last, AnnotationPos::AfterMove, text);
        }
        self.tree.move_to_id(start_cursor);
        Some((prev, "add variation"))
    }

    /// `addLine`: like `addMove` repeated. Cursor is restored to its
    /// pre-call position; the annotation (if any) attaches to the last
    /// added node.
    pub fn add_line_san(&mut self, sans: &[&str], comment: Option<&str>) -> Option<(Game, &'static str)> {
        let prev = self.clone();
        let start_cursor = self.tree.cursor();
        let mut last = None;
        for san in sans {
            let mv = self.tree.board().parse_move(san)?;
            last = Some(self.db_add_move(mv)?);
        }
        if let (Some(id), Some(text)) = (last, comment) {
            self.annotations.set(id, AnnotationPos::AfterMove, text);
        }
        self.tree.move_to_id(start_cursor);
        Some((prev, "add line"))
    }

    /// `replaceMove`: if the cursor has no `next`, behaves like `addMove`.
    /// Otherwise overwrites the existing `next` node's move and
    /// annotations, advances, then either truncates everything beyond
    /// (`replace_tail = true`) or truncates only from the first position
    /// the new move makes illegal (`replace_tail = false`).
    pub fn replace_move(&mut self, mv: BoardMove, replace_tail: bool) -> Option<(Game, &'static str)> {
        let prev = self.clone();
        let cursor = self.tree.cursor();
        let existing_next = self.tree.store().get(cursor)?.next;
        match existing_next {
            None => {
                self.db_add_move(mv)?;
            }
            Some(next_id) => {
                if !self.tree.board().is_legal(&mv) {
                    return None;
                }
                {
                    let node = self.tree.store_mut().get_raw_mut(next_id)?;
                    node.mv = Some(mv);
                    node.nags.clear();
                }
                self.annotations.set(next_id, AnnotationPos::AfterMove, "");
                self.annotations.set(next_id, AnnotationPos::BeforeMove, "");
                self.tree.move_to_id(next_id);
                if replace_tail {
                    self.db_truncate_after_move();
                } else {
                    let board_here = self.tree.board().clone();
                    self.db_truncate_after_next_illegal_from(next_id, board_here);
                }
            }
        }
        Some((prev, "replace move"))
    }

    // --- promotion and removal -----------------------------------------

    /// `promoteVariation`: fails if `v` is already mainline.
    pub fn promote_variation(&mut self, v: NodeId) -> Option<(Game, &'static str)> {
        if self.tree.is_mainline(v) {
            return None;
        }
        let prev = self.clone();
        let f = self.tree.variation_start_move(v);
        let p = self.tree.store().get(f)?.prev?;
        let m = self.tree.store().get(p)?.next?;
        let idx = self.tree.store().get(p)?.variations.iter().position(|&x| x == f)?;

        self.tree.store_mut().get_raw_mut(p)?.next = Some(f);
        self.tree.store_mut().get_raw_mut(p)?.variations[idx] = m;
        self.tree.reparent(f, None);
        self.tree.reparent(m, Some(p));

        self.compact();
        Some((prev, "promote variation"))
    }

    fn db_tombstone_variation(&mut self, f: NodeId) -> Option<NodeId> {
        let p = self.tree.store().get(f)?.parent?;
        self.tree.store_mut().tombstone_subtree(f);
        self.tree.store_mut().get_raw_mut(p)?.variations.retain(|&x| x != f);
        Some(p)
    }

    /// `removeVariation`: tombstones `v`'s entire line plus its nested
    /// variations, unlinks it from its parent, and moves the cursor to
    /// that parent. Refuses node 0 and the mainline.
    pub fn remove_variation(&mut self, v: NodeId) -> Option<(Game, &'static str)> {
        if v == NodeId::ROOT || self.tree.is_mainline(v) {
            return None;
        }
        let prev = self.clone();
        let f = self.tree.variation_start_move(v);
        let p = self.db_tombstone_variation(f)?;
        self.tree.set_cursor_raw(p);
        self.compact();
        Some((prev, "remove variation"))
    }

    /// `removeVariations`: iteratively strips every variation from every
    /// node in the tree.
    pub fn remove_variations(&mut self) -> (Game, &'static str) {
        let prev = self.clone();
        let ids: Vec<NodeId> = self.tree.store().iter_live().map(|(id, _)| id).collect();
        for id in ids {
            let vars = self.tree.store().get(id).map(|n| n.variations.clone()).unwrap_or_default();
            for v in vars {
                self.tree.store_mut().tombstone_subtree(v);
            }
            if let Some(n) = self.tree.store_mut().get_raw_mut(id) {
                n.variations.clear();
            }
        }
        self.compact();
        (prev, "remove all variations")
    }

    fn db_truncate_after_move(&mut self) {
        let cursor = self.tree.cursor();
        if let Some(next) = self.tree.store().get(cursor).and_then(|n| n.next) {
            self.tree.store_mut().tombstone_subtree(next);
        }
        let vars = self.tree.store().get(cursor).map(|n| n.variations.clone()).unwrap_or_default();
        for v in vars {
            self.tree.store_mut().tombstone_subtree(v);
        }
        if let Some(n) = self.tree.store_mut().get_raw_mut(cursor) {
            n.next = None;
            n.variations.clear();
        }
        self.compact();
    }

    pub fn truncate_variation_after_move(&mut self) -> (Game, &'static str) {
        let prev = self.clone();
        self.db_truncate_after_move();
        (prev, "truncate after move")
    }

    /// Makes the cursor the new game root: everything before it is
    /// discarded, ply numbers shift down by the cursor's offset, and the
    /// starting position/tags are updated to match.
    pub fn truncate_variation_before_move(&mut self) -> (Game, &'static str) {
        let prev = self.clone();
        let cursor = self.tree.cursor();
        if cursor == NodeId::ROOT {
            return (prev, "truncate before move (no-op at game start)");
        }

        let old_prev = self.tree.store().get(cursor).and_then(|n| n.prev);
        let is_mainline_continuation = old_prev
            .and_then(|p| self.tree.store().get(p))
            .map(|p| p.next == Some(cursor))
            .unwrap_or(false);
        let transferred_vars: Vec<NodeId> = if is_mainline_continuation {
            old_prev.and_then(|p| self.tree.store().get(p)).map(|p| p.variations.clone()).unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut keep: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![cursor];
        stack.extend(transferred_vars.iter().copied());
        while let Some(id) = stack.pop() {
            if !keep.insert(id) {
                continue;
            }
            if let Some(n) = self.tree.store().get(id) {
                if let Some(next) = n.next {
                    stack.push(next);
                }
                stack.extend(n.variations.iter().copied());
            }
        }

        let all_ids: Vec<NodeId> = self.tree.store().iter_live().map(|(id, _)| id).collect();
        for id in all_ids {
            if id != NodeId::ROOT && !keep.contains(&id) {
                if let Some(n) = self.tree.store_mut().get_raw_mut(id) {
                    n.removed = true;
                }
            }
        }

        let cursor_ply = self.tree.store().get(cursor).map(|n| n.ply).unwrap_or(1);
        let offset = cursor_ply.saturating_sub(1);

        if let Some(root) = self.tree.store_mut().get_raw_mut(NodeId::ROOT) {
            root.next = Some(cursor);
            root.variations = transferred_vars.clone();
        }
        if let Some(n) = self.tree.store_mut().get_raw_mut(cursor) {
            n.prev = Some(NodeId::ROOT);
        }
        for &v in &transferred_vars {
            if let Some(n) = self.tree.store_mut().get_raw_mut(v) {
                n.prev = Some(NodeId::ROOT);
            }
        }
        self.tree.reparent(cursor, None);
        for &v in &transferred_vars {
            self.tree.reparent(v, Some(NodeId::ROOT));
        }
        for &id in &keep {
            if let Some(n) = self.tree.store_mut().get_raw_mut(id) {
                n.ply = n.ply.saturating_sub(offset);
            }
        }

        let new_start_board = self.tree.board().clone();
        let new_start_ply = self.tree.start_ply() + offset;
        self.tree.set_starting_board(new_start_board.clone(), new_start_ply);
        self.tags.set("FEN", &new_start_board.to_fen());
        self.tags.set("SetUp", "1");

        self.compact();
        (prev, "truncate before move")
    }

    fn db_truncate_after_next_illegal_from(&mut self, id: NodeId, mut board: Board) {
        let next = self.tree.store().get(id).and_then(|n| n.next);
        if let Some(next_id) = next {
            let mv = self.tree.store().get(next_id).and_then(|n| n.mv.clone());
            let ok = mv.as_ref().map(|m| board.is_legal(m)).unwrap_or(false);
            if ok {
                let mut child_board = board.clone();
                child_board.do_move(mv.as_ref().unwrap());
                self.db_truncate_after_next_illegal_from(next_id, child_board);
            } else {
                self.tree.store_mut().tombstone_subtree(next_id);
                if let Some(n) = self.tree.store_mut().get_raw_mut(id) {
                    n.next = None;
                }
            }
        }
        let vars = self.tree.store().get(id).map(|n| n.variations.clone()).unwrap_or_default();
        for v in vars {
            let mv = self.tree.store().get(v).and_then(|n| n.mv.clone());
            let ok = mv.as_ref().map(|m| board.is_legal(m)).unwrap_or(false);
            if ok {
                let mut vb = board.clone();
                vb.do_move(mv.as_ref().unwrap());
                self.db_truncate_after_next_illegal_from(v, vb);
            } else {
                self.tree.store_mut().tombstone_subtree(v);
                if let Some(n) = self.tree.store_mut().get_raw_mut(id) {
                    n.variations.retain(|&x| x != v);
                }
            }
        }
    }

    /// Depth-first re-validation of every move in the tree against a
    /// fresh replay from the starting position; tombstones the first
    /// subtree whose move is no longer legal.
    pub fn truncate_variation_after_next_illegal_position(&mut self) -> (Game, &'static str) {
        let prev = self.clone();
        let board = self.tree.starting_board().clone();
        self.db_truncate_after_next_illegal_from(NodeId::ROOT, board);
        self.compact();
        (prev, "truncate after first illegal position")
    }

    pub fn remove_comments(&mut self) -> (Game, &'static str) {
        let prev = self.clone();
        self.annotations.clear();
        (prev, "remove comments")
    }

    pub fn remove_time_comments(&mut self) -> (Game, &'static str) {
        let prev = self.clone();
        let ids: Vec<NodeId> = self.tree.store().iter_live().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(text) = self.annotations.get(id, AnnotationPos::AfterMove) {
                let stripped = annotation_codec::strip_time_tokens(text);
                self.annotations.set(id, AnnotationPos::AfterMove, &stripped);
            }
        }
        (prev, "remove time comments")
    }

    // --- merge ----------------------------------------------------------

    /// Search `other`'s mainline for a position matching `board`. Returns
    /// the matching node id, or `NodeId::ROOT` if `board` is `other`'s
    /// starting position.
    fn find_position_in_other_mainline(other: &Game, board: &Board) -> Option<NodeId> {
        let target = board.to_human_fen();
        if other.tree.starting_board().to_human_fen() == target {
            return Some(NodeId::ROOT);
        }
        let mut cur_board = other.tree.starting_board().clone();
        let mut cur = other.tree.store().get(NodeId::ROOT).and_then(|n| n.next);
        while let Some(id) = cur {
            let mv = other.tree.store().get(id)?.mv.clone()?;
            cur_board.do_move(&mv);
            if cur_board.to_human_fen() == target {
                return Some(id);
            }
            cur = other.tree.store().get(id).and_then(|n| n.next);
        }
        None
    }

    /// Walk `self` forward from the cursor, matching each position in turn
    /// against `other`'s mainline. Returns `(self_attach, other_merge)`:
    /// the node in `self` to attach the merge at, and the node in `other`
    /// one step before its unshared continuation.
    ///
    /// If `self` diverges from `other` partway, both ids back off one step
    /// to the last shared position. If `self` runs out of moves while
    /// still matching (the games are identical up to the end of `self`),
    /// the same back-off applies, landing one step short of `self`'s last
    /// move. If no shared position exists anywhere, falls back to `other`'s
    /// root (merging it in wholesale) while leaving `self`'s attach point
    /// at its original cursor.
    fn find_merge_point_in_other(&self, other: &Game) -> Option<(NodeId, NodeId)> {
        let mut board = self.tree.board().clone();
        let mut cursor = self.tree.cursor();
        let start_cursor = cursor;

        let mut prev_pair: Option<(NodeId, NodeId)> = None;
        let mut trail_pair: Option<(NodeId, NodeId)> = None;
        let mut found = false;

        loop {
            match Self::find_position_in_other_mainline(other, &board) {
                None => {
                    if trail_pair.is_some() {
                        found = true;
                        break;
                    }
                }
                Some(other_id) => {
                    prev_pair = trail_pair;
                    trail_pair = Some((cursor, other_id));
                }
            }

            let Some(next_id) = self.tree.store().get(cursor).and_then(|n| n.next) else { break };
            let Some(mv) = self.tree.store().get(next_id).and_then(|n| n.mv.clone()) else { break };
            if !board.do_move(&mv) {
                break;
            }
            cursor = next_id;
        }

        let merge_pair = if found { trail_pair } else { prev_pair };
        merge_pair.or_else(|| (other.tree.store().live_count() > 1).then_some((start_cursor, NodeId::ROOT)))
    }

    /// Copy `other_id` (and its mainline continuation and nested
    /// variations) into `self`, attached off the current cursor. Returns
    /// the id of the last node copied along the mainline continuation of
    /// this call, so the caller can stamp provenance there.
    fn merge_copy_other_node(&mut self, other: &Game, other_id: NodeId, as_mainline: bool) -> Option<NodeId> {
        let mv = other.tree.store().get(other_id)?.mv.clone()?;
        let new_id = if as_mainline { self.db_add_move(mv)? } else { self.db_add_variation(mv)? };

        if let Some(n) = other.tree.store().get(other_id) {
            let nags = n.nags.clone();
            if let Some(raw) = self.tree.store_mut().get_raw_mut(new_id) {
                raw.nags = nags;
            }
        }
        if let Some(c) = other.annotations.get(other_id, AnnotationPos::AfterMove) {
            self.annotations.set(new_id, AnnotationPos::AfterMove, c);
        }

        let mut tail = new_id;
        if let Some(next) = other.tree.store().get(other_id).and_then(|n| n.next) {
            if let Some(copied_tail) = self.merge_copy_other_node(other, next, true) {
                tail = copied_tail;
            }
        }

        let other_vars = other.tree.store().get(other_id).map(|n| n.variations.clone()).unwrap_or_default();
        for v in other_vars {
            self.tree.move_to_id(new_id);
            self.merge_copy_other_node(other, v, false);
        }

        Some(tail)
    }

    /// `mergeWithGame`: overlay `other`'s moves and variations onto this
    /// game from the earliest position they share.
    pub fn merge_with_game(&mut self, other: &Game) -> (Game, &'static str) {
        let prev = self.clone();
        let saved_cursor = self.tree.cursor();

        if let Some((self_attach, merge_node)) = self.find_merge_point_in_other(other) {
            self.tree.move_to_id(self_attach);
            let continuation = other.tree.store().get(merge_node).and_then(|n| n.next);
            let as_mainline = self.tree.at_line_end(self.tree.cursor());

            if let Some(cont) = continuation {
                if let Some(tail) = self.merge_copy_other_node(other, cont, as_mainline) {
                    let provenance = format!(
                        "{}-{} {}",
                        other.tags.get("White").unwrap_or("?"),
                        other.tags.get("Black").unwrap_or("?"),
                        other.tags.get("Event").unwrap_or("?"),
                    );
                    let existing = self.annotations.get(tail, AnnotationPos::AfterMove).unwrap_or("").to_string();
                    let merged = format!("{} {}", existing, provenance);
                    self.annotations.set(tail, AnnotationPos::AfterMove, merged.trim());
                }
            }

            let other_vars = other.tree.store().get(merge_node).map(|n| n.variations.clone()).unwrap_or_default();
            for v in other_vars {
                self.tree.move_to_id(self_attach);
                self.merge_copy_other_node(other, v, false);
            }
        }

        self.tree.move_to_id(saved_cursor);
        self.compact();
        (prev, "merge with game")
    }

    // --- annotations ------------------------------------------------

    pub fn can_have_start_annotation(&self, id: NodeId) -> bool {
        id == NodeId::ROOT || self.tree.at_line_start(id)
    }

    pub fn annotation(&self, id: NodeId, pos: AnnotationPos) -> Option<&str> {
        self.annotations.get(id, pos)
    }

    pub fn set_annotation(&mut self, text: &str, id: NodeRef, pos: AnnotationPos) -> Option<(Game, &'static str)> {
        let cursor = self.tree.cursor();
        let resolved = id.resolve(cursor)?;
        if !self.tree.store().is_live(resolved) {
            return None;
        }
        if pos == AnnotationPos::BeforeMove && !self.can_have_start_annotation(resolved) {
            return None;
        }
        let prev = self.clone();
        self.annotations.set(resolved, pos, text);
        Some((prev, "set annotation"))
    }

    /// `editAnnotation`: user prose is concatenated with whatever bracketed
    /// tokens are currently present, so editing the text never drops
    /// timing/square/arrow markers.
    pub fn edit_annotation(&mut self, new_text: &str, id: NodeRef, pos: AnnotationPos) -> Option<(Game, &'static str)> {
        let cursor = self.tree.cursor();
        let resolved = id.resolve(cursor)?;
        let previous = self.annotations.get(resolved, pos).unwrap_or("").to_string();
        let merged = annotation_codec::merge_text_with_existing_tokens(new_text, &previous);
        self.set_annotation(&merged, NodeRef::Node(resolved), pos)
    }

    pub fn square_annotation(&self) -> Vec<annotation_codec::SquareMark> {
        let comment = self.annotations.get(self.tree.cursor(), AnnotationPos::AfterMove).unwrap_or("");
        annotation_codec::parse_square_list(comment)
    }

    pub fn set_square_annotation(&mut self, marks: &[annotation_codec::SquareMark]) -> (Game, &'static str) {
        let prev = self.clone();
        let cursor = self.tree.cursor();
        let comment = self.annotations.get(cursor, AnnotationPos::AfterMove).unwrap_or("").to_string();
        let updated = annotation_codec::set_square_list(&comment, marks);
        self.annotations.set(cursor, AnnotationPos::AfterMove, &updated);
        (prev, "set square annotation")
    }

    pub fn arrow_annotation(&self) -> Vec<annotation_codec::ArrowMark> {
        let comment = self.annotations.get(self.tree.cursor(), AnnotationPos::AfterMove).unwrap_or("");
        annotation_codec::parse_arrow_list(comment)
    }

    pub fn set_arrow_annotation(&mut self, marks: &[annotation_codec::ArrowMark]) -> (Game, &'static str) {
        let prev = self.clone();
        let cursor = self.tree.cursor();
        let comment = self.annotations.get(cursor, AnnotationPos::AfterMove).unwrap_or("").to_string();
        let updated = annotation_codec::set_arrow_list(&comment, marks);
        self.annotations.set(cursor, AnnotationPos::AfterMove, &updated);
        (prev, "set arrow annotation")
    }

    pub fn append_square_annotation(&mut self, square: &str, color: char) -> (Game, &'static str) {
        let prev = self.clone();
        let cursor = self.tree.cursor();
        let comment = self.annotations.get(cursor, AnnotationPos::AfterMove).unwrap_or("").to_string();
        let updated = annotation_codec::append_square(&comment, square, color);
        self.annotations.set(cursor, AnnotationPos::AfterMove, &updated);
        (prev, "append square annotation")
    }

    pub fn append_arrow_annotation(&mut self, from: &str, to: &str, color: char) -> (Game, &'static str) {
        let prev = self.clone();
        let cursor = self.tree.cursor();
        let comment = self.annotations.get(cursor, AnnotationPos::AfterMove).unwrap_or("").to_string();
        let updated = annotation_codec::append_arrow(&comment, from, to, color);
        self.annotations.set(cursor, AnnotationPos::AfterMove, &updated);
        (prev, "append arrow annotation")
    }

    pub fn time_annotation(&self, id: NodeId, key: &str) -> Option<String> {
        let comment = self.annotations.get(id, AnnotationPos::AfterMove)?;
        annotation_codec::extract(comment, key)
    }

    pub fn text_annotation(&self, id: NodeId) -> String {
        annotation_codec::text_only(self.annotations.get(id, AnnotationPos::AfterMove).unwrap_or(""))
    }

    pub fn bracket_annotations(&self, id: NodeId) -> String {
        annotation_codec::bracket_tokens_only(self.annotations.get(id, AnnotationPos::AfterMove).unwrap_or(""))
    }

    /// Reads the cursor's `[%csl]`/`[%cal]` decorations for a rendering
    /// layer — a pure query, mutates nothing.
    pub fn indicate_annotations_on_board(
        &self,
    ) -> (Vec<annotation_codec::SquareMark>, Vec<annotation_codec::ArrowMark>) {
        (self.square_annotation(), self.arrow_annotation())
    }

    pub fn add_nag(&mut self, n: u8) -> Option<(Game, &'static str)> {
        if n == 0 {
            return None;
        }
        let prev = self.clone();
        let cursor = self.tree.cursor();
        let node = self.tree.store_mut().get_raw_mut(cursor)?;
        if !node.nags.contains(&n) {
            node.nags.push(n);
        }
        Some((prev, "add nag"))
    }

    pub fn set_nags(&mut self, nags: &[u8]) -> Option<(Game, &'static str)> {
        let prev = self.clone();
        let cursor = self.tree.cursor();
        let node = self.tree.store_mut().get_raw_mut(cursor)?;
        node.nags = nags.iter().copied().filter(|&n| n != 0).collect();
        Some((prev, "set nags"))
    }

    pub fn clear_nags(&mut self) -> Option<(Game, &'static str)> {
        let prev = self.clone();
        let cursor = self.tree.cursor();
        self.tree.store_mut().get_raw_mut(cursor)?.nags.clear();
        Some((prev, "clear nags"))
    }

    // --- SAN rendering ----------------------------------------------

    /// `moveToSan`: resolve `id` (optionally one step past it via
    /// `forward_one`), format the move as SAN from its parent position,
    /// optionally prefix the move number, optionally append NAG glyphs.
    /// Returns `None` if the node's move is neither legal nor null.
    pub fn move_to_san(&mut self, id: NodeRef, forward_one: bool, with_move_number: bool, with_nags: bool) -> Option<SanRender> {
        let cursor_backup = self.tree.cursor();
        let mut resolved = id.resolve(cursor_backup)?;
        if forward_one {
            resolved = self.tree.store().get(resolved)?.next?;
        }
        if resolved == NodeId::ROOT || !self.tree.store().is_live(resolved) {
            return None;
        }
        let parent = self.tree.store().get(resolved)?.prev?;
        self.tree.move_to_id(parent);

        let mv = self.tree.store().get(resolved)?.mv.clone()?;
        if !mv.is_null() && !self.tree.board().is_legal(&mv) {
            self.tree.move_to_id(cursor_backup);
            return None;
        }

        let white_to_move = self.tree.board().to_move() == shakmaty::Color::White;
        let mut san = self.tree.board().move_to_san(&mv);
        if with_move_number {
            let mn = self.move_number(resolved);
            let prefix = if white_to_move { format!("{}.", mn) } else { format!("{}\u{2026}", mn) };
            san = format!("{}{}", prefix, san);
        }
        let nags = self.tree.store().get(resolved).map(|n| n.nags.clone()).unwrap_or_default();
        if with_nags {
            for n in &nags {
                san.push_str(&format!(" ${}", n));
            }
        }
        let comment = self.annotations.get(resolved, AnnotationPos::AfterMove).unwrap_or("").to_string();

        self.tree.move_to_id(cursor_backup);
        Some(SanRender { san, comment, nags })
    }

    // --- derived queries ----------------------------------------------

    pub fn result(&self) -> &str {
        self.tags.get("Result").unwrap_or("*")
    }

    pub fn result_as_int(&self) -> Option<i32> {
        match self.result() {
            "1-0" => Some(1),
            "0-1" => Some(-1),
            "1/2-1/2" => Some(0),
            _ => None,
        }
    }

    pub fn ply_count(&self) -> u32 {
        let mut count = 0;
        let mut cur = self.tree.store().get(NodeId::ROOT).and_then(|n| n.next);
        while let Some(id) = cur {
            count += 1;
            cur = self.tree.store().get(id).and_then(|n| n.next);
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.tree.store().is_empty()
    }

    pub fn move_number(&self, id: NodeId) -> u32 {
        let ply = self.tree.store().get(id).map(|n| n.ply).unwrap_or(0);
        (self.tree.start_ply() + ply.saturating_sub(1)) / 2 + 1
    }

    fn mainline_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut cur = self.tree.store().get(NodeId::ROOT).and_then(|n| n.next);
        while let Some(id) = cur {
            ids.push(id);
            cur = self.tree.store().get(id).and_then(|n| n.next);
        }
        ids
    }

    /// Walk the mainline from the end backward, querying `classifier` at
    /// each position; return the first hit. Chess960 games return `None`.
    pub fn eco_classify(&self, classifier: &dyn EcoClassifier) -> Option<String> {
        if self.is_chess960() {
            return None;
        }
        let ids = self.mainline_ids();
        let mut board = self.tree.starting_board().clone();
        let mut boards = Vec::with_capacity(ids.len());
        for id in &ids {
            let mv = self.tree.store().get(*id)?.mv.clone()?;
            board.do_move(&mv);
            boards.push(board.clone());
        }
        boards.iter().rev().find_map(|b| classifier.classify(b))
    }

    fn path_from_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cur = id;
        while cur != NodeId::ROOT {
            path.push(cur);
            match self.tree.store().get(cur).and_then(|n| n.prev) {
                Some(p) => cur = p,
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Walks backward from the cursor counting occurrences of `board`'s
    /// piece placement (not exact position — castling rights and en
    /// passant target are ignored here, deliberately looser than full
    /// position equality). Fires at the third occurrence.
    pub fn position_repetition3(&self, board: &Board) -> bool {
        let mut count = if self.tree.starting_board().placement_eq(board) { 1 } else { 0 };
        let mut b = self.tree.starting_board().clone();
        for id in self.path_from_root(self.tree.cursor()) {
            if let Some(mv) = self.tree.store().get(id).and_then(|n| n.mv.clone()) {
                b.do_move(&mv);
                if b.placement_eq(board) {
                    count += 1;
                }
            }
        }
        count >= 3
    }

    pub fn insufficient_material(&self, board: &Board) -> bool {
        board.insufficient_material()
    }

    pub fn score_material(&self) -> Vec<i32> {
        let mut out = Vec::new();
        let mut board = self.tree.starting_board().clone();
        out.push(board.score_material());
        for id in self.mainline_ids() {
            if let Some(mv) = self.tree.store().get(id).and_then(|n| n.mv.clone()) {
                board.do_move(&mv);
                out.push(board.score_material());
            }
        }
        out
    }

    pub fn is_chess960(&self) -> bool {
        self.tags.get("Variant").map(|v| v.eq_ignore_ascii_case("chess960")).unwrap_or(false)
    }

    /// Turning Chess960 off clears `SetUp` but deliberately leaves `FEN`
    /// untouched — an asymmetric tag cleanup kept intentionally rather
    /// than smoothed over.
    pub fn set_chess960(&mut self, on: bool) {
        self.tree.set_chess960(on);
        if on {
            self.tags.set("Variant", "Chess960");
        } else {
            self.tags.remove("Variant");
            self.tags.remove("SetUp");
        }
    }

    // --- tags -----------------------------------------------------------

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key)
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains(key)
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter()
    }

    pub fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.set(key, value);
    }

    pub fn remove_tag(&mut self, key: &str) -> Option<String> {
        self.tags.remove(key)
    }

    pub fn clear_tags(&mut self) {
        self.tags.clear();
    }

    pub fn set_result(&mut self, result: &str) {
        self.tags.set("Result", result);
    }

    // --- whole-game ------------------------------------------------------

    pub fn clear(&mut self) {
        *self = Game::new();
    }

    /// Structural equality for R5/R6: same live node shapes (modulo ids,
    /// which are compared directly since both sides are normally compared
    /// right after a `compact()`), same annotations, same tags.
    pub fn is_equal(&self, other: &Game) -> bool {
        let mine: Vec<_> = self.tree.store().iter_live().collect();
        let theirs: Vec<_> = other.tree.store().iter_live().collect();
        if mine.len() != theirs.len() {
            return false;
        }
        for ((id_a, a), (id_b, b)) in mine.iter().zip(theirs.iter()) {
            if id_a != id_b || a.ply != b.ply || a.prev != b.prev || a.next != b.next || a.parent != b.parent {
                return false;
            }
            if a.variations != b.variations || a.nags != b.nags {
                return false;
            }
        }
        self.tree.board().to_fen() == other.tree.board().to_fen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eco::NullEcoClassifier;

    fn play(game: &mut Game, sans: &[&str]) {
        for s in sans {
            game.add_move_san(s).expect("legal move in test setup");
        }
    }

    #[test]
    fn scenario_add_then_truncate() {
        let mut game = Game::new();
        play(&mut game, &["e4", "e5", "Nf3"]);
        game.backward(1);
        game.truncate_variation_after_move();
        assert_eq!(game.ply_count(), 2);
        assert!(game.tree().store().get(game.cursor()).unwrap().variations.is_empty());
    }

    #[test]
    fn scenario_variation_add_preserves_mainline() {
        let mut game = Game::new();
        play(&mut game, &["e4", "e5"]);
        game.move_to_start();
        game.forward(1); // cursor after e4
        game.add_variation_san("c5").unwrap();
        assert_eq!(game.ply_count(), 2);
        let e4 = game.tree().store().get(NodeId::ROOT).unwrap().next.unwrap();
        assert_eq!(game.tree().store().get(e4).unwrap().variations.len(), 1);
    }

    #[test]
    fn add_san_variation_extends_multi_move_line() {
        let mut game = Game::new();
        play(&mut game, &["e4", "e5"]);
        game.move_to_start();
        game.forward(1); // cursor after e4
        game.add_san_variation(&["c5", "Nf3", "Nc6"], Some("Sicilian")).unwrap();

        assert_eq!(game.ply_count(), 2); // mainline untouched
        let e4 = game.tree().store().get(NodeId::ROOT).unwrap().next.unwrap();
        let e4_node = game.tree().store().get(e4).unwrap();
        assert_eq!(e4_node.variations.len(), 1);
        let c5 = e4_node.variations[0];
        let nf3 = game.tree().store().get(c5).unwrap().next.unwrap();
        let nc6 = game.tree().store().get(nf3).unwrap().next.unwrap();
        assert!(game.tree().store().get(nc6).unwrap().next.is_none());
        assert_eq!(game.annotation(nc6, AnnotationPos::AfterMove), Some("Sicilian"));
        assert_eq!(game.cursor(), e4); // cursor restored
    }

    #[test]
    fn scenario_promote() {
        let mut game = Game::new();
        play(&mut game, &["e4", "e5"]);
        game.move_to_start();
        game.forward(1);
        let (_, _) = game.add_variation_san("c5").unwrap();
        let e4 = game.tree().store().get(NodeId::ROOT).unwrap().next.unwrap();
        let c5 = game.tree().store().get(e4).unwrap().variations[0];
        game.enter_variation(c5);
        game.promote_variation(c5).unwrap();
        let new_e4 = game.tree().store().get(NodeId::ROOT).unwrap().next.unwrap();
        let mainline_move = game.tree().store().get(new_e4).unwrap().next.unwrap();
        assert_eq!(mainline_move, c5);
        assert_eq!(game.tree().store().get(new_e4).unwrap().variations.len(), 1);
    }

    #[test]
    fn scenario_merge() {
        let mut a = Game::new();
        play(&mut a, &["e4", "e5", "Nf3", "Nc6"]);
        let mut b = Game::new();
        b.set_tag("White", "Whiteplayer");
        b.set_tag("Black", "Blackplayer");
        b.set_tag("Event", "Casual game");
        play(&mut b, &["e4", "e5", "Nf3", "Nf6"]);

        a.move_to_start();
        a.forward(3); // cursor after Nf3
        a.merge_with_game(&b);

        let nf3 = a.cursor();
        let node = a.tree().store().get(nf3).unwrap();
        assert!(node.next.is_some());
        assert_eq!(node.variations.len(), 1);
        let variation_tail = node.variations[0];
        let comment = a.annotation(variation_tail, AnnotationPos::AfterMove).unwrap_or("");
        assert!(comment.contains("Casual game"));
    }

    #[test]
    fn scenario_merge_disjoint_game_copies_everything() {
        let mut a = Game::new();
        let mut b = Game::new();
        play(&mut b, &["e4", "e5", "Nf3", "Nc6"]);

        a.merge_with_game(&b);

        assert_eq!(a.ply_count(), 4);
    }

    #[test]
    fn scenario_merge_walks_forward_past_starting_cursor() {
        let mut a = Game::new();
        play(&mut a, &["e4", "e5", "Nf3", "Nc6"]);
        let mut b = Game::new();
        play(&mut b, &["e4", "e5", "Nf3", "Nf6"]);

        a.move_to_start(); // cursor left at the very beginning, not pre-positioned
        a.merge_with_game(&b);

        a.move_to_start();
        a.forward(3); // after e4 e5 Nf3
        let node = a.tree().store().get(a.cursor()).unwrap();
        assert_eq!(node.variations.len(), 1);
    }

    #[test]
    fn scenario_bracket_token_codec() {
        let mut game = Game::new();
        game.set_annotation("good} move [%emt 0:00:05][%csl Ga1]", NodeRef::Node(NodeId::ROOT), AnnotationPos::AfterMove);
        assert_eq!(game.time_annotation(NodeId::ROOT, "emt").as_deref(), Some("0:00:05"));
        let comment = game.annotation(NodeId::ROOT, AnnotationPos::AfterMove).unwrap();
        let marks = annotation_codec::parse_square_list(comment);
        assert_eq!(marks[0].square, "a1");
    }

    #[test]
    fn scenario_eco_chess960_always_misses() {
        let mut game = Game::new();
        play(&mut game, &["e4"]);
        game.set_chess960(true);
        assert_eq!(game.eco_classify(&NullEcoClassifier), None);
    }

    #[test]
    fn remove_variation_refuses_mainline_and_root() {
        let mut game = Game::new();
        play(&mut game, &["e4"]);
        let e4 = game.cursor();
        assert!(game.remove_variation(e4).is_none());
        assert!(game.remove_variation(NodeId::ROOT).is_none());
    }

    #[test]
    fn promote_variation_is_its_own_inverse() {
        let mut game = Game::new();
        play(&mut game, &["e4", "e5"]);
        game.move_to_start();
        game.forward(1);
        game.add_variation_san("c5").unwrap();
        let e4 = game.tree().store().get(NodeId::ROOT).unwrap().next.unwrap();
        let c5 = game.tree().store().get(e4).unwrap().variations[0];
        let prior_next = game.tree().store().get(e4).unwrap().next;

        game.promote_variation(c5).unwrap();
        let new_e4 = game.tree().store().get(NodeId::ROOT).unwrap().next.unwrap();
        let old_mainline_first = game.tree().store().get(new_e4).unwrap().variations[0];
        game.promote_variation(old_mainline_first).unwrap();

        let restored_e4 = game.tree().store().get(NodeId::ROOT).unwrap().next.unwrap();
        assert_eq!(game.tree().store().get(restored_e4).unwrap().next, prior_next);
    }
}
