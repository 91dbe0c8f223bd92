//! The board collaborator: legal move generation, SAN/FEN, and material
//! scoring, backed by `shakmaty`.
//!
//! `shakmaty::Position` is a functional API — every move produces a new
//! position rather than mutating one in place. `Board` adapts that onto the
//! incremental `do_move`/`undo_move` contract the move tree expects by
//! keeping a history stack: `do_move` pushes the pre-move position before
//! replacing it, `undo_move` pops the stack back. Null moves are not native
//! to `shakmaty`; they are synthesized by flipping the side to move and
//! clearing the en passant square through `Setup`.

use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position, Setup};

/// A single ply, legal or not. Illegal/null moves still need to round-trip
/// through the tree, so this wraps `shakmaty::Move` with an explicit null
/// flag rather than requiring every move to be legal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardMove {
    Normal(Move),
    Null,
}

impl BoardMove {
    pub fn is_null(&self) -> bool {
        matches!(self, BoardMove::Null)
    }
}

/// A chess position plus the history needed to undo moves played on top of
/// it. Owned exclusively by `MoveTree` — never exposed as a shared
/// resource.
#[derive(Debug, Clone)]
pub struct Board {
    current: Chess,
    history: Vec<Chess>,
    chess960: bool,
}

impl Board {
    pub fn standard_start() -> Self {
        Board { current: Chess::default(), history: Vec::new(), chess960: false }
    }

    pub fn set_standard_position(&mut self) {
        self.current = Chess::default();
        self.history.clear();
    }

    pub fn set_chess960(&mut self, on: bool) {
        self.chess960 = on;
    }

    pub fn is_chess960(&self) -> bool {
        self.chess960
    }

    pub fn from_fen(fen: &str) -> anyhow::Result<Self> {
        let setup: Fen = fen.parse()?;
        let mode = if setup.castling_rights().any() { CastlingMode::Chess960 } else { CastlingMode::Standard };
        let current: Chess = setup.into_position(mode)?;
        Ok(Board { current, history: Vec::new(), chess960: mode == CastlingMode::Chess960 })
    }

    pub fn to_fen(&self) -> String {
        Fen::from_position(self.current.clone(), EnPassantMode::Legal).to_string()
    }

    /// Piece placement and active color only, no move counters — used by
    /// the threefold-repetition check's intentionally loose equality.
    pub fn to_human_fen(&self) -> String {
        let board_fen = Fen::from_position(self.current.clone(), EnPassantMode::Legal).to_string();
        board_fen.split(' ').take(2).collect::<Vec<_>>().join(" ")
    }

    /// Parse SAN text against the live position. Returns `None` on a parse
    /// or legality failure — callers surface this as "no move".
    pub fn parse_move(&self, san: &str) -> Option<BoardMove> {
        let parsed: San = san.parse().ok()?;
        let mv = parsed.to_move(&self.current).ok()?;
        Some(BoardMove::Normal(mv))
    }

    /// Format a move as SAN relative to the live position.
    pub fn move_to_san(&self, m: &BoardMove) -> String {
        match m {
            BoardMove::Normal(mv) => San::from_move(&self.current, mv).to_string(),
            BoardMove::Null => "--".to_string(),
        }
    }

    pub fn is_legal(&self, m: &BoardMove) -> bool {
        match m {
            BoardMove::Normal(mv) => self.current.is_legal(mv),
            BoardMove::Null => true,
        }
    }

    /// Apply `m`, pushing the pre-move position onto the undo history.
    /// Returns `false` (no mutation) if `m` is illegal.
    pub fn do_move(&mut self, m: &BoardMove) -> bool {
        match m {
            BoardMove::Normal(mv) => {
                if !self.current.is_legal(mv) {
                    return false;
                }
                let prev = self.current.clone();
                let mut next = self.current.clone();
                next.play_unchecked(mv);
                self.history.push(prev);
                self.current = next;
                true
            }
            BoardMove::Null => {
                let prev = self.current.clone();
                match null_move(&prev) {
                    Some(next) => {
                        self.history.push(prev);
                        self.current = next;
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Pop the history stack, restoring the position before the last
    /// `do_move`. No-op at the start of history.
    pub fn undo_move(&mut self) -> bool {
        match self.history.pop() {
            Some(prev) => {
                self.current = prev;
                true
            }
            None => false,
        }
    }

    pub fn to_move(&self) -> Color {
        self.current.turn()
    }

    pub fn move_number(&self) -> u32 {
        self.current.fullmoves().get()
    }

    /// Exact position equality: piece placement, side to move, castling
    /// rights, and en passant target all must match.
    pub fn position_is_same(&self, other: &Board) -> bool {
        self.to_fen() == other.to_fen()
    }

    /// Cheaper equality: piece placement only, reused by the
    /// threefold-repetition check per its documented loose-equality quirk.
    pub fn placement_eq(&self, other: &Board) -> bool {
        self.to_human_fen() == other.to_human_fen()
    }

    /// Monotone pruning predicate for `findPosition`: `other` can still be
    /// reached from `self` by forward play only if `self`'s material is a
    /// superset of (or equal to) `other`'s — material can only be lost
    /// going forward, never gained, so once `self` has strictly fewer
    /// pieces than `other` no sequence of legal moves can reach it.
    pub fn can_be_reached_from(&self, other: &Board) -> bool {
        self.piece_count() >= other.piece_count()
    }

    fn piece_count(&self) -> u32 {
        self.current.board().occupied().count() as u32
    }

    pub fn score_material(&self) -> i32 {
        use shakmaty::Role::*;
        let board = self.current.board();
        let mut score = 0i32;
        for (role, value) in [(Pawn, 1), (Knight, 3), (Bishop, 3), (Rook, 5), (Queen, 9)] {
            let white = (board.by_color(Color::White) & board.by_role(role)).count() as i32;
            let black = (board.by_color(Color::Black) & board.by_role(role)).count() as i32;
            score += (white - black) * value;
        }
        score
    }

    pub fn insufficient_material(&self) -> bool {
        self.current.is_insufficient_material()
    }
}

/// Build a null-move position: flip the side to move and drop any en
/// passant target, then re-validate through `Setup`. Shakmaty has no
/// native null-move concept since a null move is not a legal chess move.
fn null_move(pos: &Chess) -> Option<Chess> {
    let mut setup: Setup = pos.clone().into_setup(EnPassantMode::Legal);
    setup.turn = setup.turn.other();
    setup.ep_square = None;
    let mode = if setup.castling_rights.any() { CastlingMode::Chess960 } else { CastlingMode::Standard };
    Chess::from_setup(setup, mode).ok().map(|p| p.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_start_has_no_history() {
        let board = Board::standard_start();
        assert_eq!(board.to_move(), Color::White);
        assert_eq!(board.move_number(), 1);
    }

    #[test]
    fn do_move_then_undo_restores_position() {
        let mut board = Board::standard_start();
        let before = board.to_fen();
        let mv = board.parse_move("e4").unwrap();
        assert!(board.do_move(&mv));
        assert_ne!(board.to_fen(), before);
        assert!(board.undo_move());
        assert_eq!(board.to_fen(), before);
    }

    #[test]
    fn illegal_san_does_not_parse() {
        let board = Board::standard_start();
        assert!(board.parse_move("e5").is_none());
    }

    #[test]
    fn move_to_san_round_trips() {
        let mut board = Board::standard_start();
        let mv = board.parse_move("Nf3").unwrap();
        assert_eq!(board.move_to_san(&mv), "Nf3");
        board.do_move(&mv);
    }

    #[test]
    fn null_move_flips_turn_without_moving_pieces() {
        let mut board = Board::standard_start();
        let before = board.to_human_fen();
        assert!(board.do_move(&BoardMove::Null));
        assert_eq!(board.to_move(), Color::Black);
        assert_eq!(board.to_human_fen().split(' ').next(), before.split(' ').next());
        assert!(board.undo_move());
        assert_eq!(board.to_move(), Color::White);
    }

    #[test]
    fn position_is_same_distinguishes_castling_rights() {
        let a = Board::standard_start();
        let b = Board::standard_start();
        assert!(a.position_is_same(&b));
    }
}
