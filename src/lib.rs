pub mod annotation_codec;
pub mod annotations;
pub mod board;
pub mod eco;
pub mod game;
pub mod ids;
pub mod move_tree;
pub mod node_store;
pub mod tag_map;

pub use annotations::AnnotationPos;
pub use board::{Board, BoardMove};
pub use eco::{EcoClassifier, NullEcoClassifier};
pub use game::{Game, SanRender};
pub use ids::{NodeId, NodeRef};
pub use move_tree::MoveTree;
pub use tag_map::TagMap;
