//! Owns the move tree (`GameTree`/`Node`) and the import/export orchestration
//! that threads `shogi-notation`'s pure conversions through it (§4.C, §4.D).

pub mod export;
pub mod import;
pub mod tree;

pub use export::{export_game_to_kif, export_game_to_kif2, export_game_to_usi};
pub use import::{import_kif2_game, import_kif_game, import_usi_game};
pub use tree::{new_id, GameRecord, GameTree, GameTreeWire, Node};
