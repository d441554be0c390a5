//! Pure notation conversion and pseudo-legal move generation: KIF/KI2
//! formatting and parsing, USI text parsing, and format sniffing. None of
//! this module owns a game tree — see `shogi-tree` for that.

pub mod format;
pub mod ki2;
pub mod kif;
pub mod labels;
pub mod movegen;

pub use format::{detect_format, parse_usi_text, NotationFormat};
pub use ki2::{parse_ki2_move_token, usi_to_kif2_label, ParsedKi2Token};
pub use kif::{parse_kif_move_text, usi_to_kif_move_text, ParsedKifLikeMove};
pub use movegen::{candidates_for_piece, filter_candidates_by_disambig};
