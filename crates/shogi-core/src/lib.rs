//! SFEN/USI move codec and the shared vocabulary types (`Color`, `PieceType`,
//! `Square`, `Hand`) used across the analyzer workspace.

pub mod error;
pub mod sfen;
pub mod types;
pub mod usi_move;

pub use error::{ShogiError, ShogiResult};
pub use sfen::{normalize_sfen, parse_sfen, serialize_sfen, BoardPiece, Position, DEFAULT_START_SFEN};
pub use types::{hand_index, Color, Hand, PieceType, Square, HAND_ORDER};
pub use usi_move::{apply_usi_move, parse_usi_move, position_command, serialize_usi_move, UsiMove};
