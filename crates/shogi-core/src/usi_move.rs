use crate::error::ShogiError;
use crate::sfen::{normalize_sfen, parse_sfen, serialize_sfen, BoardPiece, Position, DEFAULT_START_SFEN};
use crate::types::{Color, Square};

/// A syntactically valid USI move: either a drop or a board move.
///
/// Parsing accepts a king drop (`K*5e`) — spec.md's data-model section lists
/// drop piece constraints but its error-handling section (§7) and the
/// original implementation both treat a king drop as a *semantic* error,
/// raised by [`apply_usi_move`], not a form error raised here. See
/// `DESIGN.md` for this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsiMove {
    Drop {
        piece: char,
        to: Square,
    },
    Board {
        from: Square,
        to: Square,
        promote: bool,
    },
}

const DROPPABLE: [char; 8] = ['R', 'B', 'G', 'S', 'N', 'L', 'P', 'K'];

pub fn parse_usi_move(usi: &str) -> Result<UsiMove, ShogiError> {
    let s = usi.trim();
    if s.is_empty() {
        return Err(ShogiError::FormError("empty USI move".into()));
    }
    let bytes = s.as_bytes();
    if bytes.len() == 4 && bytes[1] == b'*' {
        let piece = (bytes[0] as char).to_ascii_uppercase();
        if !DROPPABLE.contains(&piece) {
            return Err(ShogiError::FormError(format!("invalid drop piece: {s}")));
        }
        let to = Square::from_usi(&s[2..4])?;
        return Ok(UsiMove::Drop { piece, to });
    }
    if s.len() != 4 && s.len() != 5 {
        return Err(ShogiError::FormError(format!("invalid USI move length: {s}")));
    }
    if s.len() == 5 && !s.ends_with('+') {
        return Err(ShogiError::FormError(format!("invalid promotion suffix: {s}")));
    }
    let from = Square::from_usi(&s[0..2])?;
    let to = Square::from_usi(&s[2..4])?;
    Ok(UsiMove::Board {
        from,
        to,
        promote: s.len() == 5,
    })
}

pub fn serialize_usi_move(mv: UsiMove) -> Result<String, ShogiError> {
    match mv {
        UsiMove::Drop { piece, to } => Ok(format!("{piece}*{}", to.to_usi()?)),
        UsiMove::Board { from, to, promote } => Ok(format!(
            "{}{}{}",
            from.to_usi()?,
            to.to_usi()?,
            if promote { "+" } else { "" }
        )),
    }
}

fn at(pos: &Position, sq: Square) -> Option<BoardPiece> {
    pos.board[sq.row as usize][sq.col as usize]
}

fn set_at(pos: &mut Position, sq: Square, piece: Option<BoardPiece>) {
    pos.board[sq.row as usize][sq.col as usize] = piece;
}

/// Applies a USI move to an SFEN, returning the resulting SFEN.
///
/// Fails with [`ShogiError::FormError`] on malformed `sfen`/`usi` text and
/// with [`ShogiError::SemanticError`] on: moving from an empty square,
/// moving the opponent's piece, a destination occupied by one's own piece,
/// a drop onto an occupied square, a drop without the piece in hand, a king
/// drop, a king capture, or promoting a non-promotable piece.
pub fn apply_usi_move(sfen: Option<&str>, usi: &str) -> Result<String, ShogiError> {
    let mut pos = parse_sfen(sfen)?;
    let mv = parse_usi_move(usi)?;
    let side = pos.side;

    match mv {
        UsiMove::Drop { piece, to } => {
            if piece == 'K' {
                return Err(ShogiError::SemanticError("king drop is invalid".into()));
            }
            if at(&pos, to).is_some() {
                return Err(ShogiError::SemanticError("drop destination occupied".into()));
            }
            if !pos.hands[side as usize].take_one(piece) {
                return Err(ShogiError::SemanticError(format!("piece not in hand: {piece}")));
            }
            let piece_type = crate::types::PieceType::from_base_letter(piece)
                .ok_or_else(|| ShogiError::FormError(format!("invalid drop piece: {piece}")))?;
            set_at(&mut pos, to, Some(BoardPiece { piece_type, color: side }));
        }
        UsiMove::Board { from, to, promote } => {
            let piece = at(&pos, from)
                .ok_or_else(|| ShogiError::SemanticError("source square empty".into()))?;
            if piece.color != side {
                return Err(ShogiError::SemanticError("moving opponent piece".into()));
            }
            if let Some(captured) = at(&pos, to) {
                if captured.color == side {
                    return Err(ShogiError::SemanticError(
                        "destination occupied by own piece".into(),
                    ));
                }
                let base = captured.piece_type.unpromote();
                if base != crate::types::PieceType::King {
                    pos.hands[side as usize].add(base.base_letter(), 1);
                }
            }
            set_at(&mut pos, from, None);
            let final_piece = if promote {
                let promoted = piece
                    .piece_type
                    .promote()
                    .ok_or_else(|| ShogiError::SemanticError("piece cannot promote".into()))?;
                BoardPiece {
                    piece_type: promoted,
                    color: side,
                }
            } else {
                piece
            };
            set_at(&mut pos, to, Some(final_piece));
        }
    }

    pos.side = !side;
    pos.ply += 1;
    Ok(serialize_sfen(&pos))
}

/// Builds `position startpos [moves ...]` or `position sfen <4 fields> [moves ...]`.
pub fn position_command(initial_sfen: Option<&str>, moves: &[String]) -> Result<String, ShogiError> {
    let normalized = normalize_sfen(initial_sfen)?;
    let base = if normalized == DEFAULT_START_SFEN {
        "position startpos".to_string()
    } else {
        format!("position sfen {normalized}")
    };
    if moves.is_empty() {
        Ok(base)
    } else {
        Ok(format!("{base} moves {}", moves.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfen::DEFAULT_START_SFEN;

    #[test]
    fn parse_drop_and_board_move() {
        assert_eq!(
            parse_usi_move("P*2c").unwrap(),
            UsiMove::Drop {
                piece: 'P',
                to: Square::from_usi("2c").unwrap()
            }
        );
        assert_eq!(
            parse_usi_move("7g7f").unwrap(),
            UsiMove::Board {
                from: Square::from_usi("7g").unwrap(),
                to: Square::from_usi("7f").unwrap(),
                promote: false
            }
        );
        assert_eq!(
            parse_usi_move("2b8h+").unwrap(),
            UsiMove::Board {
                from: Square::from_usi("2b").unwrap(),
                to: Square::from_usi("8h").unwrap(),
                promote: true
            }
        );
    }

    #[test]
    fn king_drop_parses_but_apply_rejects() {
        let mv = parse_usi_move("K*5e").unwrap();
        assert_eq!(mv, UsiMove::Drop { piece: 'K', to: Square::from_usi("5e").unwrap() });
        let err = apply_usi_move(Some(DEFAULT_START_SFEN), "K*5e").unwrap_err();
        assert!(matches!(err, ShogiError::SemanticError(_)));
    }

    #[test]
    fn apply_first_move_flips_side_and_increments_ply() {
        let next = apply_usi_move(Some(DEFAULT_START_SFEN), "7g7f").unwrap();
        let pos = parse_sfen(Some(&next)).unwrap();
        assert_eq!(pos.side, Color::White);
        assert_eq!(pos.ply, 2);
        assert!(at(&pos, Square::from_usi("7g").unwrap()).is_none());
        assert!(at(&pos, Square::from_usi("7f").unwrap()).is_some());
    }

    #[test]
    fn capture_adds_unpromoted_base_to_hand() {
        let sfen = "9/9/9/9/4p4/9/4P4/9/9 b - 1";
        let next = apply_usi_move(Some(sfen), "5f5e").unwrap();
        let pos = parse_sfen(Some(&next)).unwrap();
        assert_eq!(pos.hands[Color::Black as usize].get('P'), 1);
    }

    #[test]
    fn moving_empty_square_is_semantic_error() {
        let err = apply_usi_move(Some(DEFAULT_START_SFEN), "5e5d").unwrap_err();
        assert!(matches!(err, ShogiError::SemanticError(_)));
    }

    #[test]
    fn position_command_uses_startpos_for_default() {
        assert_eq!(
            position_command(None, &["7g7f".to_string()]).unwrap(),
            "position startpos moves 7g7f"
        );
        assert_eq!(position_command(None, &[]).unwrap(), "position startpos");
    }

    #[test]
    fn position_command_uses_sfen_for_nondefault() {
        let sfen = "9/9/9/9/9/9/9/9/9 b - 1";
        let cmd = position_command(Some(sfen), &[]).unwrap();
        assert_eq!(cmd, format!("position sfen {sfen}"));
    }
}
