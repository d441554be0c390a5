//! KIF move-body formatting and parsing (one ply, no move number).
//!
//! Example bodies: `７六歩(77)`, `同　歩(77)`, `７六歩打`.

use shogi_core::{parse_sfen, parse_usi_move, PieceType, ShogiError, Square, UsiMove};

use crate::labels::{format_from_paren, format_kif_square, parse_kif_square, piece_name_candidates, piece_ja, piece_type_from_ja, GAME_END_TOKENS};

pub fn usi_to_kif_move_text(
    parent_sfen: &str,
    move_usi: &str,
    prev_to: Option<Square>,
) -> Result<String, ShogiError> {
    let pos = parse_sfen(Some(parent_sfen))?;
    let mv = parse_usi_move(move_usi)?;

    match mv {
        UsiMove::Drop { piece, to } => {
            let to_sq = render_to_square(to, prev_to);
            let piece_type = PieceType::from_base_letter(piece)
                .ok_or_else(|| ShogiError::FormError(format!("invalid drop piece: {piece}")))?;
            Ok(format!("{to_sq}{}打", piece_ja(piece_type)))
        }
        UsiMove::Board { from, to, promote } => {
            let to_sq = render_to_square(to, prev_to);
            let piece = pos.board[from.row as usize][from.col as usize]
                .ok_or_else(|| ShogiError::SemanticError("source square empty".into()))?;
            let suffix = if promote { "成" } else { "" };
            Ok(format!(
                "{to_sq}{}{suffix}{}",
                piece_ja(piece.piece_type),
                format_from_paren(from)
            ))
        }
    }
}

fn render_to_square(to: Square, prev_to: Option<Square>) -> String {
    if prev_to == Some(to) {
        "同　".to_string()
    } else {
        format_kif_square(to)
    }
}

/// A single parsed KIF move body, prior to USI conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKifLikeMove {
    pub to: Square,
    pub is_drop: bool,
    pub drop_piece: Option<char>,
    pub from: Option<Square>,
    pub promote: bool,
}

impl ParsedKifLikeMove {
    pub fn to_usi(&self) -> Result<String, ShogiError> {
        if self.is_drop {
            let piece = self
                .drop_piece
                .ok_or_else(|| ShogiError::FormError("drop piece missing".into()))?;
            return Ok(format!("{piece}*{}", self.to.to_usi()?));
        }
        let from = self
            .from
            .ok_or_else(|| ShogiError::FormError("from square missing".into()))?;
        Ok(format!(
            "{}{}{}",
            from.to_usi()?,
            self.to.to_usi()?,
            if self.promote { "+" } else { "" }
        ))
    }
}

fn strip_clock_suffix(s: &str) -> &str {
    let trimmed = s.trim_end();
    if !trimmed.ends_with(')') {
        return trimmed;
    }
    match trimmed.rfind('(') {
        Some(idx) => {
            let inner = &trimmed[idx + 1..trimmed.len() - 1];
            let looks_like_clock = inner.contains(':')
                && inner.contains('/')
                && inner.chars().all(|c| c.is_ascii_digit() || c == ':' || c == '/' || c.is_whitespace());
            if looks_like_clock {
                trimmed[..idx].trim_end()
            } else {
                trimmed
            }
        }
        None => trimmed,
    }
}

fn reject_game_end(s: &str) -> Result<(), ShogiError> {
    if GAME_END_TOKENS.iter().any(|&t| s.contains(t)) {
        return Err(ShogiError::FormError("game end token, not a move".into()));
    }
    Ok(())
}

/// Parses a KIF move body. Returns the parsed move and the destination
/// square to thread into the next call's `prev_to`.
pub fn parse_kif_move_text(
    move_text: &str,
    prev_to: Option<Square>,
) -> Result<(ParsedKifLikeMove, Square), ShogiError> {
    let trimmed = strip_clock_suffix(move_text.trim());
    let s = trimmed.replace('\u{3000}', " ");
    if s.is_empty() {
        return Err(ShogiError::FormError("empty move".into()));
    }
    reject_game_end(&s)?;

    let (to, mut rest) = if let Some(stripped) = s.strip_prefix('同') {
        let to = prev_to.ok_or_else(|| ShogiError::FormError("'同' used but no previous destination".into()))?;
        (to, stripped.trim_start().to_string())
    } else {
        let head: String = s.chars().take(2).collect();
        let to = parse_kif_square(&head).ok_or_else(|| ShogiError::FormError(format!("invalid square: {s}")))?;
        (to, s.chars().skip(2).collect::<String>())
    };
    rest = rest.trim().to_string();

    let (from, rest_wo_paren) = extract_paren_from(&rest)?;

    let is_drop = rest_wo_paren.contains('打');
    let promote = rest_wo_paren.contains('成') && !rest_wo_paren.contains("不成");

    if is_drop {
        let name = piece_name_candidates()
            .iter()
            .find(|&&name| rest_wo_paren.starts_with(name))
            .ok_or_else(|| ShogiError::FormError(format!("cannot detect drop piece: {move_text}")))?;
        let piece_type = piece_type_from_ja(name).expect("candidate table is exhaustive");
        let base = piece_type.unpromote().base_letter();
        if base == 'K' {
            return Err(ShogiError::SemanticError("king drop is invalid".into()));
        }
        return Ok((
            ParsedKifLikeMove {
                to,
                is_drop: true,
                drop_piece: Some(base),
                from: None,
                promote: false,
            },
            to,
        ));
    }

    Ok((
        ParsedKifLikeMove {
            to,
            is_drop: false,
            drop_piece: None,
            from,
            promote,
        },
        to,
    ))
}

fn extract_paren_from(rest: &str) -> Result<(Option<Square>, String), ShogiError> {
    let Some(open) = rest.find('(') else {
        return Ok((None, rest.to_string()));
    };
    let Some(close) = rest[open..].find(')') else {
        return Ok((None, rest.to_string()));
    };
    let close = open + close;
    let inner = &rest[open + 1..close];
    let mut digits = inner.chars().filter(|c| c.is_ascii_digit());
    let (Some(file_ch), Some(rank_ch)) = (digits.next(), digits.next()) else {
        return Ok((None, rest.to_string()));
    };
    if digits.next().is_some() {
        return Ok((None, rest.to_string()));
    }
    let file = file_ch.to_digit(10).unwrap() as i8;
    let rank = rank_ch.to_digit(10).unwrap() as i8;
    let from = Square::from_file_rank(file, rank)?;
    let remainder = format!("{}{}", &rest[..open], &rest[close + 1..]);
    Ok((Some(from), remainder.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_board_move_with_origin() {
        let sfen = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";
        let text = usi_to_kif_move_text(sfen, "7g7f", None).unwrap();
        assert_eq!(text, "７六歩(77)");
    }

    #[test]
    fn formats_drop() {
        let sfen = "9/9/9/9/9/9/9/9/9 b P 1";
        let text = usi_to_kif_move_text(sfen, "P*5e", None).unwrap();
        assert_eq!(text, "５五歩打");
    }

    #[test]
    fn same_square_renders_as_dou() {
        let sfen = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";
        let prev = Square::from_usi("7f").unwrap();
        let text = usi_to_kif_move_text(sfen, "8h7g+", Some(prev)).unwrap();
        assert!(text.starts_with("同　"));
    }

    #[test]
    fn round_trips_board_move_through_parse() {
        let (parsed, to) = parse_kif_move_text("７六歩(77)", None).unwrap();
        assert_eq!(parsed.to_usi().unwrap(), "7g7f");
        assert_eq!(to, Square::from_usi("7f").unwrap());
    }

    #[test]
    fn round_trips_drop_through_parse() {
        let (parsed, _) = parse_kif_move_text("５五歩打", None).unwrap();
        assert_eq!(parsed.to_usi().unwrap(), "P*5e");
    }

    #[test]
    fn rejects_king_drop_piece_name() {
        let err = parse_kif_move_text("５五玉打", None).unwrap_err();
        assert!(matches!(err, ShogiError::SemanticError(_)));
    }

    #[test]
    fn game_end_token_is_rejected() {
        assert!(parse_kif_move_text("投了", None).is_err());
    }

    #[test]
    fn strips_trailing_clock_annotation() {
        let (parsed, _) = parse_kif_move_text("７六歩(77) ( 0:05/00:00:10)", None).unwrap();
        assert_eq!(parsed.to_usi().unwrap(), "7g7f");
    }
}
