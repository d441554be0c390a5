//! KI2 move-token formatting and parsing. Unlike KIF, each token carries its
//! own side mark and disambiguates by direction kanji instead of an origin
//! square in parentheses.

use shogi_core::{parse_sfen, parse_usi_move, Color, PieceType, ShogiError, Square, UsiMove};

use crate::labels::{
    format_kif_square, parse_kif_square, piece_ja, piece_name_candidates, piece_type_from_ja,
    side_from_mark, side_mark, GAME_END_TOKENS,
};

pub fn usi_to_kif2_label(
    parent_sfen: &str,
    move_usi: &str,
    prev_to: Option<Square>,
) -> Result<String, ShogiError> {
    let pos = parse_sfen(Some(parent_sfen))?;
    let side = pos.side;
    let mv = parse_usi_move(move_usi)?;

    match mv {
        UsiMove::Drop { piece, to } => {
            let to_sq = render_to_square(to, prev_to);
            let piece_type = PieceType::from_base_letter(piece)
                .ok_or_else(|| ShogiError::FormError(format!("invalid drop piece: {piece}")))?;
            Ok(format!("{}{to_sq}{}打", side_mark(side), piece_ja(piece_type)))
        }
        UsiMove::Board { from, to, promote } => {
            let to_sq = render_to_square(to, prev_to);
            let piece = pos.board[from.row as usize][from.col as usize]
                .ok_or_else(|| ShogiError::SemanticError("source square empty".into()))?;
            let suffix = if promote { "成" } else { "" };
            Ok(format!("{}{to_sq}{}{suffix}", side_mark(side), piece_ja(piece.piece_type)))
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

/// A single parsed KI2 token, before candidate resolution. `disambig` is
/// the subset of 直/寄/上/引/右/左 present in the token, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKi2Token {
    pub side: Color,
    pub to: Square,
    pub piece_type: PieceType,
    pub is_drop: bool,
    pub promote: bool,
    pub disambig: Vec<char>,
}

pub fn parse_ki2_move_token(
    token: &str,
    prev_to: Option<Square>,
) -> Result<(ParsedKi2Token, Square), ShogiError> {
    let t = token.trim();
    let mut chars = t.chars();
    let mark = chars
        .next()
        .ok_or_else(|| ShogiError::FormError("empty token".into()))?;
    let side = side_from_mark(mark).ok_or_else(|| ShogiError::FormError(format!("missing side mark: {token}")))?;
    let rest: String = chars.collect::<String>().replace('\u{3000}', " ").trim().to_string();

    if GAME_END_TOKENS.iter().any(|&term| rest.contains(term)) {
        return Err(ShogiError::FormError("game end token, not a move".into()));
    }

    let (to, mut rest) = if let Some(stripped) = rest.strip_prefix('同') {
        let to = prev_to.ok_or_else(|| ShogiError::FormError("'同' used but no previous destination".into()))?;
        (to, stripped.trim_start().to_string())
    } else {
        let head: String = rest.chars().take(2).collect();
        let to = parse_kif_square(&head).ok_or_else(|| ShogiError::FormError(format!("invalid square: {token}")))?;
        (to, rest.chars().skip(2).collect::<String>().trim_start().to_string())
    };

    let name = piece_name_candidates()
        .iter()
        .find(|&&name| rest.starts_with(name))
        .ok_or_else(|| ShogiError::FormError(format!("cannot detect piece name: {token}")))?;
    rest = rest[name.len()..].to_string();
    let piece_type = piece_type_from_ja(name).expect("candidate table is exhaustive");

    let is_drop = rest.contains('打');
    let promote = rest.contains('成') && !rest.contains("不成");

    let mut disambig = Vec::new();
    for ch in ['右', '左', '直', '上', '引', '寄'] {
        if rest.contains(ch) {
            disambig.push(ch);
        }
    }

    Ok((
        ParsedKi2Token {
            side,
            to,
            piece_type,
            is_drop,
            promote,
            disambig,
        },
        to,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_board_move_with_side_mark() {
        let sfen = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";
        let label = usi_to_kif2_label(sfen, "7g7f", None).unwrap();
        assert_eq!(label, "▲７六歩");
    }

    #[test]
    fn formats_drop_with_side_mark() {
        let sfen = "9/9/9/9/9/9/9/9/9 w P 1";
        let label = usi_to_kif2_label(sfen, "P*5e", None).unwrap();
        assert_eq!(label, "△５五歩打");
    }

    #[test]
    fn parses_disambiguator_suffix() {
        let (parsed, _) = parse_ki2_move_token("▲５四金右", None).unwrap();
        assert_eq!(parsed.side, Color::Black);
        assert_eq!(parsed.piece_type, PieceType::Gold);
        assert_eq!(parsed.disambig, vec!['右']);
        assert!(!parsed.is_drop);
    }

    #[test]
    fn parses_promoted_piece_name_to_pro_pawn() {
        let (parsed, _) = parse_ki2_move_token("△５三と", None).unwrap();
        assert_eq!(parsed.piece_type, PieceType::ProPawn);
    }

    #[test]
    fn missing_side_mark_is_form_error() {
        assert!(parse_ki2_move_token("５四金右", None).is_err());
    }

    #[test]
    fn dou_requires_previous_destination() {
        assert!(parse_ki2_move_token("▲同　歩", None).is_err());
        let prev = Square::from_usi("5e").unwrap();
        let (parsed, to) = parse_ki2_move_token("▲同　歩", Some(prev)).unwrap();
        assert_eq!(to, prev);
        assert_eq!(parsed.piece_type, PieceType::Pawn);
    }
}
