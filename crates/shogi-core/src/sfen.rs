use crate::error::ShogiError;
use crate::types::{Color, Hand, PieceType, HAND_ORDER};

pub const DEFAULT_START_SFEN: &str =
    "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";

/// A piece sitting on the board: its kind and which side owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardPiece {
    pub piece_type: PieceType,
    pub color: Color,
}

impl BoardPiece {
    fn from_token(token: &str) -> Result<Self, ShogiError> {
        let (promoted, letter) = match token.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        let mut chars = letter.chars();
        let ch = chars
            .next()
            .ok_or_else(|| ShogiError::FormError("empty piece token".into()))?;
        if chars.next().is_some() {
            return Err(ShogiError::FormError(format!("invalid piece token: {token}")));
        }
        let color = if ch.is_ascii_uppercase() {
            Color::Black
        } else {
            Color::White
        };
        let base = PieceType::from_base_letter(ch.to_ascii_uppercase())
            .ok_or_else(|| ShogiError::FormError(format!("invalid piece token: {token}")))?;
        let piece_type = if promoted {
            base.promote()
                .ok_or_else(|| ShogiError::FormError(format!("piece cannot promote: {token}")))?
        } else {
            base
        };
        Ok(BoardPiece { piece_type, color })
    }

    fn to_token(self) -> String {
        let base = self.piece_type.unpromote();
        let mut letter = base.base_letter().to_string();
        if self.color == Color::White {
            letter = letter.to_ascii_lowercase();
        }
        if self.piece_type.is_promoted() {
            format!("+{letter}")
        } else {
            letter
        }
    }
}

/// A fully-resolved shogi position: board, side to move, hands, and ply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub board: [[Option<BoardPiece>; 9]; 9],
    pub side: Color,
    pub hands: [Hand; 2],
    pub ply: u32,
}

impl Position {
    fn hand(&self, color: Color) -> &Hand {
        &self.hands[color as usize]
    }

    fn hand_mut(&mut self, color: Color) -> &mut Hand {
        &mut self.hands[color as usize]
    }
}

/// `"startpos"`, a blank string, or any 4+ field SFEN collapses to the
/// canonical 4-field form (extra whitespace-separated fields are dropped).
pub fn normalize_sfen(sfen: Option<&str>) -> Result<String, ShogiError> {
    let s = sfen.unwrap_or("").trim();
    if s.is_empty() || s == "startpos" {
        return Ok(DEFAULT_START_SFEN.to_string());
    }
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(ShogiError::FormError("SFEN must have 4 fields".into()));
    }
    Ok(parts[..4].join(" "))
}

fn parse_board(board_part: &str) -> Result<[[Option<BoardPiece>; 9]; 9], ShogiError> {
    let ranks: Vec<&str> = board_part.split('/').collect();
    if ranks.len() != 9 {
        return Err(ShogiError::FormError("board ranks must be 9".into()));
    }
    let mut board: [[Option<BoardPiece>; 9]; 9] = [[None; 9]; 9];
    for (r, rank) in ranks.iter().enumerate() {
        let mut c = 0usize;
        let chars: Vec<char> = rank.chars().collect();
        let mut i = 0usize;
        while i < chars.len() {
            let ch = chars[i];
            if ch.is_ascii_digit() {
                c += ch.to_digit(10).unwrap() as usize;
                i += 1;
                continue;
            }
            let token: String = if ch == '+' {
                if i + 1 >= chars.len() {
                    return Err(ShogiError::FormError("dangling '+' in board".into()));
                }
                let t = format!("+{}", chars[i + 1]);
                i += 1;
                t
            } else {
                ch.to_string()
            };
            if c >= 9 {
                return Err(ShogiError::FormError("board rank overflow".into()));
            }
            board[r][c] = Some(BoardPiece::from_token(&token)?);
            c += 1;
            i += 1;
        }
        if c != 9 {
            return Err(ShogiError::FormError("board rank width mismatch".into()));
        }
    }
    Ok(board)
}

fn serialize_board(board: &[[Option<BoardPiece>; 9]; 9]) -> String {
    let mut ranks = Vec::with_capacity(9);
    for row in board {
        let mut out = String::new();
        let mut empties = 0u32;
        for cell in row {
            match cell {
                None => empties += 1,
                Some(p) => {
                    if empties > 0 {
                        out.push_str(&empties.to_string());
                        empties = 0;
                    }
                    out.push_str(&p.to_token());
                }
            }
        }
        if empties > 0 {
            out.push_str(&empties.to_string());
        }
        if out.is_empty() {
            out.push('9');
        }
        ranks.push(out);
    }
    ranks.join("/")
}

fn parse_hands(hands_part: &str) -> Result<[Hand; 2], ShogiError> {
    let mut hands = [Hand::empty(), Hand::empty()];
    if hands_part.is_empty() || hands_part == "-" {
        return Ok(hands);
    }
    let mut num_buf = String::new();
    for ch in hands_part.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
            continue;
        }
        let base = ch.to_ascii_uppercase();
        if !HAND_ORDER.contains(&base) {
            return Err(ShogiError::FormError(format!("invalid hand piece: {ch}")));
        }
        let count: u8 = if num_buf.is_empty() {
            1
        } else {
            num_buf
                .parse()
                .map_err(|_| ShogiError::FormError("invalid hand count".into()))?
        };
        num_buf.clear();
        let side = if ch.is_ascii_uppercase() { 0 } else { 1 };
        hands[side].add(base, count);
    }
    if !num_buf.is_empty() {
        return Err(ShogiError::FormError("dangling number in hands".into()));
    }
    Ok(hands)
}

fn serialize_hands(hands: &[Hand; 2]) -> String {
    let mut out = String::new();
    for side in 0..2 {
        for &piece in HAND_ORDER.iter() {
            let count = hands[side].get(piece);
            if count == 0 {
                continue;
            }
            let ch = if side == 0 {
                piece
            } else {
                piece.to_ascii_lowercase()
            };
            if count > 1 {
                out.push_str(&count.to_string());
            }
            out.push(ch);
        }
    }
    if out.is_empty() {
        out.push('-');
    }
    out
}

pub fn parse_sfen(sfen: Option<&str>) -> Result<Position, ShogiError> {
    let normalized = normalize_sfen(sfen)?;
    let parts: Vec<&str> = normalized.split_whitespace().collect();
    let (board_part, side_part, hands_part, ply_part) = (parts[0], parts[1], parts[2], parts[3]);
    let side = Color::from_sfen_char(
        side_part
            .chars()
            .next()
            .ok_or_else(|| ShogiError::FormError("side must be b/w".into()))?,
    )
    .ok_or_else(|| ShogiError::FormError("side must be b/w".into()))?;
    let ply: i64 = ply_part
        .parse()
        .map_err(|_| ShogiError::FormError("ply must be int".into()))?;
    Ok(Position {
        board: parse_board(board_part)?,
        side,
        hands: parse_hands(hands_part)?,
        ply: ply.max(1) as u32,
    })
}

pub fn serialize_sfen(pos: &Position) -> String {
    format!(
        "{} {} {} {}",
        serialize_board(&pos.board),
        pos.side.to_sfen_char(),
        serialize_hands(&pos.hands),
        pos.ply.max(1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startpos_round_trips() {
        let pos = parse_sfen(Some(DEFAULT_START_SFEN)).unwrap();
        assert_eq!(serialize_sfen(&pos), DEFAULT_START_SFEN);
    }

    #[test]
    fn none_and_startpos_normalize_to_default() {
        assert_eq!(normalize_sfen(None).unwrap(), DEFAULT_START_SFEN);
        assert_eq!(normalize_sfen(Some("startpos")).unwrap(), DEFAULT_START_SFEN);
    }

    #[test]
    fn hand_round_trip() {
        let sfen = "9/9/9/9/9/9/9/9/9 b 2P3pR 1";
        let pos = parse_sfen(Some(sfen)).unwrap();
        assert_eq!(pos.hand(Color::Black).get('P'), 2);
        assert_eq!(pos.hand(Color::Black).get('R'), 1);
        assert_eq!(pos.hand(Color::White).get('P'), 3);
        assert_eq!(serialize_sfen(&pos), sfen);
    }

    #[test]
    fn rejects_short_sfen() {
        assert!(normalize_sfen(Some("lnsgkgsnl/9")).is_err());
    }

    #[test]
    fn rejects_bad_rank_width() {
        assert!(parse_sfen(Some("lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKG b - 1")).is_err());
    }
}
