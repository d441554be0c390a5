//! Format sniffing and USI text parsing (§4.D).

use shogi_core::{normalize_sfen, parse_usi_move, ShogiError, DEFAULT_START_SFEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotationFormat {
    Usi,
    Kif,
    Kif2,
    Unknown,
}

/// Sniffs which of the three importable formats `text` looks like.
/// A `position ...` prefix wins first, then KIF's header markers, then any
/// KI2 side mark; anything else is `Unknown`.
pub fn detect_format(text: &str) -> NotationFormat {
    let s = text.trim();
    let lower = s.to_lowercase();
    if lower.starts_with("position ") {
        return NotationFormat::Usi;
    }
    if s.contains("手合割") || s.contains("手数----指手") {
        return NotationFormat::Kif;
    }
    if s.contains('▲') || s.contains('△') {
        return NotationFormat::Kif2;
    }
    NotationFormat::Unknown
}

/// Parses either a bare whitespace-separated move list or a full
/// `position [startpos|sfen <4 fields>] [moves ...]` command.
pub fn parse_usi_text(text: &str) -> Result<(String, Vec<String>), ShogiError> {
    let normalized = text.replace('\r', "\n");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ShogiError::FormError("empty text".into()));
    }

    if tokens[0] != "position" {
        let mut moves = Vec::with_capacity(tokens.len());
        for t in &tokens {
            parse_usi_move(t)?;
            moves.push((*t).to_string());
        }
        return Ok((DEFAULT_START_SFEN.to_string(), moves));
    }

    if tokens.len() < 2 {
        return Err(ShogiError::FormError("invalid position command".into()));
    }

    let mut idx = 1;
    let initial_sfen = if tokens[idx] == "startpos" {
        idx += 1;
        DEFAULT_START_SFEN.to_string()
    } else if tokens[idx] == "sfen" {
        if tokens.len() < idx + 5 {
            return Err(ShogiError::FormError("position sfen requires 4 SFEN fields".into()));
        }
        let sfen = tokens[idx + 1..idx + 5].join(" ");
        idx += 5;
        normalize_sfen(Some(&sfen))?
    } else {
        return Err(ShogiError::FormError("position must use startpos or sfen".into()));
    };

    let mut moves = Vec::new();
    if idx < tokens.len() {
        if tokens[idx] != "moves" {
            return Err(ShogiError::FormError("unexpected token after position base".into()));
        }
        idx += 1;
        for t in &tokens[idx..] {
            parse_usi_move(t)?;
            moves.push((*t).to_string());
        }
    }

    Ok((initial_sfen, moves))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_usi_kif_kif2_and_unknown() {
        assert_eq!(detect_format("position startpos moves 7g7f"), NotationFormat::Usi);
        assert_eq!(detect_format("手合割：平手\n手数----指手"), NotationFormat::Kif);
        assert_eq!(detect_format("▲７六歩　△３四歩"), NotationFormat::Kif2);
        assert_eq!(detect_format("hello world"), NotationFormat::Unknown);
    }

    #[test]
    fn parses_bare_move_list_against_default_start() {
        let (sfen, moves) = parse_usi_text("7g7f 3c3d").unwrap();
        assert_eq!(sfen, DEFAULT_START_SFEN);
        assert_eq!(moves, vec!["7g7f".to_string(), "3c3d".to_string()]);
    }

    #[test]
    fn parses_position_sfen_with_moves() {
        let sfen = "9/9/9/9/9/9/9/9/9 b - 1";
        let text = format!("position sfen {sfen} moves 5e5d");
        let (parsed_sfen, moves) = parse_usi_text(&text).unwrap();
        assert_eq!(parsed_sfen, sfen);
        assert_eq!(moves, vec!["5e5d".to_string()]);
    }

    #[test]
    fn rejects_empty_text() {
        assert!(parse_usi_text("   ").is_err());
    }

    #[test]
    fn rejects_short_sfen_field_count() {
        assert!(parse_usi_text("position sfen 9/9/9/9/9/9/9/9/9 b -").is_err());
    }
}
