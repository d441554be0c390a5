//! Japanese notation tables shared by the KIF and KI2 formatters/parsers.

use shogi_core::{Color, PieceType, Square};

pub const FILE_ZENKAKU: [&str; 9] = ["１", "２", "３", "４", "５", "６", "７", "８", "９"];
pub const RANK_KANJI: [&str; 9] = ["一", "二", "三", "四", "五", "六", "七", "八", "九"];

pub const GAME_END_TOKENS: [&str; 5] = ["投了", "中断", "持将棋", "千日手", "詰み"];

/// Japanese piece name for a piece kind, as used in both KIF and KI2 bodies.
pub fn piece_ja(piece_type: PieceType) -> &'static str {
    use PieceType::*;
    match piece_type {
        Pawn => "歩",
        Lance => "香",
        Knight => "桂",
        Silver => "銀",
        Gold => "金",
        Bishop => "角",
        Rook => "飛",
        King => "玉",
        ProPawn => "と",
        ProLance => "成香",
        ProKnight => "成桂",
        ProSilver => "成銀",
        Horse => "馬",
        Dragon => "龍",
    }
}

/// Inverse of [`piece_ja`], accepting both historical aliases (王/竜).
/// Ordered longest-name-first so `成銀` isn't shadowed by a shorter prefix.
pub fn piece_name_candidates() -> &'static [&'static str] {
    &[
        "成銀", "成桂", "成香", "龍", "竜", "馬", "と", "玉", "王", "飛", "角", "金", "銀", "桂", "香", "歩",
    ]
}

pub fn piece_type_from_ja(name: &str) -> Option<PieceType> {
    use PieceType::*;
    Some(match name {
        "歩" => Pawn,
        "香" => Lance,
        "桂" => Knight,
        "銀" => Silver,
        "金" => Gold,
        "角" => Bishop,
        "飛" => Rook,
        "玉" | "王" => King,
        "と" => ProPawn,
        "成香" => ProLance,
        "成桂" => ProKnight,
        "成銀" => ProSilver,
        "馬" => Horse,
        "龍" | "竜" => Dragon,
        _ => return None,
    })
}

pub fn side_mark(side: Color) -> &'static str {
    match side {
        Color::Black => "▲",
        Color::White => "△",
    }
}

pub fn side_from_mark(mark: char) -> Option<Color> {
    match mark {
        '▲' => Some(Color::Black),
        '△' => Some(Color::White),
        _ => None,
    }
}

pub fn format_kif_square(sq: Square) -> String {
    let (file, rank) = sq.file_rank();
    format!("{}{}", FILE_ZENKAKU[(file - 1) as usize], RANK_KANJI[(rank - 1) as usize])
}

pub fn format_from_paren(sq: Square) -> String {
    let (file, rank) = sq.file_rank();
    format!("({file}{rank})")
}

pub fn parse_kif_square(text: &str) -> Option<Square> {
    let s: String = text.trim().chars().filter(|&c| c != '　').collect();
    let mut chars = s.chars();
    let file_ch = chars.next()?;
    let rank_ch = chars.next()?;
    let file = zenkaku_or_ascii_digit(file_ch, &FILE_ZENKAKU)?;
    let rank = zenkaku_or_ascii_digit(rank_ch, &RANK_KANJI)?;
    Square::from_file_rank(file, rank).ok()
}

fn zenkaku_or_ascii_digit(ch: char, table: &[&str; 9]) -> Option<i8> {
    if let Some(d) = ch.to_digit(10) {
        if (1..=9).contains(&d) {
            return Some(d as i8);
        }
        return None;
    }
    table
        .iter()
        .position(|&s| s.chars().next() == Some(ch))
        .map(|i| (i + 1) as i8)
}
