//! Pseudo-legal move generation used only for KI2 disambiguation (§4.B).
//! This is deliberately not a legality checker: it ignores check and mate,
//! matching the core's Non-goal of gameplay legal-move enforcement.

use shogi_core::{BoardPiece, Color, PieceType, Position, Square};

fn in_bounds(row: i8, col: i8) -> bool {
    (0..=8).contains(&row) && (0..=8).contains(&col)
}

fn at(pos: &Position, row: i8, col: i8) -> Option<BoardPiece> {
    if !in_bounds(row, col) {
        return None;
    }
    pos.board[row as usize][col as usize]
}

fn slide_ok(pos: &Position, from: Square, to: Square, dr: i8, dc: i8) -> bool {
    let (mut r, mut c) = (from.row + dr, from.col + dc);
    while (r, c) != (to.row, to.col) {
        if !in_bounds(r, c) {
            return false;
        }
        if at(pos, r, c).is_some() {
            return false;
        }
        r += dr;
        c += dc;
    }
    true
}

fn step_ok(from: Square, to: Square, dr: i8, dc: i8) -> bool {
    (from.row + dr, from.col + dc) == (to.row, to.col)
}

fn knight_ok(from: Square, to: Square, forward: i8) -> bool {
    (from.row + 2 * forward, from.col - 1) == (to.row, to.col)
        || (from.row + 2 * forward, from.col + 1) == (to.row, to.col)
}

/// Piece kind normalized the way the disambiguation algorithm cares about:
/// gold and all four promoted minors share one pattern.
fn matches_pattern(pos: &Position, from: Square, to: Square, piece_type: PieceType, forward: i8) -> bool {
    use PieceType::*;
    match piece_type {
        Pawn => step_ok(from, to, forward, 0),
        Lance => {
            from.col == to.col
                && (to.row - from.row) * forward > 0
                && slide_ok(pos, from, to, forward, 0)
        }
        Knight => knight_ok(from, to, forward),
        Silver => {
            let deltas = [(forward, 0), (forward, -1), (forward, 1), (-forward, -1), (-forward, 1)];
            deltas.iter().any(|&(dr, dc)| step_ok(from, to, dr, dc))
        }
        Gold | ProPawn | ProLance | ProKnight | ProSilver => {
            let deltas = [
                (forward, 0),
                (forward, -1),
                (forward, 1),
                (0, -1),
                (0, 1),
                (-forward, 0),
            ];
            deltas.iter().any(|&(dr, dc)| step_ok(from, to, dr, dc))
        }
        King => {
            let deltas = [(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, -1), (1, 0), (1, 1)];
            deltas.iter().any(|&(dr, dc)| step_ok(from, to, dr, dc))
        }
        Bishop | Horse => {
            let dr = to.row - from.row;
            let dc = to.col - from.col;
            let diagonal_hit = dr.abs() == dc.abs()
                && dr != 0
                && slide_ok(pos, from, to, if dr > 0 { 1 } else { -1 }, if dc > 0 { 1 } else { -1 });
            let horse_step = piece_type == Horse
                && [(-1, 0), (1, 0), (0, -1), (0, 1)]
                    .iter()
                    .any(|&(sdr, sdc)| step_ok(from, to, sdr, sdc));
            diagonal_hit || horse_step
        }
        Rook | Dragon => {
            let rank_hit = from.row == to.row
                && from.col != to.col
                && slide_ok(pos, from, to, 0, if to.col > from.col { 1 } else { -1 });
            let file_hit = from.col == to.col
                && from.row != to.row
                && slide_ok(pos, from, to, if to.row > from.row { 1 } else { -1 }, 0);
            let dragon_step = piece_type == Dragon
                && [(-1, -1), (-1, 1), (1, -1), (1, 1)]
                    .iter()
                    .any(|&(sdr, sdc)| step_ok(from, to, sdr, sdc));
            rank_hit || file_hit || dragon_step
        }
    }
}

/// Candidate origin squares for a piece of `piece_type` owned by `side` that
/// could reach `to`. Ignores check; same-side occupation of `to` excludes
/// all candidates.
pub fn candidates_for_piece(pos: &Position, side: Color, piece_type: PieceType, to: Square) -> Vec<Square> {
    let forward: i8 = if side == Color::Black { -1 } else { 1 };
    if let Some(occupant) = at(pos, to.row, to.col) {
        if occupant.color == side {
            return Vec::new();
        }
    }
    let mut out = Vec::new();
    for row in 0..9i8 {
        for col in 0..9i8 {
            let from = Square::new(row, col);
            let Some(piece) = at(pos, row, col) else { continue };
            if piece.color != side || piece.piece_type != piece_type {
                continue;
            }
            if matches_pattern(pos, from, to, piece_type, forward) {
                out.push(from);
            }
        }
    }
    out
}

/// Applies the KI2 disambiguator cascade in the fixed order
/// 直, 寄, 上, 引, 右, 左 (matching the original parser's filter order).
pub fn filter_candidates_by_disambig(
    side: Color,
    to: Square,
    candidates: Vec<Square>,
    disambig: &[char],
) -> Vec<Square> {
    if disambig.is_empty() || candidates.is_empty() {
        return candidates;
    }

    let file_of = |sq: Square| 9 - sq.col;
    let rank_of = |sq: Square| sq.row + 1;
    let to_file = file_of(to);
    let to_rank = rank_of(to);
    let forward_is_up = side == Color::Black;

    let mut filtered = candidates;

    if disambig.contains(&'直') {
        filtered.retain(|&c| file_of(c) == to_file);
    }
    if disambig.contains(&'寄') {
        filtered.retain(|&c| rank_of(c) == to_rank);
    }
    if disambig.contains(&'上') {
        if forward_is_up {
            filtered.retain(|&c| rank_of(c) > to_rank);
        } else {
            filtered.retain(|&c| rank_of(c) < to_rank);
        }
    }
    if disambig.contains(&'引') {
        if forward_is_up {
            filtered.retain(|&c| rank_of(c) < to_rank);
        } else {
            filtered.retain(|&c| rank_of(c) > to_rank);
        }
    }
    if disambig.contains(&'右') {
        let best = if side == Color::Black {
            filtered.iter().map(|&c| file_of(c)).min()
        } else {
            filtered.iter().map(|&c| file_of(c)).max()
        };
        if let Some(best) = best {
            filtered.retain(|&c| file_of(c) == best);
        }
    }
    if disambig.contains(&'左') {
        let best = if side == Color::Black {
            filtered.iter().map(|&c| file_of(c)).max()
        } else {
            filtered.iter().map(|&c| file_of(c)).min()
        };
        if let Some(best) = best {
            filtered.retain(|&c| file_of(c) == best);
        }
    }

    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use shogi_core::parse_sfen;

    #[test]
    fn pawn_candidate_is_one_square_ahead() {
        let pos = parse_sfen(Some(shogi_core::DEFAULT_START_SFEN)).unwrap();
        let to = Square::from_usi("7f").unwrap();
        let cands = candidates_for_piece(&pos, Color::Black, PieceType::Pawn, to);
        assert_eq!(cands, vec![Square::from_usi("7g").unwrap()]);
    }

    #[test]
    fn two_gold_generals_need_disambiguation() {
        let sfen = "9/9/9/9/9/9/3G1G3/9/9 b - 1";
        let pos = parse_sfen(Some(sfen)).unwrap();
        let to = Square::new(7, 4);
        let cands = candidates_for_piece(&pos, Color::Black, PieceType::Gold, to);
        assert_eq!(cands.len(), 2);
        let right = filter_candidates_by_disambig(Color::Black, to, cands.clone(), &['右']);
        assert_eq!(right.len(), 1);
        assert_eq!(9 - right[0].col, 4);
        let left = filter_candidates_by_disambig(Color::Black, to, cands, &['左']);
        assert_eq!(9 - left[0].col, 6);
    }

    #[test]
    fn horse_adds_orthogonal_step_to_bishop_diagonal() {
        let sfen = "9/9/9/9/4+B4/9/9/9/9 b - 1";
        let pos = parse_sfen(Some(sfen)).unwrap();
        let orth_to = Square::new(4, 3);
        let cands = candidates_for_piece(&pos, Color::Black, PieceType::Horse, orth_to);
        assert_eq!(cands, vec![Square::new(4, 4)]);
    }
}
