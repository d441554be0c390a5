//! Builds a [`GameTree`] from USI, KIF, or KI2 text (§4.D).

use shogi_core::{parse_sfen, parse_usi_move, Square, ShogiError, ShogiResult, DEFAULT_START_SFEN};
use shogi_notation::{
    candidates_for_piece, filter_candidates_by_disambig, parse_ki2_move_token, parse_kif_move_text,
    parse_usi_text,
};

use crate::tree::GameTree;

pub fn import_usi_game(text: &str, title: Option<&str>) -> ShogiResult<GameTree> {
    let (initial_sfen, moves) = parse_usi_text(text)?;
    let mut game = GameTree::new(Some(title.unwrap_or("Imported USI")), Some(&initial_sfen))?;
    let mut cur = game.root_node_id.clone();
    for mv in moves {
        cur = game.play_move(&cur, &mv)?.node_id.clone();
    }
    Ok(game)
}

fn parse_header_meta(lines: &[&str]) -> serde_json::Value {
    let mut meta = serde_json::Map::new();
    for line in lines {
        if line.contains("手数----指手") {
            break;
        }
        if let Some((k, v)) = line.split_once('：') {
            let (k, v) = (k.trim(), v.trim());
            if !k.is_empty() && !v.is_empty() {
                meta.insert(k.to_string(), serde_json::Value::String(v.to_string()));
            }
        }
    }
    serde_json::Value::Object(meta)
}

fn initial_sfen_from_meta(meta: &serde_json::Value) -> ShogiResult<String> {
    let handicap = meta.get("手合割").and_then(|v| v.as_str()).unwrap_or("").trim().to_string();
    if handicap.is_empty() || handicap == "平手" {
        return Ok(DEFAULT_START_SFEN.to_string());
    }
    Err(ShogiError::FormError(format!("unsupported handicap: {handicap}")))
}

const GAME_END_TOKENS: [&str; 5] = ["投了", "中断", "持将棋", "千日手", "詰み"];

pub fn import_kif_game(text: &str, title: Option<&str>) -> ShogiResult<GameTree> {
    let normalized = text.replace('\r', "\n");
    let lines: Vec<&str> = normalized.lines().collect();
    let meta = parse_header_meta(&lines);
    let initial_sfen = initial_sfen_from_meta(&meta)?;

    let game_title = title
        .map(str::to_string)
        .or_else(|| meta.get("棋戦").and_then(|v| v.as_str()).map(str::to_string))
        .or_else(|| meta.get("表題").and_then(|v| v.as_str()).map(str::to_string))
        .or_else(|| meta.get("タイトル").and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| "Imported KIF".to_string());
    let game_title = game_title.trim().to_string();

    let mut game = GameTree::new(Some(&game_title), Some(&initial_sfen))?;
    game.meta = meta;

    let mut in_moves = false;
    let mut main_moves: Vec<String> = Vec::new();
    let mut variations: Vec<(i64, Vec<String>)> = Vec::new();
    let mut current_var: Option<usize> = None;

    for line in &lines {
        if !in_moves {
            if line.contains("手数----指手") {
                in_moves = true;
            }
            continue;
        }
        if line.trim_start().starts_with('*') {
            continue;
        }
        if let Some(rest) = line.trim_start().strip_prefix("変化") {
            if let Some(n) = parse_henka_marker(rest) {
                variations.push((n, Vec::new()));
                current_var = Some(variations.len() - 1);
                continue;
            }
        }
        let Some(body) = parse_move_line_body(line) else { continue };
        if body.is_empty() {
            continue;
        }
        if GAME_END_TOKENS.iter().any(|&t| body.contains(t)) {
            break;
        }
        match current_var {
            Some(idx) => variations[idx].1.push(body),
            None => main_moves.push(body),
        }
    }

    let mut cur = game.root_node_id.clone();
    let mut node_ids = vec![cur.clone()];
    let mut prev_to: Option<Square> = None;
    for mv_text in &main_moves {
        let (parsed, to) = parse_kif_move_text(mv_text, prev_to)?;
        prev_to = Some(to);
        let mv_usi = parsed.to_usi()?;
        parse_usi_move(&mv_usi)?;
        cur = game.play_move(&cur, &mv_usi)?.node_id.clone();
        node_ids.push(cur.clone());
    }

    for (start_n, moves) in variations {
        if start_n < 1 {
            continue;
        }
        let base_index = ((start_n - 1) as usize).min(node_ids.len() - 1);
        let base_node_id = node_ids[base_index].clone();
        let base_node = game.get_node(&base_node_id)?.clone();
        let mut prev_to = base_node
            .move_usi
            .as_deref()
            .and_then(|mv| parse_usi_move(mv).ok())
            .and_then(|mv| match mv {
                shogi_core::UsiMove::Drop { to, .. } => Some(to),
                shogi_core::UsiMove::Board { to, .. } => Some(to),
            });
        let mut cur = base_node_id;
        for mv_text in &moves {
            let parsed_result = parse_kif_move_text(mv_text, prev_to);
            let (parsed, to) = match parsed_result {
                Ok(v) => v,
                Err(ShogiError::FormError(msg)) if msg.contains("game end") => break,
                Err(e) => return Err(e),
            };
            prev_to = Some(to);
            let mv_usi = parsed.to_usi()?;
            parse_usi_move(&mv_usi)?;
            cur = game.play_move(&cur, &mv_usi)?.node_id.clone();
        }
    }

    Ok(game)
}

fn parse_henka_marker(rest: &str) -> Option<i64> {
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('：').or_else(|| rest.strip_prefix(':'))?;
    let rest = rest.trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !rest[digits.len()..].starts_with('手') {
        return None;
    }
    digits.parse().ok()
}

fn parse_move_line_body(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(trimmed[digits.len()..].trim().to_string())
}

fn tokenize_ki2(text: &str) -> Vec<String> {
    let normalized = text.replace('\r', "\n");
    let mut tokens = Vec::new();
    for line in normalized.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('*') {
            continue;
        }
        let mut current = String::new();
        let mut in_token = false;
        for ch in line.chars() {
            if ch == '▲' || ch == '△' {
                if in_token && !current.is_empty() {
                    tokens.push(current.trim().to_string());
                }
                current = String::new();
                in_token = true;
            }
            if in_token {
                current.push(ch);
            }
        }
        if in_token && !current.is_empty() {
            tokens.push(current.trim().to_string());
        }
    }
    tokens
}

pub fn import_kif2_game(text: &str, title: Option<&str>) -> ShogiResult<GameTree> {
    let normalized = text.replace('\r', "\n");
    let mut in_var = false;
    let mut main_tokens: Vec<String> = Vec::new();
    let mut variations: Vec<(i64, Vec<String>)> = Vec::new();
    let mut cur_var_idx: Option<usize> = None;

    for line in normalized.lines() {
        if let Some(rest) = line.trim_start().strip_prefix("変化") {
            if let Some(n) = parse_henka_marker(rest) {
                variations.push((n, Vec::new()));
                cur_var_idx = Some(variations.len() - 1);
                in_var = true;
                continue;
            }
        }
        let toks = tokenize_ki2(line);
        if toks.is_empty() {
            continue;
        }
        if in_var {
            if let Some(idx) = cur_var_idx {
                variations[idx].1.extend(toks);
                continue;
            }
        }
        main_tokens.extend(toks);
    }

    let title = title.unwrap_or("Imported KI2").trim().to_string();
    let mut game = GameTree::new(Some(&title), Some(DEFAULT_START_SFEN))?;

    let root_node_id = game.root_node_id.clone();
    let main_path_nodes = apply_ki2_tokens(&mut game, &root_node_id, &main_tokens, None)?;

    for (start_n, toks) in variations {
        if start_n < 1 {
            continue;
        }
        let base_idx = ((start_n - 1) as usize).min(main_path_nodes.len() - 1);
        let base_node_id = main_path_nodes[base_idx].clone();
        let base_node = game.get_node(&base_node_id)?.clone();
        let prev_to = base_node
            .move_usi
            .as_deref()
            .and_then(|mv| parse_usi_move(mv).ok())
            .and_then(|mv| match mv {
                shogi_core::UsiMove::Drop { to, .. } => Some(to),
                shogi_core::UsiMove::Board { to, .. } => Some(to),
            });
        apply_ki2_tokens(&mut game, &base_node_id, &toks, prev_to)?;
    }

    Ok(game)
}

fn apply_ki2_tokens(
    game: &mut GameTree,
    base_node_id: &str,
    tokens: &[String],
    prev_to_rc: Option<Square>,
) -> ShogiResult<Vec<String>> {
    let mut cur = base_node_id.to_string();
    let mut path = vec![cur.clone()];
    let mut prev_to = prev_to_rc;
    for tok in tokens {
        let (parsed, to) = parse_ki2_move_token(tok, prev_to)?;
        prev_to = Some(to);
        let cur_sfen = game.get_node(&cur)?.position_sfen.clone();
        let position = parse_sfen(Some(&cur_sfen))?;
        if parsed.side != position.side {
            return Err(ShogiError::FormError(format!(
                "token '{tok}' marks {:?} to move but it is {:?}'s turn",
                parsed.side, position.side
            )));
        }

        let mv_usi = if parsed.is_drop {
            let base = parsed.piece_type.unpromote().base_letter();
            if base == 'K' {
                return Err(ShogiError::SemanticError("king drop is invalid".into()));
            }
            format!("{base}*{}", parsed.to.to_usi()?)
        } else {
            let candidates = candidates_for_piece(&position, position.side, parsed.piece_type, parsed.to);
            let candidates = filter_candidates_by_disambig(position.side, parsed.to, candidates, &parsed.disambig);
            if candidates.len() != 1 {
                return Err(ShogiError::AmbiguousNotation {
                    token: tok.clone(),
                    candidates: candidates.len(),
                });
            }
            format!(
                "{}{}{}",
                candidates[0].to_usi()?,
                parsed.to.to_usi()?,
                if parsed.promote { "+" } else { "" }
            )
        };

        parse_usi_move(&mv_usi)?;
        cur = game.play_move(&cur, &mv_usi)?.node_id.clone();
        path.push(cur.clone());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_bare_usi_move_list() {
        let game = import_usi_game("7g7f 3c3d", None).unwrap();
        assert_eq!(game.current_path_moves(), vec!["7g7f".to_string(), "3c3d".to_string()]);
        assert_eq!(game.title, "Imported USI");
    }

    #[test]
    fn imports_kif_mainline_and_stops_at_resignation() {
        let text = "手合割：平手\n手数----指手---------\n   1 ７六歩(77)\n   2 ３四歩(33)\n   3 投了\n";
        let game = import_kif_game(text, None).unwrap();
        assert_eq!(game.current_path_moves(), vec!["7g7f".to_string(), "3c3d".to_string()]);
    }

    #[test]
    fn imports_kif_variation_branching_from_mainline() {
        let text = "手合割：平手\n手数----指手---------\n   1 ７六歩(77)\n   2 ３四歩(33)\n\n変化：2手\n   2 ８四歩(83)\n";
        let game = import_kif_game(text, None).unwrap();
        let root = game.root_node_id.clone();
        let n1 = game.children_of(Some(&root))[0].node_id.clone();
        let siblings = game.children_of(Some(&n1));
        assert_eq!(siblings.len(), 2);
    }

    #[test]
    fn imports_ki2_mainline() {
        let text = "▲７六歩　△３四歩";
        let game = import_kif2_game(text, None).unwrap();
        assert_eq!(game.current_path_moves(), vec!["7g7f".to_string(), "3c3d".to_string()]);
    }

    #[test]
    fn ki2_multi_move_sequence_resolves_each_piece_uniquely() {
        let text = "▲７六歩　△３四歩　▲６八銀";
        let game = import_kif2_game(text, None).unwrap();
        assert_eq!(
            game.current_path_moves(),
            vec!["7g7f".to_string(), "3c3d".to_string(), "7i6h".to_string()]
        );
    }

    #[test]
    fn ki2_rejects_a_side_marker_that_disagrees_with_the_position_to_move() {
        let text = "▲７六歩　▲３四歩";
        let err = import_kif2_game(text, None).unwrap_err();
        assert!(matches!(err, ShogiError::FormError(_)));
    }
}
