//! Renders a [`GameTree`]'s mainline and variations back to KIF, KI2, or a
//! USI `position` command (§4.D).

use shogi_core::{parse_usi_move, position_command, Square, ShogiResult};
use shogi_notation::{usi_to_kif2_label, usi_to_kif_move_text};

use crate::tree::GameTree;

fn mainline_node_ids(game: &GameTree) -> Vec<String> {
    let mut node_ids = vec![game.root_node_id.clone()];
    let mut cur = game.root_node_id.clone();
    loop {
        let children = game.children_of(Some(&cur));
        let Some(first) = children.first() else { break };
        node_ids.push(first.node_id.clone());
        cur = first.node_id.clone();
    }
    node_ids
}

fn move_destination(move_usi: Option<&str>) -> Option<Square> {
    let mv = parse_usi_move(move_usi?).ok()?;
    Some(match mv {
        shogi_core::UsiMove::Drop { to, .. } => to,
        shogi_core::UsiMove::Board { to, .. } => to,
    })
}

pub fn export_game_to_kif(game: &GameTree) -> ShogiResult<String> {
    let mut lines = Vec::new();
    let meta = &game.meta;
    let handicap = meta.get("手合割").and_then(|v| v.as_str()).unwrap_or("平手");
    lines.push(format!("手合割：{handicap}"));
    for key in ["先手", "後手", "棋戦"] {
        if let Some(v) = meta.get(key).and_then(|v| v.as_str()) {
            lines.push(format!("{key}：{v}"));
        }
    }
    lines.push(String::new());
    lines.push("手数----指手---------".to_string());

    let main_nodes = mainline_node_ids(game);
    let mut prev_to: Option<Square> = None;
    for i in 1..main_nodes.len() {
        let parent = game.get_node(&main_nodes[i - 1])?;
        let node = game.get_node(&main_nodes[i])?;
        let body = usi_to_kif_move_text(&parent.position_sfen, node.move_usi.as_deref().unwrap_or(""), prev_to)?;
        prev_to = move_destination(node.move_usi.as_deref());
        lines.push(format!("{i:>4} {body}"));
    }

    let ply_by_node: std::collections::HashMap<&str, usize> =
        main_nodes.iter().enumerate().map(|(idx, id)| (id.as_str(), idx)).collect();
    for parent_id in &main_nodes {
        let children = game.children_of(Some(parent_id));
        if children.len() < 2 {
            continue;
        }
        for alt in &children[1..] {
            let start_ply = ply_by_node.get(parent_id.as_str()).copied().unwrap_or(0) + 1;
            lines.push(String::new());
            lines.push(format!("変化：{start_ply}手"));
            let mut cur_parent = parent_id.clone();
            let pnode = game.get_node(parent_id)?;
            let mut prev_to = move_destination(pnode.move_usi.as_deref());
            let mut move_no = start_ply;
            let mut cur = alt.node_id.clone();
            loop {
                let par = game.get_node(&cur_parent)?;
                let nd = game.get_node(&cur)?;
                let body = usi_to_kif_move_text(&par.position_sfen, nd.move_usi.as_deref().unwrap_or(""), prev_to)?;
                prev_to = move_destination(nd.move_usi.as_deref());
                lines.push(format!("{move_no:>4} {body}"));
                cur_parent = cur.clone();
                let kids = game.children_of(Some(&cur));
                let Some(first) = kids.first() else { break };
                cur = first.node_id.clone();
                move_no += 1;
            }
        }
    }

    let out = lines.join("\n");
    Ok(format!("{}\n", out.trim_end()))
}

pub fn export_game_to_kif2(game: &GameTree) -> ShogiResult<String> {
    let mut lines = Vec::new();
    let title = if game.title.trim().is_empty() { "Untitled" } else { game.title.trim() };
    lines.push(format!("▲{title}"));
    lines.push(String::new());

    let main_nodes = mainline_node_ids(game);
    let mut prev_to: Option<Square> = None;
    for i in 1..main_nodes.len() {
        let parent = game.get_node(&main_nodes[i - 1])?;
        let node = game.get_node(&main_nodes[i])?;
        let label = usi_to_kif2_label(&parent.position_sfen, node.move_usi.as_deref().unwrap_or(""), prev_to)?;
        lines.push(label);
        prev_to = move_destination(node.move_usi.as_deref());
    }

    let ply_by_node: std::collections::HashMap<&str, usize> =
        main_nodes.iter().enumerate().map(|(idx, id)| (id.as_str(), idx)).collect();
    for parent_id in &main_nodes {
        let children = game.children_of(Some(parent_id));
        if children.len() < 2 {
            continue;
        }
        for alt in &children[1..] {
            let start_ply = ply_by_node.get(parent_id.as_str()).copied().unwrap_or(0) + 1;
            lines.push(String::new());
            lines.push(format!("変化：{start_ply}手"));
            let mut cur_parent = parent_id.clone();
            let pnode = game.get_node(parent_id)?;
            let mut prev_to = move_destination(pnode.move_usi.as_deref());
            let mut cur = alt.node_id.clone();
            loop {
                let par = game.get_node(&cur_parent)?;
                let nd = game.get_node(&cur)?;
                lines.push(usi_to_kif2_label(&par.position_sfen, nd.move_usi.as_deref().unwrap_or(""), prev_to)?);
                prev_to = move_destination(nd.move_usi.as_deref());
                cur_parent = cur.clone();
                let kids = game.children_of(Some(&cur));
                let Some(first) = kids.first() else { break };
                cur = first.node_id.clone();
            }
        }
    }

    let out = lines.join("\n");
    Ok(format!("{}\n", out.trim_end()))
}

pub fn export_game_to_usi(game: &GameTree) -> ShogiResult<String> {
    position_command(Some(&game.initial_sfen), &game.current_path_moves())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_usi_position_command_for_current_path() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        game.play_move(&root, "7g7f").unwrap();
        let cmd = export_game_to_usi(&game).unwrap();
        assert_eq!(cmd, "position startpos moves 7g7f");
    }

    #[test]
    fn exports_kif_mainline_with_header() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        game.play_move(&root, "7g7f").unwrap();
        let kif = export_game_to_kif(&game).unwrap();
        assert!(kif.starts_with("手合割：平手\n"));
        assert!(kif.contains("手数----指手---------"));
        assert!(kif.contains("７六歩(77)"));
    }

    #[test]
    fn exports_kif2_with_side_marks() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        game.play_move(&root, "7g7f").unwrap();
        let kif2 = export_game_to_kif2(&game).unwrap();
        assert!(kif2.contains("▲７六歩"));
    }

    #[test]
    fn exports_kif_variation_block() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        let n1 = game.play_move(&root, "7g7f").unwrap().node_id.clone();
        game.play_move(&n1, "3c3d").unwrap();
        game.play_move(&n1, "8c8d").unwrap();
        let kif = export_game_to_kif(&game).unwrap();
        assert!(kif.contains("変化：2手"));
    }
}
