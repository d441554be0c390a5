//! The move tree: `Node`s keyed by opaque id, with a `current_node_id`
//! cursor and first-child-wins mainline convention (§4.C).

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use shogi_core::{normalize_sfen, ShogiError, ShogiResult};
use shogi_notation::usi_to_kif2_label;

fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// A 128-bit random token rendered as lowercase hex, used for both
/// `game_id` and `node_id`. Collisions are astronomically unlikely and are
/// not otherwise guarded against, matching the original's bare `uuid4()`.
pub fn new_id() -> String {
    format!("{:032x}", rand::rng().random::<u128>())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub node_id: String,
    pub game_id: String,
    pub parent_id: Option<String>,
    pub order_index: i64,
    pub move_usi: Option<String>,
    pub move_label: String,
    pub comment: String,
    pub position_sfen: String,
    pub created_at: String,
}

/// Plain persisted fields for a game, independent of its nodes; used to
/// rehydrate a [`GameTree`] from a store without coupling this crate to any
/// particular storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameRecord {
    pub game_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub initial_sfen: String,
    pub root_node_id: String,
    pub current_node_id: String,
    pub meta: serde_json::Value,
    pub ui_state: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GameTree {
    pub game_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub initial_sfen: String,
    pub root_node_id: String,
    pub current_node_id: String,
    pub meta: serde_json::Value,
    pub ui_state: serde_json::Value,
    nodes: HashMap<String, Node>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameTreeWire {
    pub game_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub initial_sfen: String,
    pub root_node_id: String,
    pub current_node_id: String,
    pub current_position_sfen: String,
    pub meta: serde_json::Value,
    pub ui_state: serde_json::Value,
    pub nodes: Vec<Node>,
    pub children_index: HashMap<String, Vec<String>>,
    pub current_path_node_ids: Vec<String>,
    pub current_path_moves: Vec<String>,
}

impl GameTree {
    pub fn new(title: Option<&str>, initial_sfen: Option<&str>) -> ShogiResult<Self> {
        let game_id = new_id();
        let now = utc_now_iso();
        let initial = normalize_sfen(initial_sfen)?;
        let root_node_id = new_id();
        let root = Node {
            node_id: root_node_id.clone(),
            game_id: game_id.clone(),
            parent_id: None,
            order_index: 0,
            move_usi: None,
            move_label: "root".to_string(),
            comment: String::new(),
            position_sfen: initial.clone(),
            created_at: now.clone(),
        };
        let mut nodes = HashMap::new();
        nodes.insert(root_node_id.clone(), root);
        let title = title.unwrap_or("").trim();
        Ok(GameTree {
            game_id,
            title: if title.is_empty() { "Untitled game".to_string() } else { title.to_string() },
            created_at: now.clone(),
            updated_at: now,
            initial_sfen: initial,
            root_node_id: root_node_id.clone(),
            current_node_id: root_node_id,
            meta: serde_json::json!({}),
            ui_state: serde_json::json!({}),
            nodes,
        })
    }

    /// Rehydrates a tree from persisted parts. Falls back `current_node_id`
    /// to the root if the persisted cursor no longer exists.
    pub fn from_parts(record: GameRecord, node_list: Vec<Node>) -> ShogiResult<Self> {
        let mut nodes = HashMap::with_capacity(node_list.len());
        for n in node_list {
            nodes.insert(n.node_id.clone(), n);
        }
        if !nodes.contains_key(&record.root_node_id) {
            return Err(ShogiError::NotFound("root node missing".into()));
        }
        let current_node_id = if nodes.contains_key(&record.current_node_id) {
            record.current_node_id
        } else {
            record.root_node_id.clone()
        };
        Ok(GameTree {
            game_id: record.game_id,
            title: record.title,
            created_at: record.created_at,
            updated_at: record.updated_at,
            initial_sfen: record.initial_sfen,
            root_node_id: record.root_node_id,
            current_node_id,
            meta: record.meta,
            ui_state: record.ui_state,
            nodes,
        })
    }

    pub fn touch(&mut self) {
        self.updated_at = utc_now_iso();
    }

    pub fn get_node(&self, node_id: &str) -> ShogiResult<&Node> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| ShogiError::NotFound(format!("node not found: {node_id}")))
    }

    fn get_node_mut(&mut self, node_id: &str) -> ShogiResult<&mut Node> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| ShogiError::NotFound(format!("node not found: {node_id}")))
    }

    pub fn children_of(&self, parent_id: Option<&str>) -> Vec<&Node> {
        let mut out: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| n.parent_id.as_deref() == parent_id)
            .collect();
        out.sort_by(|a, b| {
            a.order_index
                .cmp(&b.order_index)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        out
    }

    fn next_order_index(&self, parent_id: &str) -> i64 {
        self.children_of(Some(parent_id))
            .iter()
            .map(|n| n.order_index)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    pub fn jump(&mut self, node_id: &str) -> ShogiResult<&Node> {
        self.get_node(node_id)?;
        self.current_node_id = node_id.to_string();
        self.touch();
        self.get_node(node_id)
    }

    /// Plays `move_usi` from `from_node_id`. If a child already recorded
    /// that exact move, the cursor jumps to it instead of creating a
    /// duplicate (matching the original's idempotent replay).
    pub fn play_move(&mut self, from_node_id: &str, move_usi: &str) -> ShogiResult<&Node> {
        let parent = self.get_node(from_node_id)?.clone();
        for child in self.children_of(Some(&parent.node_id)) {
            if child.move_usi.as_deref() == Some(move_usi) {
                let node_id = child.node_id.clone();
                self.current_node_id = node_id.clone();
                self.touch();
                return self.get_node(&node_id);
            }
        }

        let position_sfen = shogi_core::apply_usi_move(Some(&parent.position_sfen), move_usi)?;
        let label = usi_to_kif2_label(&parent.position_sfen, move_usi, None).unwrap_or_else(|_| move_usi.to_string());
        let node = Node {
            node_id: new_id(),
            game_id: self.game_id.clone(),
            parent_id: Some(parent.node_id.clone()),
            order_index: self.next_order_index(&parent.node_id),
            move_usi: Some(move_usi.to_string()),
            move_label: label,
            comment: String::new(),
            position_sfen,
            created_at: utc_now_iso(),
        };
        let node_id = node.node_id.clone();
        self.nodes.insert(node_id.clone(), node);
        self.current_node_id = node_id.clone();
        self.touch();
        self.get_node(&node_id)
    }

    pub fn set_comment(&mut self, node_id: &str, comment: &str) -> ShogiResult<()> {
        let node = self.get_node_mut(node_id)?;
        node.comment = comment.to_string();
        self.touch();
        Ok(())
    }

    pub fn reorder_children(&mut self, parent_id: &str, ordered_child_ids: &[String]) -> ShogiResult<()> {
        let existing: std::collections::HashSet<&str> =
            self.children_of(Some(parent_id)).iter().map(|n| n.node_id.as_str()).collect();
        let requested: std::collections::HashSet<&str> = ordered_child_ids.iter().map(|s| s.as_str()).collect();
        if existing != requested {
            return Err(ShogiError::SemanticError(
                "ordered_child_ids must match child set".into(),
            ));
        }
        for (idx, child_id) in ordered_child_ids.iter().enumerate() {
            self.get_node_mut(child_id)?.order_index = idx as i64;
        }
        self.touch();
        Ok(())
    }

    /// Root-to-`node_id` path (root-to-current if `None`). Errors on a
    /// cycle, matching the original's defensive `seen` set.
    pub fn path_to_node(&self, node_id: Option<&str>) -> ShogiResult<Vec<&Node>> {
        let mut cur_id = node_id.unwrap_or(&self.current_node_id).to_string();
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        loop {
            if !seen.insert(cur_id.clone()) {
                return Err(ShogiError::SemanticError("cycle detected in node tree".into()));
            }
            let node = self.get_node(&cur_id)?;
            chain.push(node);
            match &node.parent_id {
                Some(parent) => cur_id = parent.clone(),
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn current_path_moves(&self) -> Vec<String> {
        self.path_to_node(None)
            .expect("current path is always acyclic")
            .into_iter()
            .filter_map(|n| n.move_usi.clone())
            .collect()
    }

    pub fn current_position_sfen(&self) -> &str {
        self.get_node(&self.current_node_id).expect("current node always exists").position_sfen.as_str()
    }

    pub fn to_node_records(&self) -> Vec<Node> {
        let mut records: Vec<Node> = self.nodes.values().cloned().collect();
        records.sort_by(|a, b| {
            let a_key = (a.parent_id.is_some(), a.parent_id.clone().unwrap_or_default(), a.order_index, a.created_at.clone(), a.node_id.clone());
            let b_key = (b.parent_id.is_some(), b.parent_id.clone().unwrap_or_default(), b.order_index, b.created_at.clone(), b.node_id.clone());
            a_key.cmp(&b_key)
        });
        records
    }

    pub fn to_wire(&self) -> GameTreeWire {
        let current = self.get_node(&self.current_node_id).expect("current node always exists");
        let mut children_index: HashMap<String, Vec<String>> = HashMap::new();
        for node in self.nodes.values() {
            if let Some(parent_id) = &node.parent_id {
                children_index.entry(parent_id.clone()).or_default().push(node.node_id.clone());
            }
        }
        for child_ids in children_index.values_mut() {
            child_ids.sort_by(|a, b| {
                let na = &self.nodes[a];
                let nb = &self.nodes[b];
                na.order_index
                    .cmp(&nb.order_index)
                    .then_with(|| na.created_at.cmp(&nb.created_at))
                    .then_with(|| na.node_id.cmp(&nb.node_id))
            });
        }
        let path = self.path_to_node(None).expect("current path is always acyclic");
        GameTreeWire {
            game_id: self.game_id.clone(),
            title: self.title.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
            initial_sfen: self.initial_sfen.clone(),
            root_node_id: self.root_node_id.clone(),
            current_node_id: self.current_node_id.clone(),
            current_position_sfen: current.position_sfen.clone(),
            meta: self.meta.clone(),
            ui_state: self.ui_state.clone(),
            nodes: self.to_node_records(),
            children_index,
            current_path_node_ids: path.iter().map(|n| n.node_id.clone()).collect(),
            current_path_moves: path.into_iter().filter_map(|n| n.move_usi.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_game_has_single_root_node() {
        let game = GameTree::new(None, None).unwrap();
        assert_eq!(game.current_node_id, game.root_node_id);
        assert_eq!(game.title, "Untitled game");
        assert!(game.children_of(Some(&game.root_node_id)).is_empty());
    }

    #[test]
    fn play_move_appends_child_and_moves_cursor() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        let node = game.play_move(&root, "7g7f").unwrap().clone();
        assert_eq!(game.current_node_id, node.node_id);
        assert_eq!(node.parent_id.as_deref(), Some(root.as_str()));
        assert_eq!(node.move_label, "▲７六歩");
    }

    #[test]
    fn replaying_the_same_move_is_idempotent() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        let first = game.play_move(&root, "7g7f").unwrap().node_id.clone();
        let second = game.play_move(&root, "7g7f").unwrap().node_id.clone();
        assert_eq!(first, second);
        assert_eq!(game.children_of(Some(&root)).len(), 1);
    }

    #[test]
    fn reorder_children_rejects_mismatched_set() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        game.play_move(&root, "7g7f").unwrap();
        let err = game.reorder_children(&root, &["bogus".to_string()]).unwrap_err();
        assert!(matches!(err, ShogiError::SemanticError(_)));
    }

    #[test]
    fn path_to_node_walks_root_to_current() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        let n1 = game.play_move(&root, "7g7f").unwrap().node_id.clone();
        game.play_move(&n1, "3c3d").unwrap();
        let path = game.path_to_node(None).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0].node_id, root);
    }

    #[test]
    fn to_wire_reports_mainline_moves() {
        let mut game = GameTree::new(None, None).unwrap();
        let root = game.root_node_id.clone();
        game.play_move(&root, "7g7f").unwrap();
        let wire = game.to_wire();
        assert_eq!(wire.current_path_moves, vec!["7g7f".to_string()]);
        assert_eq!(wire.nodes.len(), 2);
    }
}
