//! Persistence seam consumed by the runtime (§4.E). The real deployment
//! backs this with a database; the reference implementation here keeps
//! everything in memory, which is sufficient for the demo harness and for
//! tests.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use shogi_core::ShogiResult;
use shogi_engine::AnalysisLine;
use shogi_tree::{import_kif2_game, import_kif_game, import_usi_game, new_id, GameTree};
use shogi_notation::{detect_format, NotationFormat};

#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    pub game_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub initial_sfen: String,
    pub current_node_id: String,
}

impl From<&GameTree> for GameSummary {
    fn from(game: &GameTree) -> Self {
        GameSummary {
            game_id: game.game_id.clone(),
            title: game.title.clone(),
            created_at: game.created_at.clone(),
            updated_at: game.updated_at.clone(),
            initial_sfen: game.initial_sfen.clone(),
            current_node_id: game.current_node_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSnapshotRecord {
    pub snapshot_id: String,
    pub node_id: String,
    pub elapsed_ms: u64,
    pub multipv: u32,
    pub lines: Vec<AnalysisLine>,
}

/// Imports `text` by sniffing its format, mirroring `game:import_text`'s
/// dispatch in the original `ws.py` handler.
pub fn import_game_text(text: &str, title: Option<&str>) -> ShogiResult<GameTree> {
    match detect_format(text) {
        NotationFormat::Usi | NotationFormat::Unknown => import_usi_game(text, title),
        NotationFormat::Kif => import_kif_game(text, title),
        NotationFormat::Kif2 => import_kif2_game(text, title),
    }
}

/// The persistence contract the runtime (§4.F) is built against. A real
/// deployment backs this with a database; `save_game` always replaces the
/// full node set for the game, matching the delete-then-reinsert strategy
/// the original uses to avoid reconciling partial node diffs.
pub trait GameStore: Send + Sync {
    fn list_games(&self, limit: u32, offset: u32) -> Vec<GameSummary>;
    fn save_game(&self, game: &GameTree);
    fn load_game(&self, game_id: &str) -> Option<GameTree>;
    fn delete_game(&self, game_id: &str) -> bool;
    fn get_last_game_id(&self) -> Option<String>;
    fn set_last_game_id(&self, game_id: Option<&str>);
    fn create_game(&self, title: Option<&str>, initial_sfen: Option<&str>) -> ShogiResult<GameTree>;
    fn import_usi_text(&self, text: &str, title: Option<&str>) -> ShogiResult<GameTree>;
    fn save_analysis_snapshot(
        &self,
        node_id: &str,
        elapsed_ms: u64,
        multipv: u32,
        lines: &[AnalysisLine],
    ) -> String;
    fn ensure_last_or_create(&self) -> GameTree;
}

#[derive(Default)]
struct MemoryStoreInner {
    games: HashMap<String, GameTree>,
    last_game_id: Option<String>,
    snapshots: Vec<AnalysisSnapshotRecord>,
}

/// A `Mutex`-guarded in-memory reference implementation of [`GameStore`].
/// Good enough for the CLI demo harness and for exercising the runtime and
/// dispatcher in tests without a real database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots recorded so far, most recent last. Exposed for tests; the
    /// dispatcher never needs to read these back itself.
    pub fn snapshots(&self) -> Vec<AnalysisSnapshotRecord> {
        self.inner.lock().expect("memory store lock poisoned").snapshots.clone()
    }
}

impl GameStore for MemoryStore {
    fn list_games(&self, limit: u32, offset: u32) -> Vec<GameSummary> {
        let limit = limit.clamp(1, 200) as usize;
        let offset = offset as usize;
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let mut games: Vec<&GameTree> = inner.games.values().collect();
        games.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.created_at.cmp(&a.created_at)));
        games.into_iter().skip(offset).take(limit).map(GameSummary::from).collect()
    }

    fn save_game(&self, game: &GameTree) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.games.insert(game.game_id.clone(), game.clone());
    }

    fn load_game(&self, game_id: &str) -> Option<GameTree> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner.games.get(game_id).cloned()
    }

    fn delete_game(&self, game_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let removed = inner.games.remove(game_id).is_some();
        if removed && inner.last_game_id.as_deref() == Some(game_id) {
            inner.last_game_id = None;
        }
        removed
    }

    fn get_last_game_id(&self) -> Option<String> {
        self.inner.lock().expect("memory store lock poisoned").last_game_id.clone()
    }

    fn set_last_game_id(&self, game_id: Option<&str>) {
        self.inner.lock().expect("memory store lock poisoned").last_game_id = game_id.map(str::to_string);
    }

    fn create_game(&self, title: Option<&str>, initial_sfen: Option<&str>) -> ShogiResult<GameTree> {
        let game = GameTree::new(title, initial_sfen)?;
        self.save_game(&game);
        self.set_last_game_id(Some(&game.game_id));
        Ok(game)
    }

    fn import_usi_text(&self, text: &str, title: Option<&str>) -> ShogiResult<GameTree> {
        let game = import_usi_game(text, title)?;
        self.save_game(&game);
        self.set_last_game_id(Some(&game.game_id));
        Ok(game)
    }

    fn save_analysis_snapshot(
        &self,
        node_id: &str,
        elapsed_ms: u64,
        multipv: u32,
        lines: &[AnalysisLine],
    ) -> String {
        let snapshot_id = new_id();
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.snapshots.push(AnalysisSnapshotRecord {
            snapshot_id: snapshot_id.clone(),
            node_id: node_id.to_string(),
            elapsed_ms,
            multipv: multipv.max(1),
            lines: lines.to_vec(),
        });
        snapshot_id
    }

    fn ensure_last_or_create(&self) -> GameTree {
        if let Some(last_id) = self.get_last_game_id() {
            if let Some(game) = self.load_game(&last_id) {
                return game;
            }
        }
        self.create_game(Some("Recovered game"), None).expect("default sfen never fails to normalize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_game_is_retrievable_and_becomes_last_game() {
        let store = MemoryStore::new();
        let game = store.create_game(Some("Study"), None).unwrap();
        assert_eq!(store.get_last_game_id().as_deref(), Some(game.game_id.as_str()));
        let loaded = store.load_game(&game.game_id).unwrap();
        assert_eq!(loaded.title, "Study");
    }

    #[test]
    fn list_games_orders_by_updated_at_descending() {
        let store = MemoryStore::new();
        let a = store.create_game(Some("A"), None).unwrap();
        let mut b = store.create_game(Some("B"), None).unwrap();
        b.updated_at = format!("{}9", a.updated_at);
        store.save_game(&b);
        let listed = store.list_games(50, 0);
        assert_eq!(listed[0].game_id, b.game_id);
    }

    #[test]
    fn delete_game_clears_last_game_id_when_it_matched() {
        let store = MemoryStore::new();
        let game = store.create_game(None, None).unwrap();
        assert!(store.delete_game(&game.game_id));
        assert_eq!(store.get_last_game_id(), None);
    }

    #[test]
    fn ensure_last_or_create_recovers_when_last_game_was_deleted() {
        let store = MemoryStore::new();
        let game = store.create_game(None, None).unwrap();
        store.delete_game(&game.game_id);
        let recovered = store.ensure_last_or_create();
        assert_eq!(recovered.title, "Recovered game");
    }

    #[test]
    fn import_usi_text_accepts_a_bare_move_list() {
        let store = MemoryStore::new();
        let game = store.import_usi_text("7g7f 3c3d", None).unwrap();
        assert_eq!(game.current_path_moves(), vec!["7g7f".to_string(), "3c3d".to_string()]);
    }

    #[test]
    fn save_analysis_snapshot_records_are_retained_in_order() {
        let store = MemoryStore::new();
        let line = AnalysisLine {
            pv_index: 1,
            score_type: shogi_engine::ScoreType::Cp,
            score_value: 64,
            depth: 3,
            seldepth: 5,
            nodes: 500,
            nps: 20000,
            hashfull: 1,
            pv_usi: vec!["7g7f".to_string()],
        };
        let id1 = store.save_analysis_snapshot("n1", 100, 1, &[line.clone()]);
        let id2 = store.save_analysis_snapshot("n2", 200, 1, &[line]);
        let snaps = store.snapshots();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].snapshot_id, id1);
        assert_eq!(snaps[1].snapshot_id, id2);
    }
}
