//! Serializes every mutation of the "current game" through one lock (§4.F),
//! mirroring `RuntimeState`'s single `asyncio.Lock` around an in-memory
//! `GameTree` backed by a [`GameStore`].

use std::sync::Arc;

use shogi_core::ShogiResult;
use shogi_tree::{GameTree, GameTreeWire};
use tokio::sync::Mutex;

use crate::store::GameStore;

pub struct Runtime {
    store: Arc<dyn GameStore>,
    current: Mutex<Option<GameTree>>,
}

impl Runtime {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Runtime { store, current: Mutex::new(None) }
    }

    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    pub async fn startup(&self) {
        let mut guard = self.current.lock().await;
        *guard = Some(self.store.ensure_last_or_create());
    }

    /// Returns the current game, lazily recovering the last-saved one (or
    /// creating a fresh one) the first time it's asked for.
    pub async fn current_game(&self) -> GameTree {
        let mut guard = self.current.lock().await;
        if guard.is_none() {
            *guard = Some(self.store.ensure_last_or_create());
        }
        guard.as_ref().expect("just populated").clone()
    }

    pub async fn current_game_wire(&self) -> GameTreeWire {
        self.current_game().await.to_wire()
    }

    /// Adopts `game` as current and persists it. Used by callers (imports)
    /// that build a `GameTree` the store has never seen before.
    pub async fn set_current_game(&self, game: GameTree) -> GameTree {
        let mut guard = self.current.lock().await;
        self.store.save_game(&game);
        self.store.set_last_game_id(Some(&game.game_id));
        *guard = Some(game.clone());
        game
    }

    /// Runs `f` against the current game under the runtime lock, persists
    /// the result, and returns the updated game alongside `f`'s output.
    pub async fn mutate<F, R>(&self, f: F) -> ShogiResult<(GameTree, R)>
    where
        F: FnOnce(&mut GameTree) -> ShogiResult<R>,
    {
        let mut guard = self.current.lock().await;
        if guard.is_none() {
            *guard = Some(self.store.ensure_last_or_create());
        }
        let game = guard.as_mut().expect("just populated");
        let result = f(game)?;
        self.store.save_game(game);
        self.store.set_last_game_id(Some(&game.game_id));
        Ok((game.clone(), result))
    }

    /// Loads `game_id` and adopts it as current. `None` if the store has no
    /// such game, matching the original's "not found" short-circuit.
    pub async fn load_game(&self, game_id: &str) -> Option<GameTree> {
        let mut guard = self.current.lock().await;
        let loaded = self.store.load_game(game_id)?;
        self.store.set_last_game_id(Some(game_id));
        *guard = Some(loaded.clone());
        Some(loaded)
    }

    pub async fn create_game(&self, title: Option<&str>, initial_sfen: Option<&str>) -> ShogiResult<GameTree> {
        let mut guard = self.current.lock().await;
        let game = self.store.create_game(title, initial_sfen)?;
        *guard = Some(game.clone());
        Ok(game)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn current_game_lazily_recovers_on_first_access() {
        let runtime = Runtime::new(Arc::new(MemoryStore::new()));
        let game = runtime.current_game().await;
        assert_eq!(game.title, "Recovered game");
    }

    #[tokio::test]
    async fn mutate_persists_through_the_store() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Runtime::new(store.clone());
        let (game, _) = runtime
            .mutate(|g| {
                let root = g.root_node_id.clone();
                g.play_move(&root, "7g7f")?;
                Ok(())
            })
            .await
            .unwrap();
        let reloaded = store.load_game(&game.game_id).unwrap();
        assert_eq!(reloaded.current_path_moves(), vec!["7g7f".to_string()]);
    }

    #[tokio::test]
    async fn load_game_returns_none_for_unknown_id() {
        let runtime = Runtime::new(Arc::new(MemoryStore::new()));
        assert!(runtime.load_game("does-not-exist").await.is_none());
    }

    #[tokio::test]
    async fn create_game_becomes_the_new_current_game() {
        let runtime = Runtime::new(Arc::new(MemoryStore::new()));
        runtime.current_game().await;
        let created = runtime.create_game(Some("New Study"), None).await.unwrap();
        let current = runtime.current_game().await;
        assert_eq!(current.game_id, created.game_id);
        assert_eq!(current.title, "New Study");
    }
}
