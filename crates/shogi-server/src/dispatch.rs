//! Wires the runtime, engine driver, and session arbiter together and
//! interprets every message type in §6.2 (Component I). One connection owns
//! the session at a time; everyone else gets `session:busy` until they send
//! `session:takeover`.

use std::sync::Arc;

use shogi_engine::{EngineDriver, EngineEvent};
use shogi_tree::GameTree;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::message::{capabilities_for, AnalysisStateWire, InboundEnvelope, InboundMessage, OutboundMessage};
use crate::runtime::Runtime;
use crate::session::{SessionArbiter, TakeoverOutcome, TryGrantOutcome};
use crate::store::import_game_text;

/// What a connection is given to receive pushed messages on. Concrete
/// rather than a trait object or a transport-specific type because the
/// dispatcher doesn't care what's downstream of it — only the demo harness
/// (`shogi-cli`) and a real transport adapter would drain the receiving
/// half.
pub type Channel = mpsc::UnboundedSender<OutboundMessage>;

fn analysis_multipv_from_game(game: &GameTree) -> u32 {
    game.ui_state
        .get("analysis_multipv")
        .and_then(|v| v.as_i64())
        .map(|v| v.clamp(1, 20) as u32)
        .unwrap_or(1)
}

fn analysis_enabled_from_game(game: &GameTree) -> bool {
    game.ui_state.get("analysis_enabled").and_then(|v| v.as_bool()).unwrap_or(false)
}

pub struct Dispatcher {
    runtime: Arc<Runtime>,
    analysis: Arc<EngineDriver>,
    sessions: Arc<SessionArbiter<Channel>>,
}

impl Dispatcher {
    pub fn new(runtime: Arc<Runtime>, analysis: Arc<EngineDriver>, sessions: Arc<SessionArbiter<Channel>>) -> Self {
        Dispatcher { runtime, analysis, sessions }
    }

    /// Starts (or restarts) analysis for `target_node_id` on `game`,
    /// returning `Err(reason)` the caller should surface as a `toast`.
    async fn start_analysis_for_node(&self, game: &GameTree, target_node_id: Option<&str>) -> Result<(), String> {
        let target_node_id = target_node_id.unwrap_or(&game.current_node_id);
        let path = game.path_to_node(Some(target_node_id)).map_err(|e| format!("invalid node for analysis: {e}"))?;
        let moves: Vec<String> = path.into_iter().filter_map(|n| n.move_usi.clone()).collect();
        let multipv = analysis_multipv_from_game(game);
        self.analysis
            .start_for_game(&game.initial_sfen, &moves, target_node_id, multipv)
            .await
            .map_err(|e| e.to_string())
    }

    /// After most mutations: start analysis if the current game wants it
    /// enabled, else stop it if it's running. Returns a `toast` only when a
    /// start attempt failed.
    async fn sync_analysis_to_current_game(&self) -> Option<OutboundMessage> {
        let game = self.runtime.current_game().await;
        if analysis_enabled_from_game(&game) {
            if let Err(reason) = self.start_analysis_for_node(&game, None).await {
                return Some(OutboundMessage::toast("warning", reason));
            }
            None
        } else {
            if self.analysis.status_wire().await.analysis_running {
                self.analysis.stop("analysis disabled").await;
            }
            None
        }
    }

    async fn granted_message_for(&self, conn_id: &str) -> OutboundMessage {
        let game = self.runtime.current_game().await;
        let status = self.analysis.status_wire().await;
        let capabilities = capabilities_for(self.analysis.is_available());
        OutboundMessage::SessionGranted {
            game: game.to_wire(),
            server_capabilities: capabilities,
            engine_status: status,
            analysis_state: AnalysisStateWire { enabled: analysis_enabled_from_game(&game), multipv: analysis_multipv_from_game(&game) },
            session_id: self.sessions.session_id(conn_id).unwrap_or_default(),
            owner_token: self.sessions.owner_token(conn_id).unwrap_or_default(),
        }
    }

    async fn attach_owner_channel(&self, channel: Channel) {
        let (tx, mut rx) = mpsc::unbounded_channel::<EngineEvent>();
        self.analysis.attach_owner_sender(tx).await;
        let store = self.runtime.store().clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let EngineEvent::AnalysisSnapshot { node_id, elapsed_ms, multipv, lines } = &event {
                    store.save_analysis_snapshot(node_id, *elapsed_ms, *multipv, lines);
                }
                if let Some(out) = OutboundMessage::from_engine_event(event) {
                    if channel.send(out).is_err() {
                        break;
                    }
                }
            }
        });
    }

    /// A new connection joining. Sends `session:granted` if no one else
    /// holds the session, else `session:busy`.
    pub async fn connect(&self, conn_id: &str, channel: Channel) {
        match self.sessions.try_grant(conn_id, channel.clone()) {
            TryGrantOutcome::Granted { .. } => {
                self.attach_owner_channel(channel.clone()).await;
                let granted = self.granted_message_for(conn_id).await;
                let _ = channel.send(granted);
            }
            TryGrantOutcome::Busy { owner_since } => {
                let _ = channel.send(OutboundMessage::SessionBusy { owner_since, owner_hint: Some("another session is active".to_string()) });
            }
        }
    }

    /// A connection explicitly reclaiming the session. Returns the
    /// displaced owner's channel, if any, so the caller can notify and
    /// close it (`session:kicked`) — the dispatcher itself never closes a
    /// transport connection.
    pub async fn takeover(&self, conn_id: &str, channel: Channel) -> Option<Channel> {
        match self.sessions.takeover(conn_id, channel.clone()) {
            TakeoverOutcome::AlreadyOwner { .. } => None,
            TakeoverOutcome::Takeover { displaced, .. } => {
                if let Some(old) = &displaced {
                    let _ = old.send(OutboundMessage::SessionKicked { reason: "session takeover".to_string() });
                }
                self.attach_owner_channel(channel.clone()).await;
                let granted = self.granted_message_for(conn_id).await;
                let _ = channel.send(granted);
                let _ = channel.send(OutboundMessage::toast("info", "session takeover complete"));
                displaced
            }
        }
    }

    /// Validates freshness tokens and dispatches an owner message. Caller
    /// must already have confirmed `conn_id` is the current owner.
    pub async fn handle_envelope(&self, conn_id: &str, channel: &Channel, envelope: InboundEnvelope) {
        let span = tracing::info_span!("inbound_message", "msg.type" = %envelope.msg_type, conn_id);
        self.handle_envelope_inner(conn_id, channel, envelope).instrument(span).await
    }

    async fn handle_envelope_inner(&self, conn_id: &str, channel: &Channel, envelope: InboundEnvelope) {
        let expected_session_id = self.sessions.session_id(conn_id);
        let expected_owner_token = self.sessions.owner_token(conn_id);
        if envelope.session_id != expected_session_id || envelope.owner_token != expected_owner_token {
            tracing::warn!("stale owner token/session");
            let _ = channel.send(OutboundMessage::SessionStale {
                reason: "stale owner token/session".to_string(),
                expected_session_id,
            });
            return;
        }

        let Some(message) = InboundMessage::parse(&envelope.msg_type, &envelope.payload) else {
            tracing::warn!("unknown message type");
            let _ = channel.send(OutboundMessage::toast("warning", format!("unknown message type: {}", envelope.msg_type)));
            return;
        };

        for out in self.handle_message(message).await {
            let _ = channel.send(out);
        }
    }

    async fn send_state(&self) -> OutboundMessage {
        OutboundMessage::GameState { game: self.runtime.current_game_wire().await }
    }

    /// The typed core of `_handle_owner_message`: every recognized message
    /// type, returning the outbound messages the caller should forward.
    pub async fn handle_message(&self, message: InboundMessage) -> Vec<OutboundMessage> {
        match message {
            InboundMessage::GameNew { title, initial_sfen } => {
                match self.runtime.create_game(title.as_deref(), initial_sfen.as_deref()).await {
                    Ok(_) => {
                        let mut out = vec![self.send_state().await];
                        out.extend(self.sync_analysis_to_current_game().await);
                        out
                    }
                    Err(e) => vec![OutboundMessage::toast("error", format!("game:new failed: {e}"))],
                }
            }

            InboundMessage::GameLoad { game_id } => {
                if game_id.is_empty() {
                    return vec![OutboundMessage::toast("error", "game_id is required")];
                }
                match self.runtime.load_game(&game_id).await {
                    Some(_) => {
                        let mut out = vec![self.send_state().await];
                        out.extend(self.sync_analysis_to_current_game().await);
                        out
                    }
                    None => vec![OutboundMessage::toast("error", "game not found")],
                }
            }

            InboundMessage::GameSave { title, meta, ui_state, current_node_id } => {
                let result = self
                    .runtime
                    .mutate(|g| {
                        if let Some(title) = &title {
                            let trimmed = title.trim();
                            if !trimmed.is_empty() {
                                g.title = trimmed.to_string();
                            }
                        }
                        if let Some(meta) = meta {
                            g.meta = meta;
                        }
                        if let Some(ui_state) = ui_state {
                            g.ui_state = ui_state;
                        }
                        if let Some(node_id) = &current_node_id {
                            if !node_id.is_empty() {
                                g.jump(node_id)?;
                            }
                        }
                        g.touch();
                        Ok(())
                    })
                    .await;
                match result {
                    Ok(_) => {
                        let mut out = vec![self.send_state().await];
                        out.extend(self.sync_analysis_to_current_game().await);
                        out
                    }
                    Err(e) => vec![OutboundMessage::toast("error", format!("save failed: {e}"))],
                }
            }

            InboundMessage::NodeJump { node_id } => {
                if node_id.is_empty() {
                    return vec![OutboundMessage::toast("error", "node_id is required")];
                }
                match self.runtime.mutate(|g| g.jump(&node_id).map(|_| ())).await {
                    Ok(_) => {
                        let mut out = vec![self.send_state().await];
                        out.extend(self.sync_analysis_to_current_game().await);
                        out
                    }
                    Err(e) => vec![OutboundMessage::toast("error", format!("jump failed: {e}"))],
                }
            }

            InboundMessage::NodePlayMove { from_node_id, move_usi } => {
                if from_node_id.is_empty() || move_usi.is_empty() {
                    return vec![OutboundMessage::toast("error", "from_node_id and move_usi are required")];
                }
                match self.runtime.mutate(|g| g.play_move(&from_node_id, &move_usi).map(|_| ())).await {
                    Ok(_) => {
                        let mut out = vec![self.send_state().await];
                        out.extend(self.sync_analysis_to_current_game().await);
                        out
                    }
                    Err(e) => vec![OutboundMessage::toast("error", format!("play_move failed: {e}"))],
                }
            }

            InboundMessage::NodeSetComment { node_id, comment } => {
                if node_id.is_empty() {
                    return vec![OutboundMessage::toast("error", "node_id is required")];
                }
                match self.runtime.mutate(|g| g.set_comment(&node_id, &comment)).await {
                    Ok(_) => vec![self.send_state().await],
                    Err(e) => vec![OutboundMessage::toast("error", format!("set_comment failed: {e}"))],
                }
            }

            InboundMessage::NodeReorderChildren { parent_id, ordered_child_ids } => {
                if parent_id.is_empty() {
                    return vec![OutboundMessage::toast("error", "invalid reorder payload")];
                }
                match self.runtime.mutate(|g| g.reorder_children(&parent_id, &ordered_child_ids)).await {
                    Ok(_) => vec![self.send_state().await],
                    Err(e) => vec![OutboundMessage::toast("error", format!("reorder failed: {e}"))],
                }
            }

            InboundMessage::AnalysisSetEnabled { enabled } => {
                if enabled && !self.analysis.is_available() {
                    return vec![
                        OutboundMessage::toast("warning", "analysis engine is not configured on the server"),
                        OutboundMessage::AnalysisStopped { reason: "USI engine is not configured".to_string() },
                    ];
                }
                let result = self
                    .runtime
                    .mutate(|g| {
                        let mut ui = g.ui_state.as_object().cloned().unwrap_or_default();
                        ui.insert("analysis_enabled".to_string(), serde_json::Value::Bool(enabled));
                        ui.insert("analysis_multipv".to_string(), serde_json::json!(analysis_multipv_from_game(g)));
                        g.ui_state = serde_json::Value::Object(ui);
                        g.touch();
                        Ok(())
                    })
                    .await;
                let Ok(_) = result else {
                    return vec![OutboundMessage::toast("error", "failed to update analysis state")];
                };
                let mut out = vec![self.send_state().await];
                if enabled {
                    let game = self.runtime.current_game().await;
                    if let Err(reason) = self.start_analysis_for_node(&game, None).await {
                        out.push(OutboundMessage::toast("warning", reason));
                    }
                } else {
                    self.analysis.stop("disabled by user").await;
                }
                out
            }

            InboundMessage::AnalysisSetMultipv { multipv } => {
                let multipv = multipv.clamp(1, 20);
                let result = self
                    .runtime
                    .mutate(|g| {
                        let mut ui = g.ui_state.as_object().cloned().unwrap_or_default();
                        ui.insert("analysis_multipv".to_string(), serde_json::json!(multipv));
                        g.ui_state = serde_json::Value::Object(ui);
                        g.touch();
                        Ok(())
                    })
                    .await;
                match result {
                    Ok(_) => {
                        let mut out = vec![self.send_state().await];
                        out.extend(self.sync_analysis_to_current_game().await);
                        out
                    }
                    Err(e) => vec![OutboundMessage::toast("error", format!("set_multipv failed: {e}"))],
                }
            }

            InboundMessage::AnalysisStart { node_id } => {
                let game = self.runtime.current_game().await;
                match self.start_analysis_for_node(&game, node_id.as_deref()).await {
                    Ok(_) => Vec::new(),
                    Err(reason) => vec![OutboundMessage::toast("warning", reason)],
                }
            }

            InboundMessage::AnalysisStop => {
                self.analysis.stop("stopped by user").await;
                Vec::new()
            }

            InboundMessage::GameImportText { text, title } => {
                if text.trim().is_empty() {
                    return vec![OutboundMessage::toast("error", "text is required")];
                }
                match import_game_text(&text, title.as_deref()) {
                    Ok(game) => {
                        self.runtime.set_current_game(game).await;
                        let mut out = vec![self.send_state().await];
                        out.extend(self.sync_analysis_to_current_game().await);
                        out
                    }
                    Err(e) => vec![OutboundMessage::toast("error", format!("import failed: {e}"))],
                }
            }

            InboundMessage::SessionTakeover => Vec::new(),
        }
    }

    /// Connection teardown: releases ownership if this connection held it,
    /// detaches the engine's owner sender, and best-effort disables
    /// analysis on the current game so it doesn't keep running unattended.
    pub async fn disconnect(&self, conn_id: &str) {
        if !self.sessions.release_if_owner(conn_id) {
            return;
        }
        self.analysis.owner_disconnected().await;
        let _ = self
            .runtime
            .mutate(|g| {
                let mut ui = g.ui_state.as_object().cloned().unwrap_or_default();
                ui.insert("analysis_enabled".to_string(), serde_json::Value::Bool(false));
                g.ui_state = serde_json::Value::Object(ui);
                g.touch();
                Ok(())
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use shogi_engine::EngineConfig;

    fn make_dispatcher() -> (Dispatcher, Arc<SessionArbiter<Channel>>) {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(Runtime::new(store));
        let analysis = Arc::new(EngineDriver::new(EngineConfig::default()));
        let sessions = Arc::new(SessionArbiter::new());
        (Dispatcher::new(runtime, analysis, sessions.clone()), sessions)
    }

    #[tokio::test]
    async fn first_connection_receives_session_granted() {
        let (dispatcher, _sessions) = make_dispatcher();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.connect("conn-a", tx).await;
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, OutboundMessage::SessionGranted { .. }));
    }

    #[tokio::test]
    async fn second_connection_receives_session_busy() {
        let (dispatcher, _sessions) = make_dispatcher();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        dispatcher.connect("conn-a", tx_a).await;
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        dispatcher.connect("conn-b", tx_b).await;
        let msg = rx_b.recv().await.unwrap();
        assert!(matches!(msg, OutboundMessage::SessionBusy { .. }));
    }

    #[tokio::test]
    async fn play_move_emits_game_state_with_new_current_node() {
        let (dispatcher, _sessions) = make_dispatcher();
        let game = dispatcher.runtime.current_game().await;
        let root = game.root_node_id.clone();
        let outbound = dispatcher
            .handle_message(InboundMessage::NodePlayMove { from_node_id: root, move_usi: "7g7f".to_string() })
            .await;
        assert_eq!(outbound.len(), 1);
        match &outbound[0] {
            OutboundMessage::GameState { game } => assert_eq!(game.current_path_moves, vec!["7g7f".to_string()]),
            other => panic!("expected game:state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_move_fields_produce_a_toast_without_mutating_state() {
        let (dispatcher, _sessions) = make_dispatcher();
        let outbound = dispatcher
            .handle_message(InboundMessage::NodePlayMove { from_node_id: String::new(), move_usi: "7g7f".to_string() })
            .await;
        assert_eq!(outbound.len(), 1);
        assert!(matches!(&outbound[0], OutboundMessage::Toast { level: "error", .. }));
    }

    #[tokio::test]
    async fn analysis_set_enabled_without_a_configured_engine_reports_unavailable() {
        let (dispatcher, _sessions) = make_dispatcher();
        let outbound = dispatcher.handle_message(InboundMessage::AnalysisSetEnabled { enabled: true }).await;
        assert_eq!(outbound.len(), 2);
        assert!(matches!(&outbound[0], OutboundMessage::Toast { level: "warning", .. }));
        assert!(matches!(&outbound[1], OutboundMessage::AnalysisStopped { .. }));
    }

    #[tokio::test]
    async fn disconnect_releases_ownership_for_the_owning_connection() {
        let (dispatcher, sessions) = make_dispatcher();
        let (tx, _rx) = mpsc::unbounded_channel();
        dispatcher.connect("conn-a", tx).await;
        assert!(sessions.is_owner("conn-a"));
        dispatcher.disconnect("conn-a").await;
        assert!(!sessions.is_owner("conn-a"));
    }
}
