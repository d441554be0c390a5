//! Wire message shapes (§6.2): a permissive inbound envelope the dispatcher
//! interprets message-type by message-type (so an unknown `type` can still
//! be echoed back in a `toast` instead of failing deserialization outright),
//! and a strongly typed outbound enum for everything the server pushes back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shogi_engine::{AnalysisLine, EngineEvent, StatusWire};
use shogi_tree::GameTreeWire;

/// The envelope every inbound frame is first deserialized into. `type` and
/// `payload` carry the message; `session_id`/`owner_token` are the
/// freshness tokens every owner message after `session:granted` must echo
/// back.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: Value,
    pub session_id: Option<String>,
    pub owner_token: Option<String>,
}

/// The typed shape of every recognized inbound message (§6.2's table).
/// `Dispatcher::handle` parses a raw [`InboundEnvelope`] into this via
/// [`InboundMessage::parse`]; an unrecognized `type` parses to `None` and
/// the caller reports it with a `toast` instead of failing the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    GameNew { title: Option<String>, initial_sfen: Option<String> },
    GameLoad { game_id: String },
    GameSave { title: Option<String>, meta: Option<Value>, ui_state: Option<Value>, current_node_id: Option<String> },
    NodeJump { node_id: String },
    NodePlayMove { from_node_id: String, move_usi: String },
    NodeSetComment { node_id: String, comment: String },
    NodeReorderChildren { parent_id: String, ordered_child_ids: Vec<String> },
    AnalysisSetEnabled { enabled: bool },
    AnalysisSetMultipv { multipv: i64 },
    AnalysisStart { node_id: Option<String> },
    AnalysisStop,
    GameImportText { text: String, title: Option<String> },
    SessionTakeover,
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

impl InboundMessage {
    /// Returns `None` for a `type` this server doesn't recognize, mirroring
    /// the original's fallthrough to an "unknown message type" toast.
    pub fn parse(msg_type: &str, payload: &Value) -> Option<InboundMessage> {
        match msg_type {
            "game:new" => Some(InboundMessage::GameNew {
                title: str_field(payload, "title"),
                initial_sfen: str_field(payload, "initial_sfen"),
            }),
            "game:load" => Some(InboundMessage::GameLoad { game_id: str_field(payload, "game_id").unwrap_or_default() }),
            "game:save" => Some(InboundMessage::GameSave {
                title: str_field(payload, "title"),
                meta: payload.get("meta").filter(|v| v.is_object()).cloned(),
                ui_state: payload.get("ui_state").filter(|v| v.is_object()).cloned(),
                current_node_id: str_field(payload, "current_node_id"),
            }),
            "node:jump" => Some(InboundMessage::NodeJump { node_id: str_field(payload, "node_id").unwrap_or_default() }),
            "node:play_move" => Some(InboundMessage::NodePlayMove {
                from_node_id: str_field(payload, "from_node_id").unwrap_or_default(),
                move_usi: str_field(payload, "move_usi").unwrap_or_default(),
            }),
            "node:set_comment" => Some(InboundMessage::NodeSetComment {
                node_id: str_field(payload, "node_id").unwrap_or_default(),
                comment: str_field(payload, "comment").unwrap_or_default(),
            }),
            "node:reorder_children" => {
                let ordered_child_ids = payload
                    .get("ordered_child_ids")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                Some(InboundMessage::NodeReorderChildren {
                    parent_id: str_field(payload, "parent_id").unwrap_or_default(),
                    ordered_child_ids,
                })
            }
            "analysis:set_enabled" => {
                Some(InboundMessage::AnalysisSetEnabled { enabled: payload.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false) })
            }
            "analysis:set_multipv" => payload.get("multipv").and_then(|v| v.as_i64()).map(|multipv| InboundMessage::AnalysisSetMultipv { multipv }),
            "analysis:start" => Some(InboundMessage::AnalysisStart { node_id: str_field(payload, "node_id") }),
            "analysis:stop" => Some(InboundMessage::AnalysisStop),
            "game:import_text" => Some(InboundMessage::GameImportText {
                text: str_field(payload, "text").unwrap_or_default(),
                title: str_field(payload, "title"),
            }),
            "session:takeover" => Some(InboundMessage::SessionTakeover),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    pub analysis: bool,
    pub analysis_controls: Vec<&'static str>,
    pub import_formats: Vec<&'static str>,
    pub export_formats: Vec<&'static str>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AnalysisStateWire {
    pub enabled: bool,
    pub multipv: u32,
}

/// Everything the server can push to the owning connection. Tagged the same
/// way as [`EngineEvent`] so the transport layer can serialize both through
/// one `{"type": ..., "payload": ...}` envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundMessage {
    #[serde(rename = "session:granted")]
    SessionGranted {
        game: GameTreeWire,
        server_capabilities: ServerCapabilities,
        engine_status: StatusWire,
        analysis_state: AnalysisStateWire,
        session_id: String,
        owner_token: String,
    },
    #[serde(rename = "session:busy")]
    SessionBusy { owner_since: Option<String>, owner_hint: Option<String> },
    #[serde(rename = "session:kicked")]
    SessionKicked { reason: String },
    #[serde(rename = "session:stale")]
    SessionStale { reason: String, expected_session_id: Option<String> },
    #[serde(rename = "game:state")]
    GameState { game: GameTreeWire },
    #[serde(rename = "analysis:update")]
    AnalysisUpdate { node_id: String, elapsed_ms: u64, multipv: u32, lines: Vec<AnalysisLine>, bestline: Option<AnalysisLine> },
    #[serde(rename = "analysis:stopped")]
    AnalysisStopped { reason: String },
    Toast { level: &'static str, message: String },
}

impl OutboundMessage {
    pub fn toast(level: &'static str, message: impl Into<String>) -> OutboundMessage {
        OutboundMessage::Toast { level, message: message.into() }
    }
}

/// Forwards the subset of [`EngineEvent`] the transport cares about;
/// `AnalysisSnapshot` has no client-facing shape, it's persisted by the
/// dispatcher and otherwise dropped here.
impl OutboundMessage {
    pub fn from_engine_event(event: EngineEvent) -> Option<OutboundMessage> {
        match event {
            EngineEvent::AnalysisUpdate { node_id, elapsed_ms, multipv, lines, bestline } => {
                Some(OutboundMessage::AnalysisUpdate { node_id, elapsed_ms, multipv, lines, bestline })
            }
            EngineEvent::AnalysisStopped { reason } => Some(OutboundMessage::AnalysisStopped { reason }),
            EngineEvent::AnalysisSnapshot { .. } => None,
        }
    }
}

pub fn engine_not_configured_note() -> String {
    "USI engine analysis is disabled until ENGINE_PATH or ENGINE_CMD is set".to_string()
}

pub fn capabilities_for(analysis_available: bool) -> ServerCapabilities {
    ServerCapabilities {
        analysis: analysis_available,
        analysis_controls: if analysis_available { vec!["enable", "multipv", "start", "stop"] } else { vec![] },
        import_formats: vec!["usi", "kif", "kif2"],
        export_formats: vec!["usi", "kif", "kif2"],
        notes: if analysis_available { vec![] } else { vec![engine_not_configured_note()] },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_play_move() {
        let payload = serde_json::json!({"from_node_id": "a", "move_usi": "7g7f"});
        let parsed = InboundMessage::parse("node:play_move", &payload).unwrap();
        assert_eq!(parsed, InboundMessage::NodePlayMove { from_node_id: "a".to_string(), move_usi: "7g7f".to_string() });
    }

    #[test]
    fn unknown_message_type_parses_to_none() {
        assert!(InboundMessage::parse("bogus:type", &Value::Null).is_none());
    }

    #[test]
    fn reorder_children_collects_string_array() {
        let payload = serde_json::json!({"parent_id": "p", "ordered_child_ids": ["b", "a"]});
        let parsed = InboundMessage::parse("node:reorder_children", &payload).unwrap();
        assert_eq!(
            parsed,
            InboundMessage::NodeReorderChildren { parent_id: "p".to_string(), ordered_child_ids: vec!["b".to_string(), "a".to_string()] }
        );
    }

    #[test]
    fn capabilities_without_engine_include_a_note() {
        let caps = capabilities_for(false);
        assert!(caps.analysis_controls.is_empty());
        assert_eq!(caps.notes.len(), 1);
    }
}
