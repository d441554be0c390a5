//! End-to-end scenarios across multiple connections: session grant/takeover,
//! stale-token rejection, and a full owner-message round trip through
//! `Dispatcher::handle_envelope` rather than the lower-level `handle_message`
//! the unit tests in `dispatch.rs` exercise directly.

use std::sync::Arc;

use shogi_engine::{EngineConfig, EngineDriver};
use shogi_server::{Dispatcher, InboundEnvelope, MemoryStore, OutboundMessage, Runtime, SessionArbiter};
use tokio::sync::mpsc;

fn make_dispatcher() -> Dispatcher {
    let store = Arc::new(MemoryStore::new());
    let runtime = Arc::new(Runtime::new(store));
    let analysis = Arc::new(EngineDriver::new(EngineConfig::default()));
    let sessions = Arc::new(SessionArbiter::new());
    Dispatcher::new(runtime, analysis, sessions)
}

fn envelope(msg_type: &str, payload: serde_json::Value, session_id: &str, owner_token: &str) -> InboundEnvelope {
    InboundEnvelope {
        msg_type: msg_type.to_string(),
        payload,
        session_id: Some(session_id.to_string()),
        owner_token: Some(owner_token.to_string()),
    }
}

#[tokio::test]
async fn a_second_connection_must_take_over_before_it_can_send_owner_messages() {
    let dispatcher = make_dispatcher();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    dispatcher.connect("conn-a", tx_a.clone()).await;
    let granted = rx_a.recv().await.unwrap();
    let OutboundMessage::SessionGranted { session_id, owner_token, .. } = granted else {
        panic!("expected session:granted");
    };

    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    dispatcher.connect("conn-b", tx_b.clone()).await;
    let busy = rx_b.recv().await.unwrap();
    assert!(matches!(busy, OutboundMessage::SessionBusy { .. }));

    // conn-b tries to send an owner message without ever owning the session;
    // session_id/owner_token won't match, so it's rejected as stale.
    dispatcher
        .handle_envelope(
            "conn-b",
            &tx_b,
            envelope("node:play_move", serde_json::json!({"from_node_id": "root", "move_usi": "7g7f"}), "bogus", "bogus"),
        )
        .await;
    let stale = rx_b.recv().await.unwrap();
    assert!(matches!(stale, OutboundMessage::SessionStale { .. }));

    // conn-a, the real owner, can.
    dispatcher
        .handle_envelope(
            "conn-a",
            &tx_a,
            envelope("node:play_move", serde_json::json!({"from_node_id": "root", "move_usi": "7g7f"}), &session_id, &owner_token),
        )
        .await;
    let state = rx_a.recv().await.unwrap();
    match state {
        OutboundMessage::GameState { game } => assert_eq!(game.current_path_moves, vec!["7g7f".to_string()]),
        other => panic!("expected game:state, got {other:?}"),
    }
}

#[tokio::test]
async fn takeover_kicks_the_previous_owner_and_grants_fresh_tokens() {
    let dispatcher = make_dispatcher();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    dispatcher.connect("conn-a", tx_a.clone()).await;
    let granted_a = rx_a.recv().await.unwrap();
    let OutboundMessage::SessionGranted { owner_token: token_a, .. } = granted_a else {
        panic!("expected session:granted");
    };

    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    dispatcher.connect("conn-b", tx_b.clone()).await;
    let _busy = rx_b.recv().await.unwrap();

    let displaced = dispatcher.takeover("conn-b", tx_b.clone()).await;
    assert!(displaced.is_some(), "conn-a's channel should be returned for the caller to notify/close");

    let kicked = rx_a.recv().await.unwrap();
    assert!(matches!(kicked, OutboundMessage::SessionKicked { .. }));

    let granted_b = rx_b.recv().await.unwrap();
    let OutboundMessage::SessionGranted { owner_token: token_b, .. } = granted_b else {
        panic!("expected session:granted for the new owner");
    };
    assert_ne!(token_a, token_b);

    // conn-a's old token no longer authorizes anything.
    dispatcher
        .handle_envelope(
            "conn-a",
            &tx_a,
            envelope("node:play_move", serde_json::json!({"from_node_id": "root", "move_usi": "7g7f"}), "whatever", &token_a),
        )
        .await;
    let rejected = rx_a.recv().await.unwrap();
    assert!(matches!(rejected, OutboundMessage::SessionStale { .. }));
}

#[tokio::test]
async fn disconnect_frees_the_session_for_the_next_connection() {
    let dispatcher = make_dispatcher();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    dispatcher.connect("conn-a", tx_a).await;
    let _granted = rx_a.recv().await.unwrap();

    dispatcher.disconnect("conn-a").await;

    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    dispatcher.connect("conn-b", tx_b).await;
    let granted_b = rx_b.recv().await.unwrap();
    assert!(matches!(granted_b, OutboundMessage::SessionGranted { .. }));
}

#[tokio::test]
async fn an_unrecognized_message_type_produces_a_toast_instead_of_dropping_the_connection() {
    let dispatcher = make_dispatcher();
    let (tx, mut rx) = mpsc::unbounded_channel();
    dispatcher.connect("conn-a", tx.clone()).await;
    let OutboundMessage::SessionGranted { session_id, owner_token, .. } = rx.recv().await.unwrap() else {
        panic!("expected session:granted");
    };

    dispatcher.handle_envelope("conn-a", &tx, envelope("totally:unknown", serde_json::Value::Null, &session_id, &owner_token)).await;
    let toast = rx.recv().await.unwrap();
    assert!(matches!(toast, OutboundMessage::Toast { level: "warning", .. }));
}
