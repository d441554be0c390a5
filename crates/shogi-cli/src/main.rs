//! Binary entry point: loads configuration, wires up the runtime/engine
//! driver/dispatcher, and drives them from stdin instead of a real network
//! transport. Each line of input is one inbound message envelope as JSON;
//! each line of output is one outbound message the dispatcher produced.
//! Good enough to exercise the whole stack by hand or from a test script
//! without standing up a websocket server.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shogi_engine::EngineDriver;
use shogi_server::{Dispatcher, InboundEnvelope, MemoryStore, Runtime, SessionArbiter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// A line-oriented shogi analyzer session: reads `{"type": ..., "payload": ...}`
/// frames from stdin, writes the server's responses as JSON lines to stdout.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Overrides ENGINE_CMD for this run (shell-like, e.g. "engine --flag").
    #[arg(long)]
    engine_cmd: Option<String>,

    /// Overrides ENGINE_PATH for this run. Ignored if --engine-cmd is set.
    #[arg(long)]
    engine_path: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = shogi_server::Config::from_env();
    if let Some(cmd) = &args.engine_cmd {
        config.engine.cmd = Some(cmd.split_whitespace().map(str::to_string).collect());
    } else if let Some(path) = &args.engine_path {
        config.engine.cmd = Some(vec![path.clone()]);
    }

    let store = Arc::new(MemoryStore::new());
    let runtime = Arc::new(Runtime::new(store));
    runtime.startup().await;
    let analysis = Arc::new(EngineDriver::new(config.engine));
    let sessions = Arc::new(SessionArbiter::new());
    let dispatcher = Arc::new(Dispatcher::new(runtime, analysis, sessions));

    run_harness(dispatcher).await
}

async fn run_harness(dispatcher: Arc<Dispatcher>) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&message) {
                println!("{line}");
            }
        }
    });

    dispatcher.connect("cli", tx.clone()).await;

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let envelope: InboundEnvelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "could not parse input line as a message envelope");
                continue;
            }
        };
        tracing::info!("msg.type" = %envelope.msg_type, "dispatching");
        if envelope.msg_type == "session:takeover" {
            dispatcher.takeover("cli", tx.clone()).await;
            continue;
        }
        dispatcher.handle_envelope("cli", &tx, envelope).await;
    }

    dispatcher.disconnect("cli").await;
    drop(tx);
    let _ = printer.await;
    Ok(())
}
