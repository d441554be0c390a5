use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use shogi_core::{position_command, ShogiError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::diagnostics::DiagnosticRing;
use crate::event::{CapabilitiesWire, EngineEvent, EngineStatus, StatusWire};
use crate::flag::Flag;
use crate::info::{parse_info_line, parse_option_name, AnalysisLine};

/// Protocol state accumulated during one boot of the engine process. Torn
/// down and replaced with a fresh instance every time the process restarts.
/// Deliberately separate from [`Inner`]: the reader task sets `usiok`/
/// `readyok`/`bestmove` and records option names directly through this
/// struct's own synchronization, so a waiter holding the driver's main lock
/// is never blocked waiting on itself.
struct Handshake {
    usiok: Flag,
    readyok: Flag,
    bestmove: Flag,
    engine_name: StdMutex<Option<String>>,
    option_names: StdMutex<HashSet<String>>,
}

impl Handshake {
    fn new() -> Self {
        Handshake {
            usiok: Flag::new(),
            readyok: Flag::new(),
            bestmove: Flag::new(),
            engine_name: StdMutex::new(None),
            option_names: StdMutex::new(HashSet::new()),
        }
    }

    fn supports_option(&self, name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        self.option_names.lock().unwrap().iter().any(|opt| opt.to_ascii_lowercase() == lowered)
    }
}

struct Inner {
    state: EngineStatus,
    proc: Option<Child>,
    stdin: Option<ChildStdin>,
    reader_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    ticker_task: Option<JoinHandle<()>>,
    handshake: Arc<Handshake>,
    io_log: Arc<StdMutex<DiagnosticRing>>,
    last_error: Option<String>,
    owner_sender: Option<mpsc::UnboundedSender<EngineEvent>>,
    eval_dir: Option<String>,

    analysis_running: bool,
    analysis_node_id: Option<String>,
    analysis_started_at: Option<Instant>,
    active_multipv: u32,
    latest_pv_by_index: BTreeMap<u32, AnalysisLine>,
    info_version: u64,
    last_sent_info_version: Option<u64>,
    last_sent_at: Option<Instant>,
    last_snapshot_signature: Option<String>,
}

impl Inner {
    fn new(state: EngineStatus) -> Self {
        Inner {
            state,
            proc: None,
            stdin: None,
            reader_task: None,
            stderr_task: None,
            ticker_task: None,
            handshake: Arc::new(Handshake::new()),
            io_log: Arc::new(StdMutex::new(DiagnosticRing::new(120))),
            last_error: None,
            owner_sender: None,
            eval_dir: None,
            analysis_running: false,
            analysis_node_id: None,
            analysis_started_at: None,
            active_multipv: 1,
            latest_pv_by_index: BTreeMap::new(),
            info_version: 0,
            last_sent_info_version: None,
            last_sent_at: None,
            last_snapshot_signature: None,
        }
    }

    fn proc_alive(&mut self) -> bool {
        match self.proc.as_mut() {
            Some(proc) => proc.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }
}

/// Drives a single external USI engine subprocess: handshake, option
/// negotiation, one analysis session at a time, and a throttled stream of
/// ranked PV snapshots to whichever sender is currently attached as owner
/// (§4.G). Cheap to clone — every clone shares the same process and state.
#[derive(Clone)]
pub struct EngineDriver {
    config: Arc<EngineConfig>,
    inner: Arc<Mutex<Inner>>,
}

impl EngineDriver {
    pub fn new(config: EngineConfig) -> Self {
        let state = if config.is_configured() { EngineStatus::Idle } else { EngineStatus::NotConfigured };
        EngineDriver { config: Arc::new(config), inner: Arc::new(Mutex::new(Inner::new(state))) }
    }

    pub fn is_available(&self) -> bool {
        self.config.is_configured()
    }

    pub fn capabilities_wire(&self) -> CapabilitiesWire {
        let enabled = self.is_available();
        CapabilitiesWire {
            analysis: enabled,
            analysis_controls: if enabled { vec!["enable", "multipv", "start", "stop"] } else { Vec::new() },
        }
    }

    pub async fn status_wire(&self) -> StatusWire {
        let inner = self.inner.lock().await;
        let engine_name = inner.handshake.engine_name.lock().unwrap().clone();
        StatusWire {
            enabled: self.is_available(),
            status: inner.state,
            engine_name,
            command: self.config.cmd.clone().unwrap_or_default().join(" "),
            eval_dir: inner.eval_dir.clone(),
            analysis_running: inner.analysis_running,
            node_id: inner.analysis_node_id.clone(),
            multipv: inner.active_multipv,
            threads: self.config.threads,
            hash_mb: self.config.hash_mb,
            last_error: inner.last_error.clone(),
        }
    }

    pub async fn attach_owner_sender(&self, sender: mpsc::UnboundedSender<EngineEvent>) {
        let mut inner = self.inner.lock().await;
        inner.owner_sender = Some(sender);
        if inner.analysis_running {
            self.stop_locked(&mut inner, "owner changed", true).await;
        }
    }

    pub async fn clear_owner_sender(&self) {
        self.inner.lock().await.owner_sender = None;
    }

    pub async fn owner_disconnected(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner, "owner disconnected", true).await;
        inner.owner_sender = None;
    }

    pub async fn stop(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner, reason, true).await;
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner, "server shutdown", false).await;
        let proc = inner.proc.take();
        let reader = inner.reader_task.take();
        let stderr = inner.stderr_task.take();
        inner.state = if self.is_available() { EngineStatus::Idle } else { EngineStatus::NotConfigured };
        drop(inner);

        if let Some(mut proc) = proc {
            if proc.try_wait().ok().flatten().is_none() {
                let _ = proc.start_kill();
                if tokio::time::timeout(Duration::from_secs(2), proc.wait()).await.is_err() {
                    let _ = proc.start_kill();
                }
            }
        }
        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(stderr) = stderr {
            stderr.abort();
        }
    }

    /// Starts (or restarts) analysis of `initial_sfen` plus `moves` up to
    /// `node_id`. The caller (the runtime/dispatcher in `shogi-server`) owns
    /// the game tree and resolves the path to USI moves; the driver only
    /// ever sees the resulting position command.
    pub async fn start_for_game(
        &self,
        initial_sfen: &str,
        moves: &[String],
        node_id: &str,
        multipv: u32,
    ) -> Result<(), ShogiError> {
        let multipv = multipv.clamp(1, 20);
        let position_cmd = position_command(Some(initial_sfen), moves)?;
        let mut inner = self.inner.lock().await;

        if !self.is_available() {
            inner.state = EngineStatus::NotConfigured;
            let reason = "USI engine is not configured (set ENGINE_PATH)".to_string();
            self.emit_locked(&inner, EngineEvent::AnalysisStopped { reason });
            return Err(ShogiError::EngineNotConfigured);
        }

        let result = self.start_for_game_inner(&mut inner, &position_cmd, node_id, multipv).await;
        match result {
            Ok(()) => {
                let needs_ticker = inner.ticker_task.as_ref().map(|t| t.is_finished()).unwrap_or(true);
                if needs_ticker {
                    inner.ticker_task = Some(self.spawn_ticker());
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, node_id, "analysis start failed");
                inner.last_error = Some(err.to_string());
                inner.state = EngineStatus::Error;
                let reason = format!("analysis start failed: {err}");
                self.emit_locked(&inner, EngineEvent::AnalysisStopped { reason });
                Err(err)
            }
        }
    }

    async fn start_for_game_inner(
        &self,
        inner: &mut Inner,
        position_cmd: &str,
        node_id: &str,
        multipv: u32,
    ) -> Result<(), ShogiError> {
        self.ensure_engine_ready_locked(inner).await?;
        if inner.analysis_running {
            self.stop_locked(inner, "restarting", false).await;
        }
        self.apply_options_locked(inner, multipv).await?;

        let hs = inner.handshake.clone();
        hs.bestmove.clear();
        inner.latest_pv_by_index.clear();
        inner.info_version += 1;
        inner.last_sent_info_version = None;
        inner.last_sent_at = None;
        inner.last_snapshot_signature = None;
        inner.analysis_node_id = Some(node_id.to_string());
        inner.analysis_started_at = Some(Instant::now());
        inner.active_multipv = multipv;
        inner.analysis_running = true;
        inner.state = EngineStatus::Analyzing;

        self.send_line_locked(inner, position_cmd).await?;
        self.send_line_locked(inner, "go infinite").await?;
        Ok(())
    }

    async fn ensure_engine_ready_locked(&self, inner: &mut Inner) -> Result<(), ShogiError> {
        if !self.is_available() {
            return Err(ShogiError::EngineNotConfigured);
        }

        if inner.proc.is_some() && !inner.proc_alive() {
            inner.proc = None;
            inner.state = EngineStatus::Idle;
        }

        if inner.proc.is_none() {
            inner.state = EngineStatus::Starting;
            inner.last_error = None;
            inner.handshake = Arc::new(Handshake::new());
            inner.io_log.lock().unwrap().clear();

            let cmd = self.config.cmd.clone().ok_or(ShogiError::EngineNotConfigured)?;
            let (program, args) =
                cmd.split_first().ok_or_else(|| ShogiError::EngineTransient("empty engine command".into()))?;

            if cmd.len() == 1 {
                let path = Path::new(program);
                if !path.exists() {
                    return Err(ShogiError::EngineTransient(format!(
                        "engine executable not found: {}",
                        path.display()
                    )));
                }
            }

            let mut command = Command::new(program);
            command.args(args).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
            if cmd.len() == 1 {
                if let Some(parent) = Path::new(program).parent() {
                    if parent != Path::new("") {
                        command.current_dir(parent);
                    }
                }
            }

            let mut child = command.spawn().map_err(|e| {
                tracing::error!(error = %e, "failed to start engine process");
                ShogiError::EngineTransient(format!("failed to start engine: {e}"))
            })?;
            let stdin =
                child.stdin.take().ok_or_else(|| ShogiError::EngineTransient("engine stdin unavailable".into()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| ShogiError::EngineTransient("engine stdout unavailable".into()))?;
            let stderr = child.stderr.take();

            inner.proc = Some(child);
            inner.stdin = Some(stdin);
            let hs = inner.handshake.clone();
            inner.reader_task = Some(self.spawn_reader(stdout, hs.clone()));
            inner.stderr_task = stderr.map(|s| self.spawn_stderr(s));

            self.send_line_locked(inner, "usi").await?;
            self.wait_flag(inner, &hs.usiok, self.config.usiok_timeout, "usiok").await?;

            self.apply_boot_options_locked(inner).await?;

            hs.readyok.clear();
            self.send_line_locked(inner, "isready").await?;
            self.wait_flag(inner, &hs.readyok, self.config.readyok_timeout, "readyok").await?;

            self.send_line_locked(inner, "usinewgame").await?;
            inner.state = EngineStatus::Ready;
        } else if !inner.analysis_running {
            inner.state = EngineStatus::Ready;
        }
        Ok(())
    }

    async fn wait_flag(&self, inner: &mut Inner, flag: &Flag, timeout: Duration, label: &str) -> Result<(), ShogiError> {
        let deadline = Instant::now() + timeout;
        loop {
            if flag.is_set() {
                return Ok(());
            }
            if inner.proc.is_some() && !inner.proc_alive() {
                let tail = inner.io_log.lock().unwrap().tail(40);
                tracing::error!(label, "engine process exited while waiting for handshake step");
                return Err(ShogiError::EngineProtocolError {
                    message: format!("engine process exited while waiting for {label}"),
                    diagnostic_tail: tail,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                let tail = inner.io_log.lock().unwrap().tail(40);
                tracing::warn!(label, "timeout waiting for handshake step");
                return Err(ShogiError::EngineProtocolError {
                    message: format!("timeout waiting for {label}"),
                    diagnostic_tail: tail,
                });
            }
            let chunk = deadline.saturating_duration_since(now).min(Duration::from_millis(250));
            let _ = tokio::time::timeout(chunk, flag.wait()).await;
        }
    }

    async fn send_line_locked(&self, inner: &mut Inner, line: &str) -> Result<(), ShogiError> {
        let trimmed = line.trim();
        tracing::debug!(line = trimmed, "> engine");
        inner.io_log.lock().unwrap().push(format!("> {trimmed}"));
        let stdin = inner.stdin.as_mut().ok_or_else(|| {
            tracing::error!("engine stdin is not available");
            ShogiError::EngineTransient("engine stdin is not available".into())
        })?;
        stdin.write_all(format!("{trimmed}\n").as_bytes()).await.map_err(|e| {
            tracing::error!(error = %e, "failed to write to engine");
            ShogiError::EngineTransient(format!("failed to write to engine: {e}"))
        })?;
        stdin.flush().await.map_err(|e| {
            tracing::error!(error = %e, "failed to flush engine stdin");
            ShogiError::EngineTransient(format!("failed to flush engine stdin: {e}"))
        })?;
        Ok(())
    }

    fn guess_eval_dir(&self) -> Option<String> {
        if let Some(dir) = &self.config.eval_dir {
            if Path::new(dir).is_dir() {
                return Some(dir.clone());
            }
        }
        let cmd = self.config.cmd.as_ref()?;
        if cmd.len() != 1 {
            return None;
        }
        let exe = Path::new(&cmd[0]);
        let parent = exe.parent()?;
        for candidate in [parent.join("eval"), parent.join("../eval"), parent.join("../../eval")] {
            if candidate.join("nn.bin").is_file() {
                return Some(candidate.to_string_lossy().into_owned());
            }
            if candidate.is_dir() {
                let has_file = std::fs::read_dir(&candidate)
                    .map(|entries| entries.filter_map(|e| e.ok()).any(|e| e.path().is_file()))
                    .unwrap_or(false);
                if has_file {
                    return Some(candidate.to_string_lossy().into_owned());
                }
            }
        }
        None
    }

    async fn apply_boot_options_locked(&self, inner: &mut Inner) -> Result<(), ShogiError> {
        let hs = inner.handshake.clone();
        if hs.supports_option("EvalDir") {
            if let Some(guess) = self.guess_eval_dir() {
                inner.eval_dir = Some(guess.clone());
                self.send_line_locked(inner, &format!("setoption name EvalDir value {guess}")).await?;
            }
        }
        if hs.supports_option("Threads") {
            self.send_line_locked(inner, &format!("setoption name Threads value {}", self.config.threads)).await?;
        }
        if hs.supports_option("USI_Hash") {
            self.send_line_locked(inner, &format!("setoption name USI_Hash value {}", self.config.hash_mb)).await?;
        } else if hs.supports_option("Hash") {
            self.send_line_locked(inner, &format!("setoption name Hash value {}", self.config.hash_mb)).await?;
        }
        Ok(())
    }

    async fn apply_options_locked(&self, inner: &mut Inner, multipv: u32) -> Result<(), ShogiError> {
        let hs = inner.handshake.clone();
        if hs.supports_option("MultiPV") {
            self.send_line_locked(inner, &format!("setoption name MultiPV value {multipv}")).await?;
            hs.readyok.clear();
            self.send_line_locked(inner, "isready").await?;
            self.wait_flag(inner, &hs.readyok, self.config.post_setoption_readyok_timeout, "readyok after setoption")
                .await?;
        }
        Ok(())
    }

    async fn stop_locked(&self, inner: &mut Inner, reason: &str, emit: bool) {
        let was_running = inner.analysis_running;
        inner.analysis_running = false;
        inner.analysis_node_id = None;
        inner.latest_pv_by_index.clear();
        inner.last_sent_info_version = None;
        inner.last_snapshot_signature = None;

        if let Some(ticker) = inner.ticker_task.take() {
            ticker.abort();
        }

        if was_running && inner.proc_alive() {
            let hs = inner.handshake.clone();
            hs.bestmove.clear();
            let _ = self.send_line_locked(inner, "stop").await;
            let _ = tokio::time::timeout(Duration::from_secs(2), hs.bestmove.wait()).await;
        }

        inner.state = if self.is_available() {
            if inner.proc_alive() { EngineStatus::Ready } else { EngineStatus::Idle }
        } else {
            EngineStatus::NotConfigured
        };

        if emit {
            self.emit_locked(inner, EngineEvent::AnalysisStopped { reason: reason.to_string() });
        }
    }

    fn emit_locked(&self, inner: &Inner, event: EngineEvent) {
        if let Some(sender) = &inner.owner_sender {
            let _ = sender.send(event);
        }
    }

    fn spawn_reader(&self, stdout: ChildStdout, hs: Arc<Handshake>) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move { driver.reader_loop(stdout, hs).await })
    }

    fn spawn_stderr(&self, stderr: ChildStderr) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move { driver.stderr_loop(stderr).await })
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move { driver.ticker_loop().await })
    }

    async fn reader_loop(self, stdout: ChildStdout, hs: Arc<Handshake>) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(raw)) => {
                    let line = raw.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::debug!(line = %line, "< engine");
                    {
                        let inner = self.inner.lock().await;
                        inner.io_log.lock().unwrap().push(format!("< {line}"));
                    }
                    self.handle_engine_line(&line, &hs).await;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "error reading engine stdout");
                    break;
                }
            }
        }

        let mut inner = self.inner.lock().await;
        let mut emit_reason = None;
        if inner.analysis_running {
            inner.analysis_running = false;
            inner.analysis_node_id = None;
            inner.latest_pv_by_index.clear();
            emit_reason = Some("engine process exited".to_string());
        }
        inner.proc = None;
        inner.state = if self.is_available() { EngineStatus::Idle } else { EngineStatus::NotConfigured };
        if let Some(reason) = &emit_reason {
            tracing::warn!(reason = %reason, "engine reader loop ended");
            self.emit_locked(&inner, EngineEvent::AnalysisStopped { reason: reason.clone() });
        }
    }

    async fn stderr_loop(self, stderr: ChildStderr) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let inner = self.inner.lock().await;
            inner.io_log.lock().unwrap().push(format!("! {line}"));
        }
    }

    async fn handle_engine_line(&self, line: &str, hs: &Handshake) {
        if line == "usiok" {
            hs.usiok.set();
            return;
        }
        if line == "readyok" {
            hs.readyok.set();
            return;
        }
        if line.starts_with("bestmove") {
            hs.bestmove.set();
            return;
        }
        if let Some(name) = line.strip_prefix("id name ") {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                *hs.engine_name.lock().unwrap() = Some(trimmed.to_string());
            }
            return;
        }
        if line.starts_with("option name ") {
            if let Some(name) = parse_option_name(line) {
                hs.option_names.lock().unwrap().insert(name);
            }
            return;
        }
        if !line.starts_with("info ") {
            return;
        }
        let Some(parsed) = parse_info_line(line) else { return };
        let mut inner = self.inner.lock().await;
        if !inner.analysis_running || inner.analysis_node_id.is_none() {
            return;
        }
        inner.latest_pv_by_index.insert(parsed.pv_index, parsed);
        inner.info_version += 1;
    }

    async fn ticker_loop(self) {
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut inner = self.inner.lock().await;
            if !inner.analysis_running || inner.analysis_node_id.is_none() {
                return;
            }

            let now = Instant::now();
            let started = inner.analysis_started_at.unwrap_or(now);
            let elapsed_ms = now.saturating_duration_since(started).as_millis() as u64;
            let interval = if elapsed_ms < 5000 { Duration::from_millis(500) } else { Duration::from_secs(1) };
            if let Some(last) = inner.last_sent_at {
                if now.saturating_duration_since(last) < interval {
                    continue;
                }
            }
            if inner.last_sent_info_version == Some(inner.info_version) {
                continue;
            }

            let active_multipv = inner.active_multipv;
            let mut lines: Vec<AnalysisLine> =
                inner.latest_pv_by_index.iter().filter(|(idx, _)| **idx <= active_multipv).map(|(_, l)| l.clone()).collect();
            lines.sort_by_key(|l| l.pv_index);
            if lines.is_empty() {
                continue;
            }

            inner.last_sent_at = Some(now);
            inner.last_sent_info_version = Some(inner.info_version);

            let node_id = inner.analysis_node_id.clone().unwrap();
            let signature = format!(
                "{node_id}|{active_multipv}|{:?}",
                lines.iter().map(|l| (l.pv_index, l.score_type, l.score_value, l.depth, l.pv_usi.clone())).collect::<Vec<_>>()
            );

            let bestline = lines.first().cloned();
            self.emit_locked(
                &inner,
                EngineEvent::AnalysisUpdate {
                    node_id: node_id.clone(),
                    elapsed_ms,
                    multipv: active_multipv,
                    lines: lines.clone(),
                    bestline,
                },
            );

            if inner.last_snapshot_signature.as_deref() != Some(signature.as_str()) {
                inner.last_snapshot_signature = Some(signature);
                self.emit_locked(&inner, EngineEvent::AnalysisSnapshot { node_id, elapsed_ms, multipv: active_multipv, lines });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_driver_reports_unavailable() {
        let driver = EngineDriver::new(EngineConfig::default());
        assert!(!driver.is_available());
        let caps = driver.capabilities_wire();
        assert!(!caps.analysis);
        assert!(caps.analysis_controls.is_empty());
    }

    #[tokio::test]
    async fn start_for_game_without_engine_cmd_is_engine_not_configured() {
        let driver = EngineDriver::new(EngineConfig::default());
        let err = driver.start_for_game("lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1", &[], "root", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ShogiError::EngineNotConfigured));
    }

    #[tokio::test]
    async fn status_wire_reflects_not_configured_state() {
        let driver = EngineDriver::new(EngineConfig::default());
        let status = driver.status_wire().await;
        assert_eq!(status.status, EngineStatus::NotConfigured);
        assert!(!status.enabled);
    }
}
