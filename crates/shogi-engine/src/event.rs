use serde::Serialize;

use crate::info::AnalysisLine;

/// Messages the driver pushes to whichever channel is currently attached as
/// owner sender. The dispatcher (shogi-server) forwards `AnalysisUpdate` and
/// `AnalysisStopped` to the owning client and persists `AnalysisSnapshot`
/// through its `GameStore`; the driver itself has no store dependency.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    AnalysisUpdate {
        node_id: String,
        elapsed_ms: u64,
        multipv: u32,
        lines: Vec<AnalysisLine>,
        bestline: Option<AnalysisLine>,
    },
    AnalysisSnapshot {
        node_id: String,
        elapsed_ms: u64,
        multipv: u32,
        lines: Vec<AnalysisLine>,
    },
    AnalysisStopped {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    NotConfigured,
    Idle,
    Starting,
    Ready,
    Analyzing,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusWire {
    pub enabled: bool,
    pub status: EngineStatus,
    pub engine_name: Option<String>,
    pub command: String,
    pub eval_dir: Option<String>,
    pub analysis_running: bool,
    pub node_id: Option<String>,
    pub multipv: u32,
    pub threads: u32,
    pub hash_mb: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilitiesWire {
    pub analysis: bool,
    pub analysis_controls: Vec<&'static str>,
}
