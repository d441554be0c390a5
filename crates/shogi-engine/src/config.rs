use std::time::Duration;

/// Boot-time configuration for a single [`crate::EngineDriver`].
///
/// This is a plain value, not an environment reader: `shogi-server::config`
/// owns environment parsing (§4.J) and builds one of these per process. The
/// clamped ranges below mirror `analysis_service.py`'s `_int_env`/`_float_env`
/// helpers; the clamping itself happens at the call site that reads the
/// environment, not here, since by the time a `EngineConfig` exists the
/// values are already trusted.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shell-split engine command, or `None` when no engine is configured.
    pub cmd: Option<Vec<String>>,
    /// Forces the `EvalDir` option instead of probing for it.
    pub eval_dir: Option<String>,
    pub threads: u32,
    pub hash_mb: u32,
    pub usiok_timeout: Duration,
    pub readyok_timeout: Duration,
    pub post_setoption_readyok_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cmd: None,
            eval_dir: None,
            threads: 1,
            hash_mb: 512,
            usiok_timeout: Duration::from_secs(12),
            readyok_timeout: Duration::from_secs(45),
            post_setoption_readyok_timeout: Duration::from_secs(45),
        }
    }
}

impl EngineConfig {
    pub fn is_configured(&self) -> bool {
        self.cmd.as_ref().is_some_and(|c| !c.is_empty())
    }
}
