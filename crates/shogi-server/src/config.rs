//! Reads the engine configuration from the process environment (§6.5),
//! grounded on `analysis_service.py`'s `_int_env`/`_float_env`/
//! `_engine_cmd_from_env` helpers. Unlike the original, the variable names
//! here are unprefixed (`ENGINE_CMD`, not `SHOGI_ANALYZER_ENGINE_CMD`) per
//! this project's own configuration table.

use std::env;
use std::time::Duration;

use shogi_engine::EngineConfig;

fn int_env(name: &str, default: u32, min_value: u32, max_value: u32) -> u32 {
    let raw = env::var(name).unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }
    match trimmed.parse::<i64>() {
        Ok(value) => value.clamp(min_value as i64, max_value as i64) as u32,
        Err(_) => default,
    }
}

fn float_env(name: &str, default: f64, min_value: f64, max_value: f64) -> f64 {
    let raw = env::var(name).unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }
    match trimmed.parse::<f64>() {
        Ok(value) => value.clamp(min_value, max_value),
        Err(_) => default,
    }
}

/// Splits a shell-like command line on whitespace, honoring single and
/// double quotes so a quoted engine path containing spaces survives. Not a
/// full POSIX shell grammar (no escapes, no variable expansion) — engine
/// commands are operator-supplied, not untrusted shell text.
fn split_command_line(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn engine_cmd_from_env() -> Option<Vec<String>> {
    let cmd = env::var("ENGINE_CMD").unwrap_or_default();
    let trimmed = cmd.trim();
    if !trimmed.is_empty() {
        let parts = split_command_line(trimmed);
        if !parts.is_empty() {
            return Some(parts);
        }
    }
    let path = env::var("ENGINE_PATH").unwrap_or_default();
    let trimmed = path.trim();
    if !trimmed.is_empty() {
        return Some(vec![trimmed.to_string()]);
    }
    None
}

fn default_threads() -> u32 {
    std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1).max(1)
}

/// Server-wide configuration, currently just the engine driver's settings.
/// Read from the environment variables of §6.5; the CLI layers
/// `--engine-cmd`/`--engine-path` overrides on top after construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let eval_dir = env::var("ENGINE_EVAL_DIR").ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Config {
            engine: EngineConfig {
                cmd: engine_cmd_from_env(),
                eval_dir,
                threads: int_env("ENGINE_THREADS", default_threads(), 1, 512),
                hash_mb: int_env("ENGINE_HASH_MB", 512, 16, 65536),
                usiok_timeout: Duration::from_secs_f64(float_env("USIOK_TIMEOUT_S", 12.0, 1.0, 120.0)),
                readyok_timeout: Duration::from_secs_f64(float_env("READYOK_TIMEOUT_S", 45.0, 2.0, 300.0)),
                post_setoption_readyok_timeout: Duration::from_secs_f64(float_env(
                    "POST_SETOPTION_READYOK_TIMEOUT_S",
                    45.0,
                    2.0,
                    300.0,
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_command_line_respects_quoted_spaces() {
        let parts = split_command_line(r#"engine --name "Deep Shogi" --flag"#);
        assert_eq!(parts, vec!["engine", "--name", "Deep Shogi", "--flag"]);
    }

    #[test]
    fn split_command_line_handles_bare_words() {
        assert_eq!(split_command_line("engine --threads 4"), vec!["engine", "--threads", "4"]);
    }
}
