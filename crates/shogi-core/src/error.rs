use thiserror::Error;

/// The eight observable error kinds of the analyzer core.
///
/// `FormError` and `SemanticError` are produced by the SFEN/move codec and
/// the notation engine; the remaining variants are produced further up the
/// stack (game tree, engine driver, session arbiter) but live here so every
/// crate in the workspace can propagate a single error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShogiError {
    #[error("malformed input: {0}")]
    FormError(String),

    #[error("invalid move: {0}")]
    SemanticError(String),

    #[error("ambiguous notation '{token}': {candidates} candidates")]
    AmbiguousNotation { token: String, candidates: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("engine is not configured")]
    EngineNotConfigured,

    #[error("engine protocol error: {message}\n{diagnostic_tail}")]
    EngineProtocolError {
        message: String,
        diagnostic_tail: String,
    },

    #[error("engine transient error: {0}")]
    EngineTransient(String),

    #[error("session conflict: stale token or session id")]
    SessionConflict,
}

pub type ShogiResult<T> = Result<T, ShogiError>;
