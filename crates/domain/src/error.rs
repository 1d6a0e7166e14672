/// Shared error type used across all crates in this workspace.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("path \"{requested}\" escapes workspace root \"{root}\"")]
    PathOutsideWorkspace { root: String, requested: String },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("trace not found: {0}")]
    TraceNotFound(String),

    #[error("no pending HITL action on trace {0}")]
    NoPendingHitl(String),

    #[error("max_turns_reached")]
    MaxTurnsReached,

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool result not found for ref {0}")]
    ToolResultNotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
