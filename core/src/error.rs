use thiserror::Error;

/// Application-level result alias, mirroring the `anyhow`-backed alias the
/// rest of the stack uses for infrastructure errors.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Domain-level error taxonomy. Each variant carries the wire error code it
/// maps to (spec §6/§7); HTTP status stays 200 for all of these, the code
/// field in the response envelope is what callers branch on.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("task arguments invalid: {0}")]
    ArgsInvalid(String),

    #[error("task not found")]
    TaskNotFound,

    #[error("task callback server not found")]
    TaskCallbackSrvNotFound,

    #[error("callback server has no routes registered")]
    NoRoutes,

    #[error("task has no schedule mode set")]
    UnknownSchedAt,

    #[error("this node is not the elected leader")]
    NotMaster,

    #[error("server is still starting up")]
    ServerStarted,

    #[error("server has been stopped")]
    ServerStopped,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Numeric code carried in the wire envelope (spec §6).
    pub fn code(&self) -> i32 {
        match self {
            CoreError::ArgsInvalid(_) => 10001,
            CoreError::TaskNotFound => 10002,
            CoreError::TaskCallbackSrvNotFound => 10003,
            CoreError::NoRoutes => 10004,
            CoreError::UnknownSchedAt => 10005,
            CoreError::NotMaster => 10006,
            CoreError::ServerStarted => 10007,
            CoreError::ServerStopped => 10008,
            CoreError::Config(_) => 10009,
            CoreError::Internal(_) => 500,
        }
    }
}
