/// Core error type for the mini app access layer.
///
/// Adapter crates map their specific errors into this type so callers can
/// distinguish the few cases that need a different flow (no identity, accept
/// endpoint missing) from generic failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("no telegram user identity available")]
    NoUser,

    #[error("policy accept endpoint is not deployed")]
    AcceptUnavailable,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("api error: {0}")]
    Api(String),
}

pub type Result<T> = std::result::Result<T, Error>;
