use thiserror::Error;

/// Errors surfaced by the session/radio/batcher/upstream layers. Per spec
/// §7, almost nothing here is fatal to the process — supervisors retry
/// indefinitely and swallow everything short of external cancellation. This
/// type exists for the handful of call sites that do need to distinguish
/// failure kinds (socket setup, config loading) rather than to propagate
/// every BLE hiccup up the stack.
#[derive(Debug, Error)]
pub enum ConcentratorError {
    #[error("failed to bind upstream socket at {path}: {source}")]
    SocketBind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept upstream connection: {0}")]
    SocketAccept(#[source] std::io::Error),

    #[error("failed to read fleet config at {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("BLE adapter error: {0}")]
    Ble(String),
}
