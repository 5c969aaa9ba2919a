use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommunicatorError {
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("invalid key material for {address}: {message}")]
    InvalidKey { address: String, message: String },

    #[error("connection to {address} failed: {message}")]
    ConnectionFailed { address: String, message: String },

    #[error("command execution on {address} failed: {message}")]
    ExecutionFailed { address: String, message: String },

    #[error("missing config key '{0}'")]
    MissingConfigKey(String),

    #[error("blocking task panicked: {0}")]
    JoinError(String),
}
