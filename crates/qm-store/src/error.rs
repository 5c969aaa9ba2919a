use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("resource {0} is already reserved")]
    AlreadyReserved(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
