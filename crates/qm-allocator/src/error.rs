use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("resource {0} is already reserved")]
    AlreadyReserved(String),

    #[error("resource {0} not found")]
    ResourceNotFound(String),

    #[error(transparent)]
    Store(#[from] qm_store::StoreError),
}
