use thiserror::Error;

#[derive(Debug, Error)]
pub enum CiError {
    #[error("request to TeamCity failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response from TeamCity: rc={status} body={body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("used_for '{0}' is not a recognized Teamcity_ID reservation")]
    InvalidUsedFor(String),

    #[error(transparent)]
    Store(#[from] qm_store::StoreError),

    #[error(transparent)]
    Allocator(#[from] qm_allocator::AllocatorError),
}
