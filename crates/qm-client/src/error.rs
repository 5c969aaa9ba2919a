use thiserror::Error;

/// The client's failure modes collapsed into one flattened enum instead of
/// a bare `Exception`/`ConnectionError` mix.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not reach quartermaster server: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("reservation not found at {url}")]
    ReservationNotFound { url: String },

    #[error("unexpected response from server (url={url}, status={status}): {body}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("no driver registered for '{0}'")]
    UnknownDriver(String),

    #[error(transparent)]
    Driver(#[from] qm_driver::LocalDriverError),

    #[error("device '{0}' is missing required config key '{1}'")]
    MissingDeviceConfig(String, &'static str),
}
