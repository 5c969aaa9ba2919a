use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid pool id: {0}")]
    InvalidPoolId(String),

    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("device configuration invalid for driver {driver:?}: {errors:?}")]
    InvalidDeviceConfig {
        driver: String,
        errors: Vec<String>,
    },

    #[error("incompatible communicator {communicator:?} for host type {host_type:?}")]
    IncompatibleCommunicator {
        communicator: String,
        host_type: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
