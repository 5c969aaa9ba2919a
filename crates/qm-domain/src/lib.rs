pub mod error;
pub mod types;

pub use error::DomainError;
pub use types::{
    CommunicatorKind, Device, DeviceId, DriverKind, HostId, HostType, KeyType, NewDeviceConfig,
    Pool, PoolId, RemoteHost, Resource, ResourceId, TeamCityPool,
};
