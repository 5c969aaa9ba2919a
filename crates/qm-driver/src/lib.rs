pub mod device;
pub mod error;
pub mod host;
pub mod local;
pub mod registry;
pub mod usbip;
pub mod virtualhere;

pub use device::DeviceDriver;
pub use error::{DeviceError, DriverError, HostError, LocalDriverError};
pub use host::{DeviceObservation, HostDriver};
pub use local::LocalDriver;
pub use registry::{DriverRegistry, LocalDriverRegistry};
