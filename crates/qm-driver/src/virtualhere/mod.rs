pub mod device;
pub mod host;
pub mod local;
pub mod xml;

pub use device::VirtualHereDevice;
pub use host::VirtualHereHost;
pub use local::VirtualHereLocalDriver;
