pub mod device;
pub mod host;
pub mod local;

pub use device::UsbipDevice;
pub use host::UsbipHost;
pub use local::UsbipLocalDriver;
