use thiserror::Error;

/// One error kind per host-side failure mode, not nested inside each driver
/// implementation.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("connection to host failed: {0}")]
    Connection(String),

    #[error("command on host failed: {0}")]
    Command(String),

    #[error("VirtualHere client service does not appear to be running on {0}")]
    VirtualHereServiceDown(String),

    #[error("could not parse VirtualHere client state output: {0}")]
    VirtualHereStateParse(String),

    #[error("could not locate a local VirtualHere hub connection on {0}")]
    VirtualHereNoLocalHub(String),

    #[error("usbipd is not running on {0}")]
    UsbipdNotRunning(String),

    #[error("kernel module missing on {0}, try `sudo modprobe usbip_host`")]
    UsbipMissingKernelModule(String),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {0} not found on host")]
    NotFound(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

#[derive(Debug, Error)]
pub enum LocalDriverError {
    #[error("required command not found in PATH: {0}")]
    CommandNotFound(String),

    #[error("unsupported platform for this driver: {0}")]
    UnsupportedPlatform(String),

    #[error("command `{command}` failed (rc={rc}): stdout={stdout} stderr={stderr}")]
    CommandFailed {
        command: String,
        rc: i32,
        stdout: String,
        stderr: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no driver registered for identifier '{0}'")]
    NotRegistered(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}
