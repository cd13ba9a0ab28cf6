pub mod backend;
pub mod discovery;
pub mod models;
pub mod reader;
pub mod supervisor;
pub mod watchdog;

pub use backend::{Backend, NativeBackend, PortIo, Reconfigure, SttyBackend};
pub use discovery::{list_ports, resolve_port_path};
pub use models::{ConnectionState, DeviceEvent, PortInfo, SupervisorOptions};
pub use supervisor::SerialSupervisor;

use crate::stty::SttyError;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("invalid serial configuration: {0}")]
    Config(String),

    #[error("no ports match the path {0}")]
    DeviceNotFound(String),

    #[error("stty reported an error: {0}")]
    Exec(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serial driver error: {0}")]
    Driver(#[from] serialport::Error),

    #[error("this serial implementation only works on platforms with stty")]
    PlatformNotSupported,

    #[error("port supervisor has been shut down")]
    Disposed,

    #[error("port is not open")]
    NotOpen,
}

impl From<SttyError> for PortError {
    fn from(err: SttyError) -> Self {
        match err {
            SttyError::InvalidDataBits(_) | SttyError::InvalidStopBits(_) => {
                PortError::Config(err.to_string())
            }
            SttyError::CommandFailed(text) => PortError::Exec(text),
            SttyError::NotAvailable => PortError::PlatformNotSupported,
            SttyError::IoError(io) => PortError::IoError(io),
        }
    }
}

pub type Result<T> = std::result::Result<T, PortError>;
