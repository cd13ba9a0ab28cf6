//! Resilient serial port lifecycle management.
//!
//! ttyport keeps a serial channel alive: it translates an abstract
//! configuration into stty directives (or native driver settings),
//! supervises the connection with automatic reconnect, and streams
//! inbound bytes to subscribers as events.

pub mod config;
pub mod port;
pub mod stty;

pub use config::{ConfigField, Handshake, Parity, SerialConfig, StopBits};
pub use port::{
    Backend, ConnectionState, DeviceEvent, NativeBackend, PortError, PortInfo, PortIo,
    Reconfigure, SerialSupervisor, SttyBackend, SupervisorOptions,
};
