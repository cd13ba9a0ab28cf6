//! Device I/O backends.
//!
//! Two strategies implement the same contract: [`SttyBackend`] configures
//! the tty through the external stty tool and can re-apply a single
//! changed setting on a live port, while [`NativeBackend`] configures
//! through the serial driver at open time and requires a reopen for any
//! change. A deployment picks one backend per supervisor; backends are
//! never swapped within a running session.

use std::io;
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort};

use crate::config::{ConfigField, Handshake, Parity, SerialConfig, StopBits};
use crate::stty;

use super::{PortError, Result};

/// Fallback read timeout for the underlying driver when the caller never
/// set one. The reader polls `available()` first, so this only bounds the
/// rare read that races with a device disappearing.
const DEFAULT_READ_TIMEOUT_MS: u32 = 1000;

/// Byte-level contract of an open serial handle.
///
/// The supervisor owns exactly one of these at a time and shares it with
/// the reader task behind a mutex. All methods map directly onto the
/// serial driver.
pub trait PortIo: Send {
    /// Number of bytes waiting in the receive buffer.
    fn available(&mut self) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn discard_in_buffer(&mut self) -> io::Result<()>;

    fn discard_out_buffer(&mut self) -> io::Result<()>;

    // Modem line state, outside the reconnect/read core.
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;
    fn set_rts(&mut self, level: bool) -> io::Result<()>;
    fn read_cts(&mut self) -> io::Result<bool>;
    fn read_dsr(&mut self) -> io::Result<bool>;
    fn read_dcd(&mut self) -> io::Result<bool>;
    fn read_ri(&mut self) -> io::Result<bool>;
}

/// Outcome of a live reconfiguration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigure {
    /// The change was applied to the open port in place.
    Applied,
    /// The backend cannot change settings on a live port; the supervisor
    /// must close and reopen the handle.
    ReopenRequired,
}

/// One device-I/O strategy. Opening produces a handle configured per the
/// given settings; reconfiguring applies a single changed aspect to a
/// port that is already open.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn open(&self, path: &str, config: &SerialConfig) -> Result<Box<dyn PortIo>>;

    async fn reconfigure(
        &self,
        path: &str,
        config: &SerialConfig,
        changed: ConfigField,
    ) -> Result<Reconfigure>;
}

/// Handle wrapping the serial driver's port object.
struct DriverHandle {
    port: Box<dyn SerialPort>,
}

impl DriverHandle {
    fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

fn driver_io_err(err: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

impl PortIo for DriverHandle {
    fn available(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(driver_io_err)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn discard_in_buffer(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(driver_io_err)
    }

    fn discard_out_buffer(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Output).map_err(driver_io_err)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(driver_io_err)
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_request_to_send(level)
            .map_err(driver_io_err)
    }

    fn read_cts(&mut self) -> io::Result<bool> {
        self.port.read_clear_to_send().map_err(driver_io_err)
    }

    fn read_dsr(&mut self) -> io::Result<bool> {
        self.port.read_data_set_ready().map_err(driver_io_err)
    }

    fn read_dcd(&mut self) -> io::Result<bool> {
        self.port.read_carrier_detect().map_err(driver_io_err)
    }

    fn read_ri(&mut self) -> io::Result<bool> {
        self.port.read_ring_indicator().map_err(driver_io_err)
    }
}

fn read_timeout(config: &SerialConfig) -> Duration {
    let ms = match config.read_timeout_ms {
        Some(ms) if ms > 0 => ms,
        _ => DEFAULT_READ_TIMEOUT_MS,
    };
    Duration::from_millis(u64::from(ms))
}

/// Backend that drives configuration through `/bin/stty`.
///
/// The device file is opened through the serial driver for byte-level I/O,
/// then the full directive set is applied on top; stty settings win over
/// whatever the driver established at open.
pub struct SttyBackend;

impl SttyBackend {
    /// Fails with [`PortError::PlatformNotSupported`] when stty is absent.
    pub fn new() -> Result<Self> {
        if !stty::is_platform_compatible() {
            return Err(PortError::PlatformNotSupported);
        }
        Ok(Self)
    }
}

#[async_trait::async_trait]
impl Backend for SttyBackend {
    async fn open(&self, path: &str, config: &SerialConfig) -> Result<Box<dyn PortIo>> {
        // Validate the directive set before touching the device, so a bad
        // configuration never leaves a half-opened port behind.
        let directives = stty::params::full_params(config)?;

        // The driver insists on a baud at open; stty re-applies the real
        // one right after, so this value only matters when baud was never
        // set at all.
        let baud = config.baud_rate.unwrap_or(9600);
        let port = serialport::new(path, baud)
            .timeout(read_timeout(config))
            .open()?;

        stty::apply_directives(path, &directives).await?;

        log::info!("opened {} via stty backend", path);
        Ok(Box::new(DriverHandle::new(port)))
    }

    async fn reconfigure(
        &self,
        path: &str,
        config: &SerialConfig,
        changed: ConfigField,
    ) -> Result<Reconfigure> {
        let directives = stty::params::field_params(config, changed)?;
        if directives.is_empty() {
            return Ok(Reconfigure::Applied);
        }
        stty::apply_directives(path, &directives).await?;
        Ok(Reconfigure::Applied)
    }
}

/// Backend that configures entirely through the native serial driver.
#[derive(Default)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

fn native_data_bits(bits: u8) -> Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(PortError::Config(format!(
            "data bits must be between 5 and 8, got {}",
            other
        ))),
    }
}

fn native_stop_bits(stop: StopBits) -> Result<serialport::StopBits> {
    match stop {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::None | StopBits::OnePointFive => Err(PortError::Config(format!(
            "stop bits cannot be set to {:?}",
            stop
        ))),
    }
}

fn native_parity(parity: Parity) -> Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(PortError::Config(format!(
            "the native driver does not support {:?} parity",
            parity
        ))),
    }
}

fn native_flow_control(handshake: Handshake) -> FlowControl {
    match handshake {
        Handshake::None => FlowControl::None,
        Handshake::XOnXOff => FlowControl::Software,
        // The driver cannot combine hardware and software flow control;
        // hardware wins for the combined setting.
        Handshake::RequestToSend | Handshake::RequestToSendXOnXOff => FlowControl::Hardware,
    }
}

#[async_trait::async_trait]
impl Backend for NativeBackend {
    async fn open(&self, path: &str, config: &SerialConfig) -> Result<Box<dyn PortIo>> {
        let mut builder =
            serialport::new(path, config.baud_rate.unwrap_or(9600)).timeout(read_timeout(config));

        if let Some(bits) = config.data_bits {
            builder = builder.data_bits(native_data_bits(bits)?);
        }
        if let Some(stop) = config.stop_bits {
            builder = builder.stop_bits(native_stop_bits(stop)?);
        }
        if let Some(parity) = config.parity {
            builder = builder.parity(native_parity(parity)?);
        }
        if let Some(handshake) = config.handshake {
            builder = builder.flow_control(native_flow_control(handshake));
        }

        let port = builder.open()?;
        log::info!("opened {} via native backend", path);
        Ok(Box::new(DriverHandle::new(port)))
    }

    async fn reconfigure(
        &self,
        _path: &str,
        _config: &SerialConfig,
        _changed: ConfigField,
    ) -> Result<Reconfigure> {
        Ok(Reconfigure::ReopenRequired)
    }
}
