use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection state of a supervised port.
///
/// Exactly one supervisor instance owns this value; background tasks only
/// ever observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

/// Event delivered to supervisor subscribers.
///
/// Events are dispatched through a broadcast channel, so each subscriber
/// sees them in producer order and a slow subscriber delays only itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// The port connected (`true`) or lost its connection (`false`).
    ConnectionChanged(bool),
    /// Inbound bytes from one reader poll iteration.
    DataReceived(Vec<u8>),
    /// A non-fatal error description, for diagnostics.
    Error(String),
}

/// A discovered serial device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Stable logical name, e.g. "usb-FTDI_FT232R_USB_UART_A50285BI-if00-port0".
    pub name: String,
    /// Resolved device path, e.g. "/dev/ttyUSB0".
    pub path: String,
}

/// Timing knobs for the supervisor and its background tasks.
///
/// Defaults are tuned for physical devices; tests shrink them to keep
/// runtimes short.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Delay between closing a faulted handle and attempting to reopen it.
    pub reconnect_delay: Duration,
    /// Base cadence at which the watchdog re-checks the fault flag.
    pub watchdog_cadence: Duration,
    /// Reader sleep when no bytes are available.
    pub poll_interval: Duration,
    /// Reader sleep after an I/O failure before re-checking its loop
    /// condition.
    pub error_backoff: Duration,
    /// Bounded wait when joining the reader or watchdog; a task that
    /// ignores cancellation past this is detached, never killed.
    pub join_timeout: Duration,
    /// Broadcast channel capacity for device events.
    pub event_capacity: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(1000),
            watchdog_cadence: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_millis(1000),
            join_timeout: Duration::from_millis(5000),
            event_capacity: 256,
        }
    }
}
