use serde::{Deserialize, Serialize};

/// Serial stop bit selection.
///
/// `None` and `OnePointFive` are representable for callers that share
/// configuration with other systems, but the stty backend rejects both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    None,
    One,
    OnePointFive,
    Two,
}

/// Serial parity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Serial flow control handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handshake {
    None,
    XOnXOff,
    RequestToSend,
    RequestToSendXOnXOff,
}

/// Identifies a single configuration aspect for targeted re-application
/// while a port is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    BaudRate,
    MinBytesToRead,
    ReadTimeout,
    DataBits,
    StopBits,
    Handshake,
    Parity,
    RawMode,
    Drain,
}

/// Abstract serial port configuration.
///
/// Every field except `raw_mode` is tri-state: `None` means the field was
/// never explicitly set and must not be applied to the device at all. This
/// matters because applying a default over a field the caller never touched
/// would clobber whatever the terminal layer already has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<StopBits>,
    pub parity: Option<Parity>,
    pub handshake: Option<Handshake>,
    /// Raw mode disables the kernel tty line discipline (canonical input,
    /// echo, signal characters). Defaults to on, the most common use case.
    pub raw_mode: bool,
    /// Whether stty should flush pending output before applying settings.
    /// `Some(false)` emits `-drain`, recommended where supported because
    /// some stty versions hang while draining. `None` omits the flag for
    /// stty builds that do not understand it.
    pub drain: Option<bool>,
    pub min_bytes_to_read: Option<u32>,
    pub read_timeout_ms: Option<u32>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: None,
            data_bits: None,
            stop_bits: None,
            parity: None,
            handshake: None,
            raw_mode: true,
            drain: None,
            min_bytes_to_read: None,
            read_timeout_ms: None,
        }
    }
}

impl SerialConfig {
    pub fn new() -> Self {
        Self::default()
    }
}
