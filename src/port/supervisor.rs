//! Connection supervisor: owns the port handle lifecycle and drives the
//! `Disconnected -> Connecting -> Connected -> Faulted` state machine.
//!
//! Three logical threads of control share a session: the caller
//! (configuration, connect, disconnect), the reader task and the watchdog
//! task. All open/close transitions are serialized under one lock; the
//! fault and disconnect-requested flags are plain atomics the background
//! loops may read without it, since every real transition re-validates
//! under the lock before acting.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{ConfigField, Handshake, Parity, SerialConfig, StopBits};

use super::backend::{Backend, PortIo, Reconfigure};
use super::models::{ConnectionState, DeviceEvent, SupervisorOptions};
use super::{discovery, reader, watchdog, PortError, Result};

pub(crate) type SharedHandle = Arc<Mutex<Box<dyn PortIo>>>;

/// A spawned background loop plus its cooperative stop signal.
pub(crate) struct Task {
    pub join: JoinHandle<()>,
    pub stop_tx: mpsc::Sender<()>,
}

#[derive(Default)]
pub(crate) struct Session {
    pub handle: Option<SharedHandle>,
    pub resolved_path: Option<String>,
    pub reader: Option<Task>,
    pub watchdog: Option<Task>,
}

pub(crate) struct Inner {
    pub backend: Box<dyn Backend>,
    /// The path given at construction. May contain wildcards; never changes.
    pub port_path: String,
    pub opts: SupervisorOptions,
    pub config: Mutex<SerialConfig>,
    pub session: Mutex<Session>,
    /// Serializes connect/disconnect/setter-apply state transitions.
    op_lock: Mutex<()>,
    state: StdMutex<ConnectionState>,
    pub fault: AtomicBool,
    pub disconnect_requested: AtomicBool,
    pub disposed: AtomicBool,
    pub events: broadcast::Sender<DeviceEvent>,
    reconnect_delay_ms: AtomicU64,
}

impl Inner {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state lock") = state;
    }

    pub(crate) fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.load(Ordering::SeqCst))
    }

    /// Resolves the device path, opens a handle through the backend and
    /// spawns a fresh reader for it. Shared by connect and the watchdog's
    /// reopen path; the single place that emits `ConnectionChanged(true)`.
    ///
    /// Returns `Ok(false)` when a disconnect or dispose landed while the
    /// open was in flight: the fresh handle is dropped instead of
    /// installed, since `close_session` already ran and would not see it.
    /// The flag is re-checked under the session lock so the install and
    /// the teardown cannot interleave.
    pub(crate) async fn open_session(self: &Arc<Self>) -> Result<bool> {
        let path = discovery::resolve_port_path(&self.port_path)?;
        let config = self.config.lock().await.clone();
        let handle = self.backend.open(&path, &config).await?;
        let shared: SharedHandle = Arc::new(Mutex::new(handle));
        let mut session = self.session.lock().await;
        if self.disconnect_requested.load(Ordering::SeqCst)
            || self.disposed.load(Ordering::SeqCst)
        {
            log::debug!("discarding handle for {}, disconnect requested during open", path);
            return Ok(false);
        }
        session.handle = Some(shared.clone());
        session.resolved_path = Some(path.clone());
        self.fault.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        session.reader = Some(reader::spawn(self.clone(), shared));
        log::info!("serial connected on {}", path);
        // Emitted while still holding the session lock, so a concurrent
        // teardown's ConnectionChanged(false) can never precede this one.
        let _ = self.events.send(DeviceEvent::ConnectionChanged(true));
        Ok(true)
    }

    /// Tears down the session handle and the reader, and optionally the
    /// watchdog. Emits `ConnectionChanged(false)` when a handle actually
    /// existed. Does not touch the connection state; callers decide
    /// between Disconnected and Faulted.
    pub(crate) async fn close_session(&self, stop_watchdog: bool) {
        let (handle, reader_task, watchdog_task) = {
            let mut session = self.session.lock().await;
            let watchdog_task = if stop_watchdog {
                session.watchdog.take()
            } else {
                None
            };
            session.resolved_path = None;
            (session.handle.take(), session.reader.take(), watchdog_task)
        };

        if let Some(task) = reader_task {
            self.stop_task(task, "reader").await;
        }
        if let Some(task) = watchdog_task {
            self.stop_task(task, "watchdog").await;
        }

        // Dropping the last Arc closes the device. A detached reader may
        // still hold a clone; the handle then closes when it finally
        // observes its stop signal, bounding the leak to one iteration.
        if handle.is_some() {
            let _ = self.events.send(DeviceEvent::ConnectionChanged(false));
        }
    }

    /// Fault path used by the watchdog: close the handle and stop the
    /// reader, leaving the watchdog itself running.
    pub(crate) async fn handle_fault(&self) {
        let (handle, reader_task) = {
            let mut session = self.session.lock().await;
            session.resolved_path = None;
            (session.handle.take(), session.reader.take())
        };
        if let Some(task) = reader_task {
            self.stop_task(task, "reader").await;
        }
        self.set_state(ConnectionState::Faulted);
        if handle.is_some() {
            log::warn!("serial connection on {} faulted", self.port_path);
            let _ = self.events.send(DeviceEvent::ConnectionChanged(false));
        }
    }

    /// Signals a task to stop and waits for it within the join timeout.
    /// A task that does not come back in time is detached, never aborted;
    /// it must treat the closed handle as an ordinary I/O failure.
    async fn stop_task(&self, task: Task, name: &str) {
        let _ = task.stop_tx.send(()).await;
        if timeout(self.opts.join_timeout, task.join).await.is_err() {
            log::warn!(
                "{} task did not stop within {:?}, detaching",
                name,
                self.opts.join_timeout
            );
        }
    }
}

async fn connect_locked(inner: &Arc<Inner>) -> Result<bool> {
    if inner.disposed.load(Ordering::SeqCst) {
        return Err(PortError::Disposed);
    }
    if inner.disconnect_requested.load(Ordering::SeqCst) {
        return Ok(false);
    }

    // Defensively tear down any previous session, watchdog included.
    inner.close_session(true).await;
    inner.set_state(ConnectionState::Connecting);

    match inner.open_session().await {
        Ok(true) => {
            let mut session = inner.session.lock().await;
            if session.watchdog.is_none() {
                session.watchdog = Some(watchdog::spawn(inner.clone()));
            }
            Ok(true)
        }
        Ok(false) => {
            // A disconnect overtook the open; report it like any other
            // disconnect-in-flight connect attempt.
            inner.set_state(ConnectionState::Disconnected);
            Ok(false)
        }
        Err(err) => {
            inner.set_state(ConnectionState::Disconnected);
            Err(err)
        }
    }
}

/// Sleeps for `duration` unless the stop signal arrives first. Returns
/// true when the loop should exit. A dropped sender counts as a stop, so
/// a detached task still winds down on its next sleep.
pub(crate) async fn sleep_or_stop(duration: Duration, stop_rx: &mut mpsc::Receiver<()>) -> bool {
    tokio::select! {
        _ = stop_rx.recv() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Non-blocking stop check for loop tops.
pub(crate) fn stop_requested(stop_rx: &mut mpsc::Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(mpsc::error::TryRecvError::Empty))
}

/// Supervised serial connection.
///
/// Owns at most one open handle at any time. Callers observe connection
/// changes through [`DeviceEvent`]s rather than exceptions from the
/// background loops; a faulted connection retries silently and
/// indefinitely at the reconnect delay until disconnected.
pub struct SerialSupervisor {
    inner: Arc<Inner>,
}

impl SerialSupervisor {
    /// Creates a supervisor for `port_path` over the given backend. The
    /// path may contain wildcards (`/dev/ttyUSB*`), resolved at connect
    /// time to the lexicographically-first match.
    pub fn new(backend: Box<dyn Backend>, port_path: impl Into<String>) -> Self {
        Self::with_options(backend, port_path, SupervisorOptions::default())
    }

    pub fn with_options(
        backend: Box<dyn Backend>,
        port_path: impl Into<String>,
        opts: SupervisorOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(opts.event_capacity);
        let reconnect_delay_ms = opts.reconnect_delay.as_millis() as u64;
        Self {
            inner: Arc::new(Inner {
                backend,
                port_path: port_path.into(),
                opts,
                config: Mutex::new(SerialConfig::default()),
                session: Mutex::new(Session::default()),
                op_lock: Mutex::new(()),
                state: StdMutex::new(ConnectionState::Disconnected),
                fault: AtomicBool::new(false),
                disconnect_requested: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                events,
                reconnect_delay_ms: AtomicU64::new(reconnect_delay_ms),
            }),
        }
    }

    /// Supervisor over the stty backend. Fails where stty is absent.
    pub fn stty(port_path: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Box::new(super::SttyBackend::new()?), port_path))
    }

    /// Supervisor over the native serial driver backend.
    pub fn native(port_path: impl Into<String>) -> Self {
        Self::new(Box::new(super::NativeBackend::new()), port_path)
    }

    /// Opens the port and starts the reader and watchdog tasks.
    ///
    /// Returns `Ok(false)` without doing anything when a disconnect is in
    /// flight. Configuration and device errors surface here synchronously;
    /// once connected, I/O failures are reported through events only.
    pub async fn connect(&self) -> Result<bool> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(PortError::Disposed);
        }
        if self.inner.disconnect_requested.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let _op = self.inner.op_lock.lock().await;
        connect_locked(&self.inner).await
    }

    /// Closes the port and stops both background tasks, each with a
    /// bounded join. Idempotent; never fails. Blocks any concurrent
    /// auto-reconnect for its duration.
    pub async fn disconnect(&self) {
        if self.inner.disconnect_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let _op = self.inner.op_lock.lock().await;
        self.inner.close_session(true).await;
        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.disconnect_requested.store(false, Ordering::SeqCst);
        log::info!("serial disconnected on {}", self.inner.port_path);
    }

    /// Permanently shuts the supervisor down. `disconnect` still succeeds
    /// afterwards; `connect` fails with [`PortError::Disposed`].
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect().await;
    }

    /// Subscribes to connection, data and error events. Events are
    /// delivered in producer order; subscribe before `connect` to observe
    /// the initial `ConnectionChanged(true)`.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
            && !self.inner.disconnect_requested.load(Ordering::SeqCst)
    }

    /// The path given at construction, wildcards included.
    pub fn path_pattern(&self) -> &str {
        &self.inner.port_path
    }

    /// The concrete device path of the current session, if open.
    pub async fn port_name(&self) -> Option<String> {
        self.inner.session.lock().await.resolved_path.clone()
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> SerialConfig {
        self.inner.config.lock().await.clone()
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.inner.reconnect_delay()
    }

    pub fn set_reconnect_delay(&self, delay: Duration) {
        self.inner
            .reconnect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Writes bytes to the open port. Writes proceed concurrently with
    /// the reader's inbound polling; the handle mutex guards the driver
    /// object itself.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(PortError::Disposed);
        }
        if !self.is_connected() {
            return Err(PortError::NotOpen);
        }
        let handle = self
            .inner
            .session
            .lock()
            .await
            .handle
            .clone()
            .ok_or(PortError::NotOpen)?;
        // Driver writes block; run them on the blocking pool.
        let buf = data.to_vec();
        let written = tokio::task::spawn_blocking(move || {
            let mut port = handle.blocking_lock();
            port.write_all(&buf).and_then(|()| port.flush())
        })
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        match written {
            Ok(()) => {
                log::debug!("sent {} bytes", data.len());
                Ok(())
            }
            Err(err) => {
                log::error!("serial write failed on {}: {}", self.inner.port_path, err);
                Err(err.into())
            }
        }
    }

    pub async fn send_str(&self, message: &str) -> Result<()> {
        self.send(message.as_bytes()).await
    }

    // Configuration setters. Each records the field as explicitly set;
    // while connected, only the changed aspect is re-applied to the
    // device (raw-mode toggles force a full re-apply, and backends
    // without live reconfiguration reopen the port).

    pub async fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        self.update_field(ConfigField::BaudRate, |c| c.baud_rate = Some(baud_rate))
            .await
    }

    pub async fn set_data_bits(&self, data_bits: u8) -> Result<()> {
        self.update_field(ConfigField::DataBits, |c| c.data_bits = Some(data_bits))
            .await
    }

    pub async fn set_stop_bits(&self, stop_bits: StopBits) -> Result<()> {
        self.update_field(ConfigField::StopBits, |c| c.stop_bits = Some(stop_bits))
            .await
    }

    pub async fn set_parity(&self, parity: Parity) -> Result<()> {
        self.update_field(ConfigField::Parity, |c| c.parity = Some(parity))
            .await
    }

    pub async fn set_handshake(&self, handshake: Handshake) -> Result<()> {
        self.update_field(ConfigField::Handshake, |c| c.handshake = Some(handshake))
            .await
    }

    pub async fn set_raw_mode(&self, raw_mode: bool) -> Result<()> {
        self.update_field(ConfigField::RawMode, |c| c.raw_mode = raw_mode)
            .await
    }

    /// Tri-state: `Some(false)` is recommended where stty supports
    /// `[-]drain`; `None` omits the flag entirely.
    pub async fn set_drain(&self, drain: Option<bool>) -> Result<()> {
        self.update_field(ConfigField::Drain, |c| c.drain = drain).await
    }

    pub async fn set_min_bytes_to_read(&self, min: u32) -> Result<()> {
        self.update_field(ConfigField::MinBytesToRead, |c| c.min_bytes_to_read = Some(min))
            .await
    }

    pub async fn set_read_timeout(&self, timeout_ms: u32) -> Result<()> {
        self.update_field(ConfigField::ReadTimeout, |c| c.read_timeout_ms = Some(timeout_ms))
            .await
    }

    async fn update_field(
        &self,
        field: ConfigField,
        mutate: impl FnOnce(&mut SerialConfig),
    ) -> Result<()> {
        let _op = self.inner.op_lock.lock().await;
        {
            let mut config = self.inner.config.lock().await;
            mutate(&mut config);
        }

        if !self.is_connected() {
            return Ok(());
        }
        let Some(path) = self.inner.session.lock().await.resolved_path.clone() else {
            return Ok(());
        };
        let config = self.inner.config.lock().await.clone();
        match self.inner.backend.reconfigure(&path, &config, field).await? {
            Reconfigure::Applied => Ok(()),
            Reconfigure::ReopenRequired => {
                log::debug!("port parameters changed, reopening {}", path);
                connect_locked(&self.inner).await.map(|_| ())
            }
        }
    }

    // Modem line state and buffer control, passed through to the driver.

    pub async fn set_dtr(&self, level: bool) -> Result<()> {
        self.with_handle(move |port| port.set_dtr(level)).await
    }

    pub async fn set_rts(&self, level: bool) -> Result<()> {
        self.with_handle(move |port| port.set_rts(level)).await
    }

    pub async fn read_cts(&self) -> Result<bool> {
        self.with_handle(|port| port.read_cts()).await
    }

    pub async fn read_dsr(&self) -> Result<bool> {
        self.with_handle(|port| port.read_dsr()).await
    }

    pub async fn read_dcd(&self) -> Result<bool> {
        self.with_handle(|port| port.read_dcd()).await
    }

    pub async fn read_ri(&self) -> Result<bool> {
        self.with_handle(|port| port.read_ri()).await
    }

    /// Discards any bytes waiting in the receive buffer.
    pub async fn discard_in_buffer(&self) -> Result<()> {
        self.with_handle(|port| port.discard_in_buffer()).await
    }

    /// Discards any bytes pending in the transmit buffer.
    pub async fn discard_out_buffer(&self) -> Result<()> {
        self.with_handle(|port| port.discard_out_buffer()).await
    }

    async fn with_handle<R>(
        &self,
        f: impl FnOnce(&mut dyn PortIo) -> io::Result<R> + Send + 'static,
    ) -> Result<R>
    where
        R: Send + 'static,
    {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(PortError::Disposed);
        }
        let handle = self
            .inner
            .session
            .lock()
            .await
            .handle
            .clone()
            .ok_or(PortError::NotOpen)?;
        tokio::task::spawn_blocking(move || {
            let mut port = handle.blocking_lock();
            f(port.as_mut())
        })
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
        .map_err(PortError::from)
    }
}

impl Drop for SerialSupervisor {
    fn drop(&mut self) {
        // Best effort: nudge the background loops so a supervisor dropped
        // without disconnect() does not keep its tasks looping.
        if let Ok(mut session) = self.inner.session.try_lock() {
            for task in [session.reader.take(), session.watchdog.take()]
                .into_iter()
                .flatten()
            {
                let _ = task.stop_tx.try_send(());
            }
        }
    }
}
