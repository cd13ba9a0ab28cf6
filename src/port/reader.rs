//! Background reader loop.
//!
//! Polling is used because neither backend exposes readiness
//! notification on every platform. One loop runs per connected session;
//! it never propagates errors to the caller, it raises the shared fault
//! flag and lets the watchdog drive recovery.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::backend::PortIo;
use super::models::{ConnectionState, DeviceEvent};
use super::supervisor::{sleep_or_stop, stop_requested, Inner, SharedHandle, Task};

/// Bound on zero-byte reads of a buffer the driver claimed had data.
const READ_RETRY_LIMIT: usize = 100;

pub(crate) fn spawn(inner: Arc<Inner>, handle: SharedHandle) -> Task {
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let join = tokio::spawn(run(inner, handle, stop_rx));
    Task { join, stop_tx }
}

enum Step {
    Idle,
    Data(Vec<u8>),
    Failed(io::Error),
}

async fn run(inner: Arc<Inner>, handle: SharedHandle, mut stop_rx: mpsc::Receiver<()>) {
    log::debug!("reader task started for {}", inner.port_path);

    loop {
        if stop_requested(&mut stop_rx) {
            break;
        }
        if inner.state() != ConnectionState::Connected || inner.fault.load(Ordering::SeqCst) {
            break;
        }

        // Driver calls block for up to the configured read timeout, so
        // the poll runs on the blocking pool instead of an async worker.
        let step = {
            let handle = handle.clone();
            match tokio::task::spawn_blocking(move || poll_port(&handle)).await {
                Ok(step) => step,
                Err(err) => Step::Failed(io::Error::new(io::ErrorKind::Other, err)),
            }
        };

        match step {
            Step::Data(buf) => {
                let _ = inner.events.send(DeviceEvent::DataReceived(buf));
            }
            Step::Idle => {
                if sleep_or_stop(inner.opts.poll_interval, &mut stop_rx).await {
                    break;
                }
            }
            Step::Failed(err) => {
                log::warn!("serial read failed on {}: {}", inner.port_path, err);
                inner.fault.store(true, Ordering::SeqCst);
                let _ = inner.events.send(DeviceEvent::Error(err.to_string()));
                if sleep_or_stop(inner.opts.error_backoff, &mut stop_rx).await {
                    break;
                }
            }
        }
    }

    log::debug!("reader task stopped for {}", inner.port_path);
}

fn poll_port(handle: &SharedHandle) -> Step {
    let mut port = handle.blocking_lock();
    match port.available() {
        Ok(0) => Step::Idle,
        Ok(available) => {
            let mut buf = vec![0u8; available];
            match read_some(port.as_mut(), &mut buf) {
                Ok(0) => Step::Idle,
                Ok(count) => {
                    buf.truncate(count);
                    Step::Data(buf)
                }
                Err(err) => Step::Failed(err),
            }
        }
        Err(err) => Step::Failed(err),
    }
}

/// Retries a read until it yields bytes or fails hard. Driver-level
/// timeouts count as retries; persistent emptiness is treated as idle.
fn read_some(port: &mut dyn PortIo, buf: &mut [u8]) -> io::Result<usize> {
    for _ in 0..READ_RETRY_LIMIT {
        match port.read(buf) {
            Ok(0) => continue,
            Ok(count) => return Ok(count),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(0)
}
