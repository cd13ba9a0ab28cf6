//! Connection watchdog loop.
//!
//! One watchdog runs per session. It observes the fault flag the reader
//! raises, closes the dead handle and reopens it after the reconnect
//! delay, then keeps retrying at the base cadence until the port comes
//! back or a disconnect is requested. Reopen failures are swallowed and
//! logged; callers only ever see recovery through events.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::supervisor::{sleep_or_stop, stop_requested, Inner, Task};

pub(crate) fn spawn(inner: Arc<Inner>) -> Task {
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let join = tokio::spawn(run(inner, stop_rx));
    Task { join, stop_tx }
}

async fn run(inner: Arc<Inner>, mut stop_rx: mpsc::Receiver<()>) {
    log::debug!("connection watchdog started for {}", inner.port_path);

    loop {
        if inner.disconnect_requested.load(Ordering::SeqCst) || stop_requested(&mut stop_rx) {
            break;
        }

        if inner.fault.load(Ordering::SeqCst) {
            inner.handle_fault().await;

            if sleep_or_stop(inner.reconnect_delay(), &mut stop_rx).await {
                break;
            }

            if !inner.disconnect_requested.load(Ordering::SeqCst) {
                match inner.open_session().await {
                    Ok(true) => {
                        log::info!("serial connection on {} restored", inner.port_path);
                    }
                    // A disconnect overtook the open; the check below
                    // ends the loop.
                    Ok(false) => {}
                    Err(err) => {
                        // Fault stays set; the next iteration retries.
                        log::warn!("reconnect attempt on {} failed: {}", inner.port_path, err);
                    }
                }
            }
        }

        if inner.disconnect_requested.load(Ordering::SeqCst) {
            break;
        }
        if sleep_or_stop(inner.opts.watchdog_cadence, &mut stop_rx).await {
            break;
        }
    }

    log::debug!("connection watchdog stopped for {}", inner.port_path);
}
