//! Stop signalling for the bridge
//!
//! A `watch` channel carries a single "stop" flag from whoever decides the
//! bridge should stop (an OS signal, a test, an embedding agent) to the
//! ingestion server's graceful-shutdown hook.

use tokio::sync::watch;
use tracing::info;

/// Receiving side; clone it into every component that must stop
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once stop has been requested
    ///
    /// Dropping the controller counts as a stop request.
    pub async fn wait(&mut self) {
        // wait_for checks the current value first, so a stop sent earlier is not missed
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }

    /// Owned variant of [`wait`](Self::wait) for APIs that need a `'static` future
    pub async fn wait_owned(mut self) {
        self.wait().await
    }

    /// Non-blocking check
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Sending side; one per bridge
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Request a stop; repeated calls are no-ops
    pub fn shutdown(&self) {
        let changed = self.sender.send_if_modified(|stop| !std::mem::replace(stop, true));
        if changed {
            info!("Stop requested");
        }
    }

    /// A fresh receiver for this controller
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Create a controller/signal pair, initially not stopped
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT and return the signal name
///
/// # Panics
/// Panics if the signal handlers cannot be registered.
#[cfg(unix)]
pub async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::error;

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to register SIGTERM handler");
            panic!("Cannot register SIGTERM handler: {}", e);
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to register SIGINT handler");
            panic!("Cannot register SIGINT handler: {}", e);
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

/// Wait for Ctrl+C (non-unix)
///
/// # Panics
/// Panics if the Ctrl+C handler cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> &'static str {
    use tracing::error;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to wait for Ctrl+C");
        panic!("Cannot wait for Ctrl+C: {}", e);
    }
    "CTRL_C"
}
