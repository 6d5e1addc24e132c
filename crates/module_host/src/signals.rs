//! Signal handling for graceful host shutdown.
//!
//! A termination signal is turned into a `shutdown_requested` event that
//! modules may cancel. A second signal after a veto shuts down regardless.

use module_api::{CoreEvents, ShutdownRequest};
use std::io;
use tokio::signal;
use tracing::{info, warn};

/// Sender name used when the host publishes shutdown requests.
pub const HOST_SENDER: &str = "module_host";

/// Listens for termination signals (SIGINT and SIGTERM on Unix, Ctrl+C
/// elsewhere).
pub struct SignalListener {
    #[cfg(unix)]
    sigint: signal::unix::Signal,
    #[cfg(unix)]
    sigterm: signal::unix::Signal,
}

impl SignalListener {
    pub fn new() -> io::Result<Self> {
        #[cfg(unix)]
        {
            use signal::unix::{signal, SignalKind};
            Ok(Self {
                sigint: signal(SignalKind::interrupt())?,
                sigterm: signal(SignalKind::terminate())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the next signal and returns its name.
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.sigint.recv() => Ok("SIGINT"),
                _ = self.sigterm.recv() => Ok("SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            Ok("Ctrl+C")
        }
    }
}

/// Decides whether a shutdown request goes ahead.
#[derive(Debug, Default)]
pub struct ShutdownGate {
    vetoed: bool,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a shutdown request. Returns true if the host should stop.
    ///
    /// The first request can be canceled by a module; any request after a
    /// veto is forced.
    pub fn request(&mut self, events: &CoreEvents, reason: &str) -> bool {
        let mut request = ShutdownRequest::new(reason);
        if events.shutdown_requested.publish(HOST_SENDER, &mut request) {
            return true;
        }

        if self.vetoed {
            warn!("Shutdown vetoed again, forcing shutdown");
            return true;
        }

        self.vetoed = true;
        warn!("🛑 Shutdown canceled by a module, signal again to force");
        false
    }
}

/// Waits until a termination signal is accepted.
pub async fn wait_for_shutdown(events: &CoreEvents) -> io::Result<()> {
    let mut listener = SignalListener::new()?;
    let mut gate = ShutdownGate::new();

    loop {
        let name = listener.recv().await?;
        info!("📡 Received {}", name);
        if gate.request(events, name) {
            return Ok(());
        }
    }
}
