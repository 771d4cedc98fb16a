// Termination signal handling
//
// The first signal only requests a cooperative stop. Shutdown itself is driven by
// whoever waits on the stop flag. A signal arriving once a stop is already
// pending exits the process, so a stuck shutdown can still be interrupted.

use crate::lifecycle::Subsystem;
use crate::stop::StopFlag;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Exit status used when a repeated signal cuts shutdown short
pub const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// A cooperative stop was requested
    Stop,
    /// A stop was already pending; the process should exit now
    ForceExit,
}

/// Decide what a received signal means for the process
pub fn on_signal(stop: &StopFlag, signal: &str) -> SignalAction {
    if stop.stop() {
        info!(signal, "Termination signal received, stopping");
        SignalAction::Stop
    } else {
        error!(signal, "Signal received while stopping, exiting immediately");
        SignalAction::ForceExit
    }
}

fn apply(action: SignalAction) {
    if action == SignalAction::ForceExit {
        std::process::exit(FORCED_EXIT_CODE);
    }
}

pub struct SignalHandler {
    stop: StopFlag,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SignalHandler {
    pub fn new(stop: StopFlag) -> Self {
        Self {
            stop,
            listener: Mutex::new(None),
        }
    }

    /// Register the handlers and spawn the listener.
    ///
    /// Registration happens before this returns, so a signal arriving right after
    /// startup is not lost.
    #[cfg(unix)]
    pub fn install(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let stop = self.stop.clone();

        self.replace_listener(tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    _ = sigint.recv() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                };
                apply(on_signal(&stop, name));
            }
        }));
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install(&self) -> std::io::Result<()> {
        let stop = self.stop.clone();
        self.replace_listener(tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for ctrl-c");
                    return;
                }
                apply(on_signal(&stop, "ctrl_c"));
            }
        }));
        Ok(())
    }

    fn replace_listener(&self, handle: JoinHandle<()>) {
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            warn!("Signal handlers installed twice, replacing the previous listener");
            previous.abort();
        }
    }
}

#[async_trait]
impl Subsystem for SignalHandler {
    async fn start(&self) -> anyhow::Result<()> {
        self.install()?;
        info!("Termination signal handlers installed");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        Ok(())
    }
}
