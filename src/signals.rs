use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{error, info, warn};

use crate::error::ColMigrateError;

/// Exit status used when a second signal arrives while the first is being honoured.
const FORCED_EXIT_CODE: i32 = 130;

/// Shared cancellation flag set by the signal listener and polled by the driver.
#[derive(Clone, Default, Debug)]
pub struct InterruptToken(Arc<AtomicBool>);

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `Err(Interrupted)` once an interrupt has been requested
    pub fn check(&self) -> Result<(), ColMigrateError> {
        if self.is_interrupted() {
            Err(ColMigrateError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Spawns a background thread that waits for SIGINT or SIGTERM.
///
/// The first signal sets `token` so the driver stops at its next check. A second
/// signal terminates the process immediately.
pub fn install_signal_listener(token: InterruptToken) -> Result<(), ColMigrateError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signal-listener".into())
        .spawn(move || {
            rt.block_on(async move {
                loop {
                    if let Err(e) = shutdown_signal().await {
                        error!("Failed to listen for termination signals: {}", e);
                        return;
                    }

                    if token.is_interrupted() {
                        warn!("Second termination signal received, exiting immediately");
                        println!("Exiting...");
                        std::process::exit(FORCED_EXIT_CODE);
                    }

                    info!("Termination signal received, stopping after the current row");
                    token.interrupt();
                }
            })
        })?;

    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Received SIGINT (Ctrl+C)");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
