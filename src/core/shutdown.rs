//! # Shutdown signal.
//!
//! [`wait_for_shutdown_signal`] completes when the process is asked to terminate.
//! [`Orchestrator::run`](crate::Orchestrator::run) awaits it between startup and graceful shutdown.
//!
//! | Platform | Signals                                 |
//! |----------|-----------------------------------------|
//! | unix     | `SIGINT`, `SIGTERM`, `SIGQUIT`, Ctrl-C  |
//! | other    | Ctrl-C                                  |

use tracing::info;

/// Waits for a termination signal and logs which one arrived.
///
/// Listeners are installed per call; an error means they could not be installed.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        res = tokio::signal::ctrl_c() => { res?; "ctrl-c" }
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    info!(signal = received, "shutdown signal received");
    Ok(())
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "ctrl-c", "shutdown signal received");
    Ok(())
}
