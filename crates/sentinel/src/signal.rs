use std::io;

/// Resolves when the process receives an interrupt. On Unix this is
/// SIGINT or SIGTERM; elsewhere Ctrl-C.
#[cfg(unix)]
pub async fn shutdown() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn shutdown() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
