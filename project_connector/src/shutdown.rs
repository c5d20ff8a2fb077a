use tokio::sync::watch;

/// Process-wide stop signal. The first trigger wins; later ones are no-ops.
#[derive(Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

#[derive(Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

impl ShutdownTx {
    /// Returns true for the call that actually flipped the signal.
    pub fn trigger(&self) -> bool {
        self.0.send_if_modified(|stopped| !std::mem::replace(stopped, true))
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

impl ShutdownRx {
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|&stopped| stopped).await;
    }

    /// Non-blocking check for the logic thread.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// The raw receiver the bridge and gateway listeners take.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.0.clone()
    }
}

/// Resolve on SIGINT or SIGTERM.
pub async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }
    Ok(())
}
