//! Shared running flag observed by every loop

use tokio::sync::watch;

/// Read side of the server's running flag.
///
/// Cloned into every accept loop, connection and tunnel. The flag only ever
/// goes from `true` to `false`.
#[derive(Debug, Clone)]
pub struct RunningFlag {
    rx: watch::Receiver<bool>,
}

impl RunningFlag {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A flag paired with its sender, starting out as running
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(true);
        (tx, Self::new(rx))
    }

    pub fn is_running(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the server stops (or the sender is gone)
    pub async fn stopped(&mut self) {
        // Err means the sender was dropped, which also ends the server
        let _ = self.rx.wait_for(|running| !*running).await;
    }
}
