use tokio::sync::watch;

/// Coordinates graceful shutdown of background handlers.
///
/// Unlike a one-shot broadcast, the signal is level-triggered: a handler that
/// subscribes after `shutdown()` still observes it.
///
/// ```no_run
/// use offline_upload_queue::shutdown::ShutdownCoordinator;
///
/// # async fn example() {
/// let coordinator = ShutdownCoordinator::new();
/// let mut signal = coordinator.subscribe();
///
/// tokio::spawn(async move {
///     signal.wait().await;
///     // clean up
/// });
///
/// coordinator.shutdown();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: watch::Sender<bool>,
}

/// Receiving half handed to each background task
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Signal every subscriber, current and future
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Re-arm after a shutdown so handlers can be started again
    pub fn reset(&self) {
        self.shutdown_tx.send_replace(false);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn has_subscribers(&self) -> bool {
        self.shutdown_tx.receiver_count() > 0
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Resolves once shutdown has been requested
    pub async fn wait(&mut self) {
        // An error means the coordinator was dropped, which also ends the task
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }
}
