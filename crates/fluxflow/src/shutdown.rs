use tokio::sync::watch;

/// Watch-based stop flag shared by both schedulers. Observing the flag
/// never blocks; waiting on it wakes as soon as the signal arrives.
#[derive(Clone)]
pub struct ShutdownController {
    receiver: watch::Receiver<bool>,
}

pub struct ShutdownSignal(watch::Sender<bool>);

impl ShutdownController {
    /// Reacts to SIGINT/SIGTERM from the OS.
    pub fn new_shutdown_on_signal() -> Self {
        let (sender, receiver) = watch::channel(false);
        tokio::spawn(Self::wait_for_signal(ShutdownSignal(sender)));
        Self { receiver }
    }

    /// A controller driven manually, for tests.
    pub fn new_manual_shutdown() -> (ShutdownSignal, Self) {
        let (sender, receiver) = watch::channel(false);
        (ShutdownSignal(sender), Self { receiver })
    }

    async fn wait_for_signal(shutdown: ShutdownSignal) {
        #[cfg(unix)]
        {
            use tokio::{signal, signal::unix};
            let mut sigterm =
                unix::signal(unix::SignalKind::terminate()).expect("failed to install handler");
            let ctrl_c = signal::ctrl_c();
            tokio::select! {
                _ = ctrl_c => tracing::info!("received SIGINT"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            tracing::info!("received SIGINT");
        }

        shutdown.shutdown();
    }

    /// Non-blocking check whether the stop signal arrived.
    pub fn should_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once the stop signal arrives.
    pub async fn wait(&mut self) {
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }
}

impl ShutdownSignal {
    pub fn shutdown(self) {
        let _ = self.0.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_shutdown_flips_the_flag() {
        let (signal, mut controller) = ShutdownController::new_manual_shutdown();
        assert!(!controller.should_shutdown());
        signal.shutdown();
        controller.wait().await;
        assert!(controller.should_shutdown());
    }
}
