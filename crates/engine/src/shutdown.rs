use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cooperative stop signal for the live loop.
///
/// The host keeps the [`ShutdownTrigger`]; the loop polls its
/// [`ShutdownToken`] at the top of each iteration and while sleeping. Nothing
/// in flight is cancelled.
pub struct Shutdown;

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, ShutdownToken) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownToken { rx })
    }
}

#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`. Returns `false` if shutdown was requested first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        let mut rx = self.rx.clone();
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        // Reduced to a bool so no watch read guard lives across an await.
        let stopped = async move { rx.wait_for(|&stop| stop).await.is_ok() };
        tokio::select! {
            _ = &mut sleep => true,
            triggered = stopped => {
                if triggered {
                    false
                } else {
                    // every trigger dropped without firing
                    sleep.await;
                    true
                }
            }
        }
    }
}
