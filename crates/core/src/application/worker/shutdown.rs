// Worker Shutdown / Pause Tokens
//
// Pause, resume, and close are all expressed as message passing over a
// `tokio::sync::watch` channel rather than a bare shared flag, so every
// suspension point in the worker loop can `select!` on a wake-up instead
// of polling (spec.md 9: "cooperative async control ... never as shared
// mutable flags without a wake-up channel").

use tokio::sync::watch;

/// Shutdown signal for graceful termination.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&mut self) {
        let _ = self.rx.changed().await;
    }
}

pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

/// Local pause signal (spec.md 4.3: `worker.pause()`/`resume()`).
/// Distinct from `ShutdownToken` because pausing must let in-flight
/// slots drain and then hold, while closing eventually gives up and
/// releases the connection.
#[derive(Clone)]
pub struct PauseToken {
    rx: watch::Receiver<bool>,
}

impl PauseToken {
    pub fn is_paused(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves as soon as the flag flips to the opposite of `waiting_for`.
    pub async fn wait_until(&mut self, waiting_for: bool) {
        while *self.rx.borrow() != waiting_for {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub struct PauseSender {
    tx: watch::Sender<bool>,
}

impl PauseSender {
    pub fn pause(&self) {
        let _ = self.tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }
}

pub fn pause_channel() -> (PauseSender, PauseToken) {
    let (tx, rx) = watch::channel(false);
    (PauseSender { tx }, PauseToken { rx })
}
