//! Two-strike cooperative cancellation: the first `Ctrl+C` begins a
//! graceful shutdown, the second forces an immediate exit.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    Graceful,
    Immediate,
}

pub struct ShutdownController {
    forced: AtomicU8,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            forced: AtomicU8::new(0),
        }
    }

    fn bump_forced(&self) -> u8 {
        self.forced.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns a task that listens for `Ctrl+C` and turns the first signal
/// into [`ShutdownEvent::Graceful`], the second into
/// [`ShutdownEvent::Immediate`], then stops listening.
pub fn spawn_signal_handler(
    shutdown: Arc<ShutdownController>,
    tx: mpsc::UnboundedSender<ShutdownEvent>,
) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let strike = shutdown.bump_forced();
            if strike == 1 {
                if tx.send(ShutdownEvent::Graceful).is_err() {
                    return;
                }
            } else {
                let _ = tx.send(ShutdownEvent::Immediate);
                return;
            }
        }
    });
}
