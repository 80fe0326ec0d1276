//! Debouncing for rapidly-changing selection input.
//!
//! A user dragging through a date picker produces a burst of range changes;
//! only the final selection should reach the network. The debouncer
//! coalesces a burst into one handler call with the latest value: wait for
//! the first value, sleep out the quiet window, drain whatever arrived in
//! the meantime, then fire.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::SyncConfig;

/// Handle for pushing values into a running debounce loop. Dropping the
/// handle stops the loop once pending values are flushed.
pub struct Debouncer<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> Debouncer<T> {
    /// Push a value, waiting if the channel is momentarily full.
    pub async fn send(&self, value: T) {
        let _ = self.tx.send(value).await;
    }

    /// Non-blocking push for synchronous callers (event handlers). Returns
    /// false if the loop has shut down or the channel is full.
    pub fn try_send(&self, value: T) -> bool {
        self.tx.try_send(value).is_ok()
    }
}

/// Spawn a debounce loop that invokes `handler` with the most recent value
/// after each quiet `window`.
pub fn debounce<T, F, Fut>(window: Duration, mut handler: F) -> Debouncer<T>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (tx, mut rx) = mpsc::channel::<T>(64);

    tokio::spawn(async move {
        loop {
            // Wait for a burst to start
            let Some(mut latest) = rx.recv().await else {
                break; // All senders dropped
            };

            // Drain the burst, keeping only the last value
            sleep(window).await;
            while let Ok(value) = rx.try_recv() {
                latest = value;
            }

            handler(latest).await;
        }
        log::debug!("debounce: loop stopped");
    });

    Debouncer { tx }
}

/// Spawn a debounce loop with the window taken from configuration
/// (`debounceMs`, 300 ms by default).
pub fn debounce_configured<T, F, Fut>(config: &SyncConfig, handler: F) -> Debouncer<T>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    debounce(config.debounce_window(), handler)
}
