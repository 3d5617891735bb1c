//! Cancellable one-shot timeouts.
//!
//! Each armed timeout runs on its own thread, racing a timer against a
//! cancellation channel. Cancellation is signalled by closing the channel, so
//! dropping the [`TimeoutGuard`] is enough to disarm it.

use std::time::Duration;

use async_channel::{Receiver, Sender};
use futures::future::{Either, select};
use futures_timer::Delay;
use log::error;

/// Disarms its timeout when dropped.
#[derive(Debug)]
pub(crate) struct TimeoutGuard {
    sender: Sender<()>,
}

impl TimeoutGuard {
    /// Arms a timeout that runs `on_expire` after `duration` unless the guard
    /// is dropped first.
    pub(crate) fn arm<F>(duration: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (sender, receiver) = async_channel::bounded(1);

        let spawned = std::thread::Builder::new()
            .name("geobridge-timeout".into())
            .spawn(move || {
                if futures::executor::block_on(expires(duration, &receiver)) {
                    on_expire();
                }
            });

        if let Err(err) = spawned {
            error!("failed to spawn location timeout thread: {err}");
        }

        Self { sender }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.sender.close();
    }
}

async fn expires(duration: Duration, cancelled: &Receiver<()>) -> bool {
    let delay = Delay::new(duration);
    let cancel = cancelled.recv();
    futures::pin_mut!(cancel);

    matches!(select(delay, cancel).await, Either::Left(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn fires_after_duration() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _guard = TimeoutGuard::arm(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(300));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn dropped_guard_never_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let guard = TimeoutGuard::arm(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        });
        drop(guard);

        std::thread::sleep(Duration::from_millis(300));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
