//! Cancellable one-shot timer built on a detached thread and a generation counter.
//!
//! There is no async runtime here, so a "timer" is just `thread::spawn` plus `sleep`; what
//! makes it a real timer is that firing checks a generation counter before invoking the
//! callback, so a cancelled or superseded timer is a safe no-op instead of a race.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct Timer {
    generation: Arc<AtomicU64>,
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule `callback` to run after `delay`, unless cancelled or superseded first.
    pub fn schedule<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let counter = Arc::clone(&self.generation);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            if counter.load(Ordering::SeqCst) == generation {
                callback();
            }
        });
    }

    /// Invalidate any timer scheduled via this handle that hasn't fired yet.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let timer = Timer::new();
        let (tx, rx) = mpsc::channel();
        timer.schedule(Duration::from_millis(10), move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn cancel_prevents_firing() {
        let timer = Timer::new();
        let (tx, rx) = mpsc::channel::<()>();
        timer.schedule(Duration::from_millis(50), move || {
            let _ = tx.send(());
        });
        timer.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn rescheduling_supersedes_the_previous_timer() {
        let timer = Timer::new();
        let (tx, rx) = mpsc::channel();
        timer.schedule(Duration::from_millis(200), {
            let tx = tx.clone();
            move || tx.send("first").unwrap()
        });
        timer.schedule(Duration::from_millis(10), move || tx.send("second").unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "second");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }
}
