//! Scoped acquisition of the resources one execution holds: the deadline
//! watchdog thread, the runtime handle, and the host-side cancellation hook.
//!
//! Every guard releases in `Drop`, so success, guest error, timeout, panic
//! unwinding and a dropped host future all take the same release path.

use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

/// Message delivered to a running [`Watchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogSignal {
    /// Execution ended on its own; stand down.
    Finished,
    /// The host stopped waiting; terminate now.
    HostCancelled,
}

/// How the watchdog thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Completed,
    TimedOut,
    HostCancelled,
}

/// Deadline timer on a dedicated OS thread.
///
/// The interpreter thread may be stuck in a loop with no suspension point,
/// so the deadline cannot be a task on that thread. On expiry or host
/// cancellation the watchdog runs `terminate` exactly once.
pub struct Watchdog {
    signal: mpsc::Sender<WatchdogSignal>,
    handle: Option<JoinHandle<WatchdogVerdict>>,
}

impl Watchdog {
    pub fn channel() -> (mpsc::Sender<WatchdogSignal>, mpsc::Receiver<WatchdogSignal>) {
        mpsc::channel()
    }

    /// Start the timer. `signal` must be the sending half paired with
    /// `receiver`.
    pub fn arm<F>(
        deadline: Duration,
        signal: mpsc::Sender<WatchdogSignal>,
        receiver: mpsc::Receiver<WatchdogSignal>,
        terminate: F,
    ) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("ctxopt-watchdog".to_string())
            .spawn(move || match receiver.recv_timeout(deadline) {
                Ok(WatchdogSignal::Finished) | Err(RecvTimeoutError::Disconnected) => {
                    WatchdogVerdict::Completed
                }
                Ok(WatchdogSignal::HostCancelled) => {
                    terminate();
                    WatchdogVerdict::HostCancelled
                }
                Err(RecvTimeoutError::Timeout) => {
                    terminate();
                    WatchdogVerdict::TimedOut
                }
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stop the timer and wait for its thread to exit.
    pub fn disarm(mut self) -> WatchdogVerdict {
        self.stop()
    }

    fn stop(&mut self) -> WatchdogVerdict {
        let Some(handle) = self.handle.take() else {
            return WatchdogVerdict::Completed;
        };
        // The thread may already have exited on timeout; a closed channel is fine.
        let _ = self.signal.send(WatchdogSignal::Finished);
        match handle.join() {
            Ok(verdict) => verdict,
            Err(_) => {
                warn!("watchdog thread panicked");
                WatchdogVerdict::Completed
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let verdict = self.stop();
            debug!(?verdict, "watchdog released on drop");
        }
    }
}

/// Signals the watchdog when the host drops the execution future before a
/// result arrives.
pub struct HostCancelGuard {
    signal: Option<mpsc::Sender<WatchdogSignal>>,
}

impl HostCancelGuard {
    pub fn new(signal: mpsc::Sender<WatchdogSignal>) -> Self {
        Self {
            signal: Some(signal),
        }
    }

    /// The result was delivered; dropping no longer cancels.
    pub fn disarm(mut self) {
        self.signal = None;
    }
}

impl Drop for HostCancelGuard {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            debug!("host cancelled sandbox execution");
            let _ = signal.send(WatchdogSignal::HostCancelled);
        }
    }
}

/// Resource with an explicit teardown step.
pub trait Dispose {
    fn dispose(&mut self);
}

/// Owns a [`Dispose`] value and tears it down when dropped.
pub struct Scoped<T: Dispose> {
    inner: T,
}

impl<T: Dispose> Scoped<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: Dispose> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Dispose> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Dispose> Drop for Scoped<T> {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn fires_after_deadline() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let (tx, rx) = Watchdog::channel();
        let watchdog = Watchdog::arm(Duration::from_millis(20), tx, rx, move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(80));
        assert_eq!(watchdog.disarm(), WatchdogVerdict::TimedOut);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn disarm_before_deadline_does_not_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let (tx, rx) = Watchdog::channel();
        let watchdog = Watchdog::arm(Duration::from_secs(30), tx, rx, move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let started = Instant::now();
        assert_eq!(watchdog.disarm(), WatchdogVerdict::Completed);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn host_cancel_guard_terminates_on_drop() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let (tx, rx) = Watchdog::channel();
        let cancel = HostCancelGuard::new(tx.clone());
        let watchdog = Watchdog::arm(Duration::from_secs(30), tx, rx, move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        drop(cancel);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(watchdog.disarm(), WatchdogVerdict::HostCancelled);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn disarmed_cancel_guard_is_silent() {
        let (tx, rx) = Watchdog::channel();
        HostCancelGuard::new(tx).disarm();
        assert!(rx.try_recv().is_err());
    }

    struct Counted(Arc<AtomicUsize>);

    impl Dispose for Counted {
        fn dispose(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn scoped_disposes_once_on_every_path() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let _scoped = Scoped::new(Counted(count.clone()));
        }
        let result = std::panic::catch_unwind({
            let count = count.clone();
            move || {
                let _scoped = Scoped::new(Counted(count));
                panic!("guest fault");
            }
        });
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
