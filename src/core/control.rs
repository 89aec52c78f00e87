/*!
 * Pause and cancel signals shared between the controller and workers
 *
 * Two atomic flags, written by the controller, read by workers at safe
 * points (batch boundaries and streaming chunk boundaries). No control
 * messages travel through the work queue.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Poll interval while paused
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct ControlSignals {
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl ControlSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Block while the pause flag is set. Returns false when the cancel
    /// flag is observed, so callers can abandon their work item.
    pub fn wait_if_paused(&self) -> bool {
        while self.is_paused() {
            if self.is_cancelled() {
                return false;
            }
            thread::sleep(PAUSE_POLL_INTERVAL);
        }
        !self.is_cancelled()
    }
}

/// Cloneable handle exposing the control surface to callers
#[derive(Clone)]
pub struct ControlHandle {
    signals: Arc<ControlSignals>,
}

impl ControlHandle {
    pub fn new(signals: Arc<ControlSignals>) -> Self {
        Self { signals }
    }

    pub fn pause(&self) {
        self.signals.pause();
    }

    pub fn resume(&self) {
        self.signals.resume();
    }

    pub fn abort(&self) {
        self.signals.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.signals.is_paused()
    }

    pub fn is_aborted(&self) -> bool {
        self.signals.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_signal_toggles() {
        let signals = ControlSignals::new();
        assert!(!signals.is_paused());
        assert!(!signals.is_cancelled());

        signals.pause();
        assert!(signals.is_paused());
        signals.resume();
        assert!(!signals.is_paused());

        signals.cancel();
        assert!(signals.is_cancelled());
    }

    #[test]
    fn test_wait_if_paused_passes_through_when_running() {
        let signals = ControlSignals::new();
        assert!(signals.wait_if_paused());
    }

    #[test]
    fn test_wait_if_paused_blocks_until_resume() {
        let signals = ControlSignals::new();
        signals.pause();

        let waiter = {
            let signals = signals.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let alive = signals.wait_if_paused();
                (alive, start.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(150));
        signals.resume();

        let (alive, waited) = waiter.join().unwrap();
        assert!(alive);
        assert!(waited >= Duration::from_millis(100));
    }

    #[test]
    fn test_cancel_releases_paused_waiter() {
        let signals = ControlSignals::new();
        signals.pause();

        let waiter = {
            let signals = signals.clone();
            std::thread::spawn(move || signals.wait_if_paused())
        };

        std::thread::sleep(Duration::from_millis(80));
        signals.cancel();

        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_handle_controls_shared_signals() {
        let signals = ControlSignals::new();
        let handle = ControlHandle::new(signals.clone());

        handle.pause();
        assert!(signals.is_paused());
        handle.resume();
        assert!(!signals.is_paused());
        handle.abort();
        assert!(signals.is_cancelled());
        assert!(handle.is_aborted());
    }
}
