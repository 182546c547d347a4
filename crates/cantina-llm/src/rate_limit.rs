use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window request limiter.
///
/// One uniform policy for all vendor calls: timestamps older than the
/// window are pruned on every check, and a full window rejects instead of
/// blocking.
pub struct SlidingWindow {
    window: Duration,
    cap: usize,
    stamps: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(window: Duration, cap: usize) -> Self {
        Self {
            window,
            cap,
            stamps: VecDeque::new(),
        }
    }

    /// Per-minute convenience constructor.
    pub fn per_minute(cap: usize) -> Self {
        Self::new(Duration::from_secs(60), cap)
    }

    /// Record a request if the window has room; `false` means rejected.
    pub fn try_acquire(&mut self) -> bool {
        self.prune(Instant::now());
        if self.stamps.len() >= self.cap {
            return false;
        }
        self.stamps.push_back(Instant::now());
        true
    }

    pub fn in_flight(&mut self) -> usize {
        self.prune(Instant::now());
        self.stamps.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.stamps.front() {
            if now.duration_since(front) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_when_window_is_full() {
        let mut limiter = SlidingWindow::new(Duration::from_secs(60), 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.in_flight(), 3);
    }

    #[test]
    fn expired_stamps_free_the_window() {
        let mut limiter = SlidingWindow::new(Duration::from_millis(20), 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.try_acquire());
    }
}
