//! Connection monitor - tracks feedback arrival to detect link aliveness.
//!
//! Uses monotonic time anchored to application start so the stored value
//! fits in an `AtomicU64` and survives system clock changes (NTP, manual
//! adjustments).

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global anchor point for monotonic time.
/// Set once on first access, never changes.
static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic time as microseconds since app start.
pub fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Connection health monitor.
///
/// Tracks the time since the last feedback datagram was received.
/// Edge detection (single notification per transition) is handled by the
/// scheduler's periodic check, not here.
pub struct ConnectionMonitor {
    last_feedback: AtomicU64,
    timeout: Duration,
}

impl ConnectionMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            // 初始为 0：收到第一包反馈之前不应被判定为“曾经连接过”
            last_feedback: AtomicU64::new(0),
            timeout,
        }
    }

    /// Register a feedback arrival; returns the stored timestamp.
    pub fn register_feedback(&self) -> u64 {
        let now = monotonic_micros().max(1);
        self.last_feedback.store(now, Ordering::Relaxed);
        now
    }

    /// Whether any feedback has ever arrived.
    pub fn has_feedback(&self) -> bool {
        self.last_feedback.load(Ordering::Relaxed) > 0
    }

    /// Time since the last feedback arrival.
    pub fn time_since_last_feedback(&self) -> Duration {
        let last_us = self.last_feedback.load(Ordering::Relaxed);
        if last_us == 0 {
            return Duration::MAX;
        }
        Duration::from_micros(monotonic_micros().saturating_sub(last_us))
    }

    /// True when feedback arrived within the timeout window.
    pub fn is_alive(&self) -> bool {
        self.time_since_last_feedback() < self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_monotonic_time_always_increases() {
        let t1 = monotonic_micros();
        thread::sleep(Duration::from_millis(5));
        let t2 = monotonic_micros();
        assert!(t2 > t1);
    }

    #[test]
    fn test_no_feedback_means_not_alive() {
        let monitor = ConnectionMonitor::new(Duration::from_secs(1));
        assert!(!monitor.has_feedback());
        assert!(!monitor.is_alive());
    }

    #[test]
    fn test_feedback_resets_timer() {
        let monitor = ConnectionMonitor::new(Duration::from_millis(100));

        monitor.register_feedback();
        assert!(monitor.is_alive());

        thread::sleep(Duration::from_millis(60));
        monitor.register_feedback();
        thread::sleep(Duration::from_millis(60));

        // 第二次反馈重置了计时窗口
        assert!(monitor.is_alive());
    }

    #[test]
    fn test_timeout_after_silence() {
        let monitor = ConnectionMonitor::new(Duration::from_millis(30));
        monitor.register_feedback();
        thread::sleep(Duration::from_millis(80));
        assert!(!monitor.is_alive());
    }
}
