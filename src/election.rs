//! The election timer: a randomized countdown, resettable from the
//! message-handling loop, that fires view-change when not reset within its
//! interval. Realized here with `tokio::time` since the crate's runtime is
//! tokio throughout.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A uniform random interval, chosen once per process at start, so that
/// replicas don't all time out in lockstep and flood each other with
/// simultaneous view-change attempts.
pub const MIN_TIMEOUT_MILLIS: u64 = 5001;
pub const MAX_TIMEOUT_MILLIS: u64 = 20000;

/// Picks the process's fixed election-timeout interval, once, at startup.
pub fn random_interval() -> Duration {
    let millis = rand::thread_rng().gen_range(MIN_TIMEOUT_MILLIS..=MAX_TIMEOUT_MILLIS);
    Duration::from_millis(millis)
}

/// A resettable countdown. `wait()` suspends until either the interval
/// elapses (the timer "fires") or `reset()` is called from another task,
/// in which case the wait restarts from a fresh full interval. Rearmed
/// with the same interval on every Prepare or Commit received from the
/// current primary.
pub struct ElectionTimer {
    interval: Duration,
    notify: Notify,
}

impl ElectionTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            notify: Notify::new(),
        }
    }

    /// Rearms the timer with the same interval it was created with. Safe
    /// to call concurrently with `wait()` from another task.
    pub fn reset(&self) {
        self.notify.notify_one();
    }

    /// Waits until the election timer fires, i.e. `self.interval` elapses
    /// without an intervening `reset()`. Returns once the timer has
    /// genuinely expired; the caller initiates view-change.
    pub async fn wait(&self) {
        loop {
            let deadline = Instant::now() + self.interval;
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                _ = self.notify.notified() => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_interval_is_within_the_spec_bounds() {
        for _ in 0..100 {
            let interval = random_interval();
            assert!(interval >= Duration::from_millis(MIN_TIMEOUT_MILLIS));
            assert!(interval <= Duration::from_millis(MAX_TIMEOUT_MILLIS));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_the_interval_elapses_without_a_reset() {
        let timer = ElectionTimer::new(Duration::from_millis(100));
        let start = Instant::now();
        timer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_firing() {
        let timer = ElectionTimer::new(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.reset();

        let waited = tokio::time::timeout(Duration::from_millis(120), timer.wait()).await;
        assert!(waited.is_err(), "timer should not have fired yet");
    }
}
