// RateLimiter - per-category spacing and rolling-window cap
//
// Each category keeps the instants of its recent fires. A request is
// admitted when the previous fire is at least `min_interval` ago and fewer
// than `max_per_window` fires fall inside the trailing `window`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::error;

use super::SoundCategory;
use crate::config::FeedbackConfig;

pub struct RateLimiter {
    min_interval: Duration,
    max_per_window: usize,
    window: Duration,
    ledgers: Mutex<HashMap<SoundCategory, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, max_per_window: usize, window: Duration) -> Self {
        Self {
            min_interval,
            max_per_window,
            window,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &FeedbackConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_interval_ms),
            config.max_per_window,
            Duration::from_millis(config.window_ms),
        )
    }

    /// Record a fire at `now` if the category is allowed to fire
    pub fn try_acquire(&self, category: SoundCategory, now: Instant) -> bool {
        let Ok(mut ledgers) = self.ledgers.lock() else {
            error!("[RateLimiter] Ledger lock poisoned, refusing {:?}", category);
            return false;
        };
        let ledger = ledgers.entry(category).or_default();
        Self::evict(ledger, now, self.window);

        if let Some(&last) = ledger.back() {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        if ledger.len() >= self.max_per_window {
            return false;
        }
        ledger.push_back(now);
        true
    }

    /// Give back a fire recorded at `at` by `try_acquire`
    pub fn release(&self, category: SoundCategory, at: Instant) {
        let Ok(mut ledgers) = self.ledgers.lock() else {
            return;
        };
        if let Some(ledger) = ledgers.get_mut(&category) {
            if let Some(pos) = ledger.iter().rposition(|&t| t == at) {
                ledger.remove(pos);
            }
        }
    }

    fn evict(ledger: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = ledger.front() {
            if now.saturating_duration_since(oldest) >= window {
                ledger.pop_front();
            } else {
                break;
            }
        }
    }

    /// Fires of `category` inside the window ending at `now`
    pub fn fires_in_window(&self, category: SoundCategory, now: Instant) -> usize {
        self.ledgers
            .lock()
            .map(|ledgers| {
                ledgers
                    .get(&category)
                    .map(|ledger| {
                        ledger
                            .iter()
                            .filter(|&&t| now.saturating_duration_since(t) < self.window)
                            .count()
                    })
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        if let Ok(mut ledgers) = self.ledgers.lock() {
            ledgers.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_millis(150), 3, Duration::from_secs(1))
    }

    #[test]
    fn test_min_interval() {
        let limiter = limiter();
        let t0 = Instant::now();
        assert!(limiter.try_acquire(SoundCategory::Click, t0));
        assert!(!limiter.try_acquire(SoundCategory::Click, t0 + Duration::from_millis(149)));
        assert!(limiter.try_acquire(SoundCategory::Click, t0 + Duration::from_millis(150)));
    }

    #[test]
    fn test_categories_are_independent() {
        let limiter = limiter();
        let t0 = Instant::now();
        assert!(limiter.try_acquire(SoundCategory::Click, t0));
        assert!(limiter.try_acquire(SoundCategory::Success, t0));
    }

    #[test]
    fn test_window_cap_slides() {
        let limiter = limiter();
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);

        assert!(limiter.try_acquire(SoundCategory::Error, at(0)));
        assert!(limiter.try_acquire(SoundCategory::Error, at(200)));
        assert!(limiter.try_acquire(SoundCategory::Error, at(400)));
        assert!(!limiter.try_acquire(SoundCategory::Error, at(600)));
        assert_eq!(limiter.fires_in_window(SoundCategory::Error, at(600)), 3);

        // First fire leaves the window at 1000 ms
        assert!(!limiter.try_acquire(SoundCategory::Error, at(999)));
        assert!(limiter.try_acquire(SoundCategory::Error, at(1000)));
        assert!(!limiter.try_acquire(SoundCategory::Error, at(1199)));
        assert!(limiter.try_acquire(SoundCategory::Error, at(1200)));
    }

    #[test]
    fn test_release_returns_the_slot() {
        let limiter = limiter();
        let t0 = Instant::now();
        assert!(limiter.try_acquire(SoundCategory::Click, t0));
        limiter.release(SoundCategory::Click, t0);
        assert_eq!(limiter.fires_in_window(SoundCategory::Click, t0), 0);
        assert!(limiter.try_acquire(SoundCategory::Click, t0 + Duration::from_millis(1)));

        // Unknown instants leave the ledger alone
        limiter.release(SoundCategory::Click, t0);
        assert_eq!(limiter.fires_in_window(SoundCategory::Click, t0 + Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_reset() {
        let limiter = limiter();
        let t0 = Instant::now();
        assert!(limiter.try_acquire(SoundCategory::Click, t0));
        limiter.reset();
        assert!(limiter.try_acquire(SoundCategory::Click, t0));
        assert_eq!(limiter.fires_in_window(SoundCategory::Click, t0), 1);
    }
}
