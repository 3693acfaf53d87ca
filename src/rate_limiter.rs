use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Minute,
    Day,
}

impl Period {
    pub fn duration(self) -> Duration {
        match self {
            Self::Minute => Duration::from_secs(60),
            Self::Day => Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Day => "day",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    pub period: Period,
    pub capacity: u32,
}

/// Admission policy for one provider. `None` or `Some(0)` disables a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub per_minute: Option<u32>,
    pub per_day: Option<u32>,
}

impl RateLimitPolicy {
    pub fn new(per_minute: Option<u32>, per_day: Option<u32>) -> Self {
        Self {
            per_minute,
            per_day,
        }
    }

    /// Enabled windows, minute before day.
    fn limits(&self) -> Vec<WindowLimit> {
        [
            (Period::Minute, self.per_minute),
            (Period::Day, self.per_day),
        ]
        .into_iter()
        .filter_map(|(period, capacity)| match capacity {
            Some(capacity) if capacity > 0 => Some(WindowLimit { period, capacity }),
            _ => None,
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied(Denial),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub period: Period,
    pub capacity: u32,
    /// Time until the oldest event in the exceeded window expires.
    pub retry_after: Duration,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rate limit exceeded: {} requests per {}.",
            self.capacity,
            self.period.as_str()
        )
    }
}

/// Moving-window limiter keyed by an opaque string.
///
/// Every key owns one window per enabled limit. Each window stores the instants
/// of the requests it admitted during the trailing period. A check either
/// records the request in all windows or in none of them, and the whole
/// test-and-record runs under a single lock.
pub struct RateLimiter {
    limits: Vec<WindowLimit>,
    windows: Mutex<HashMap<String, Vec<VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            limits: policy.limits(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &[WindowLimit] {
        &self.limits
    }

    pub fn check(&self, key: &str) -> Admission {
        if self.limits.is_empty() {
            return Admission::Admitted;
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();
        let key_windows = windows
            .entry(key.to_owned())
            .or_insert_with(|| vec![VecDeque::new(); self.limits.len()]);

        for (limit, events) in self.limits.iter().zip(key_windows.iter_mut()) {
            let period = limit.period.duration();
            while events
                .front()
                .is_some_and(|admitted| now.duration_since(*admitted) >= period)
            {
                events.pop_front();
            }

            if events.len() >= limit.capacity as usize {
                let retry_after = events
                    .front()
                    .map(|oldest| (*oldest + period).saturating_duration_since(now))
                    .unwrap_or_default();
                tracing::debug!(
                    key,
                    window = limit.period.as_str(),
                    capacity = limit.capacity,
                    "Rate limit window full"
                );
                return Admission::Denied(Denial {
                    period: limit.period,
                    capacity: limit.capacity,
                    retry_after,
                });
            }
        }

        for events in key_windows.iter_mut() {
            events.push_back(now);
        }
        Admission::Admitted
    }

    #[cfg(test)]
    fn recorded(&self, key: &str, period: Period) -> usize {
        let index = self.limits.iter().position(|limit| limit.period == period);
        match (index, self.windows.lock().get(key)) {
            (Some(index), Some(windows)) => windows[index].len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn per_minute(capacity: u32) -> RateLimiter {
        RateLimiter::new(RateLimitPolicy::new(Some(capacity), None))
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_capacity_then_denies_minute() {
        let limiter = per_minute(3);
        for _ in 0..3 {
            assert_eq!(limiter.check("k"), Admission::Admitted);
        }

        let Admission::Denied(denial) = limiter.check("k") else {
            panic!("fourth request should be denied");
        };
        assert_eq!(denial.period, Period::Minute);
        assert_eq!(
            denial.to_string(),
            "Rate limit exceeded: 3 requests per minute."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_after_period() {
        let limiter = per_minute(2);
        assert_eq!(limiter.check("k"), Admission::Admitted);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.check("k"), Admission::Admitted);
        assert!(matches!(limiter.check("k"), Admission::Denied(_)));

        // Only the first event has left the window.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.check("k"), Admission::Admitted);
        assert!(matches!(limiter.check("k"), Admission::Denied(_)));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.check("k"), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_tracks_oldest_event() {
        let limiter = per_minute(1);
        assert_eq!(limiter.check("k"), Admission::Admitted);
        tokio::time::advance(Duration::from_secs(20)).await;

        let Admission::Denied(denial) = limiter.check("k") else {
            panic!("second request should be denied");
        };
        assert_eq!(denial.retry_after, Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_day_window_is_independent_of_minute_window() {
        let limiter = RateLimiter::new(RateLimitPolicy::new(Some(100), Some(2)));
        assert_eq!(limiter.check("k"), Admission::Admitted);
        assert_eq!(limiter.check("k"), Admission::Admitted);

        let Admission::Denied(denial) = limiter.check("k") else {
            panic!("third request should hit the daily cap");
        };
        assert_eq!(denial.period, Period::Day);
        assert_eq!(denial.to_string(), "Rate limit exceeded: 2 requests per day.");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(matches!(
            limiter.check("k"),
            Admission::Denied(Denial {
                period: Period::Day,
                ..
            })
        ));

        tokio::time::advance(Period::Day.duration()).await;
        assert_eq!(limiter.check("k"), Admission::Admitted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minute_is_checked_before_day() {
        let limiter = RateLimiter::new(RateLimitPolicy::new(Some(1), Some(1)));
        assert_eq!(limiter.check("k"), Admission::Admitted);
        let Admission::Denied(denial) = limiter.check("k") else {
            panic!("second request should be denied");
        };
        assert_eq!(denial.period, Period::Minute);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_request_records_nothing() {
        let limiter = RateLimiter::new(RateLimitPolicy::new(Some(5), Some(1)));
        assert_eq!(limiter.check("k"), Admission::Admitted);
        assert!(matches!(limiter.check("k"), Admission::Denied(_)));
        assert!(matches!(limiter.check("k"), Admission::Denied(_)));

        assert_eq!(limiter.recorded("k", Period::Minute), 1);
        assert_eq!(limiter.recorded("k", Period::Day), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let limiter = per_minute(1);
        assert_eq!(limiter.check("a"), Admission::Admitted);
        assert_eq!(limiter.check("b"), Admission::Admitted);
        assert!(matches!(limiter.check("a"), Admission::Denied(_)));
    }

    #[tokio::test]
    async fn test_disabled_windows_always_admit() {
        let limiter = RateLimiter::new(RateLimitPolicy::new(Some(0), None));
        assert!(limiter.limits().is_empty());
        for _ in 0..1000 {
            assert_eq!(limiter.check("k"), Admission::Admitted);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_exceed_capacity() {
        let limiter = Arc::new(per_minute(10));
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.check("shared") == Admission::Admitted })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }
}
