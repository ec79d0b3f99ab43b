//! Fixed-window message quota per user.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::db::UserId;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    expires_at: Instant,
}

/// Counter + expiry per user. The window opens on the first accepted
/// message and lapses `window` later; nothing is persisted.
pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: DashMap<UserId, Window>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        RateLimiter {
            max,
            window,
            windows: DashMap::new(),
        }
    }

    /// Counts one message against `user_id`'s window; `false` once the
    /// window is full. Denied attempts are not counted.
    pub fn allow(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        // the entry guard holds the shard lock, so check-and-increment is atomic
        let mut entry = self.windows.entry(user_id).or_insert(Window {
            count: 0,
            expires_at: now + self.window,
        });

        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now + self.window,
            };
        }

        if entry.count >= self.max {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drops lapsed windows so the map stays bounded by active senders.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.expires_at > now);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn twenty_per_minute() {
        let limiter = RateLimiter::new(20, Duration::from_secs(60));

        for _ in 0..20 {
            assert!(limiter.allow(1));
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert!(!limiter.allow(1));
        assert!(!limiter.allow(1));

        // other users have their own window
        assert!(limiter.allow(2));

        tokio::time::advance(Duration::from_secs(41)).await;
        assert!(limiter.allow(1));
    }

    #[tokio::test(start_paused = true)]
    async fn window_starts_at_first_message() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.allow(1));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow(1));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_lapsed_windows() {
        let limiter = RateLimiter::new(20, Duration::from_secs(60));
        limiter.allow(1);
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.allow(2);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tabs_never_exceed_quota() {
        let limiter = Arc::new(RateLimiter::new(20, Duration::from_secs(60)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { (0..10).filter(|_| limiter.allow(7)).count() })
            })
            .collect();

        let mut granted = 0;
        for task in tasks {
            granted += task.await.unwrap();
        }
        assert_eq!(granted, 20);
    }
}
