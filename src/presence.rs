//! Online / last-seen state.
//!
//! The `users` table holds the authoritative flag. This node also counts
//! open sessions per user, so a user with two tabs stays online until the
//! last one closes.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::{db::{self, UserId}, ratelimit::RateLimiter};

/// Outcome of [`PresenceStore::settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    pub online: bool,
    /// Differs from the last status settled for this user.
    pub changed: bool,
}

pub struct PresenceStore {
    db_pool: SqlitePool,
    sessions: DashMap<UserId, usize>,
    // last settled status per user; holding the lock orders transitions
    settled: DashMap<UserId, Arc<Mutex<Option<bool>>>>,
}

impl PresenceStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        PresenceStore {
            db_pool,
            sessions: DashMap::new(),
            settled: DashMap::new(),
        }
    }

    /// Writes `online` and bumps `last_seen` in one statement.
    pub async fn set_online(&self, user_id: UserId, online: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET online=?, last_seen=? WHERE id=?")
            .bind(online)
            .bind(db::now())
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    /// Counts a new session for `user_id`. Follow up with [`settle`](Self::settle).
    pub fn session_opened(&self, user_id: UserId) {
        *self.sessions.entry(user_id).or_insert(0) += 1;
    }

    /// Forgets one session; returns whether the user still has others open.
    /// Only the in-memory count changes; follow up with [`settle`](Self::settle).
    pub fn session_closed(&self, user_id: UserId) -> bool {
        let remaining = match self.sessions.get_mut(&user_id) {
            Some(mut n) => {
                *n = n.saturating_sub(1);
                *n
            }
            None => 0,
        };
        if remaining == 0 {
            self.sessions.remove_if(&user_id, |_, n| *n == 0);
        }
        remaining > 0
    }

    /// Writes the user's status as it stands now (online while any session
    /// is open) and passes the result to `announce` before releasing the
    /// user's lock.
    ///
    /// Transitions for one user run one at a time and each reads the session
    /// count only once it holds the lock, so the last write always matches
    /// the latest count. `announce` runs even if the write fails; the sweep
    /// repairs the row later.
    pub async fn settle<F>(&self, user_id: UserId, announce: F) -> Result<Settled, sqlx::Error>
    where
        F: FnOnce(Settled),
    {
        let slot = self.settled.entry(user_id).or_default().clone();
        let mut last = slot.lock().await;

        let online = self.live_sessions(user_id) > 0;
        let written = self.set_online(user_id, online).await;

        let settled = Settled { online, changed: *last != Some(online) };
        *last = Some(online);
        announce(settled);

        written.map(|()| settled)
    }

    pub fn live_sessions(&self, user_id: UserId) -> usize {
        self.sessions.get(&user_id).map(|n| *n).unwrap_or(0)
    }

    /// Bumps `last_seen` for everyone with a live session on this node, so
    /// long-lived connections are not mistaken for dead ones by the sweep.
    pub async fn refresh_live(&self) -> Result<u64, sqlx::Error> {
        let live: Vec<UserId> = self.sessions.iter().map(|e| *e.key()).collect();
        let now = db::now();

        let mut touched = 0;
        for user_id in live {
            touched += sqlx::query("UPDATE users SET online=1, last_seen=? WHERE id=?")
                .bind(now)
                .bind(user_id)
                .execute(&self.db_pool)
                .await?
                .rows_affected();
        }
        Ok(touched)
    }

    /// Flips users still flagged online but unseen for longer than
    /// `threshold` to offline. Returns how many were flipped.
    pub async fn sweep_stale(&self, threshold: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = db::now() - threshold.as_secs() as i64;
        let flipped = sqlx::query("UPDATE users SET online=0 WHERE online=1 AND last_seen<?")
            .bind(cutoff)
            .execute(&self.db_pool)
            .await?
            .rows_affected();
        Ok(flipped)
    }
}

/// Periodic safety net for sessions that died without a clean disconnect.
pub fn spawn_sweeper(
    presence: Arc<PresenceStore>,
    limiter: Arc<RateLimiter>,
    every: Duration,
    stale_after: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;

            if let Err(e) = presence.refresh_live().await {
                tracing::warn!(error = %e, "failed to refresh live presence");
            }
            match presence.sweep_stale(stale_after).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(flipped = n, "marked stale users offline"),
                Err(e) => tracing::error!(error = %e, "presence sweep failed"),
            }
            let purged = limiter.purge_expired();
            tracing::debug!(purged, "presence sweep done");
        }
    })
}
