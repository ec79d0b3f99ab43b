//! Which sessions are listening on which room, and fan-out to them.

use std::collections::HashMap;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::db::ChannelId;

use super::frame::ServerFrame;

pub type SessionId = Uuid;

/// Non-owning handle to a session's outbound queue.
pub type Outbound = mpsc::Sender<ServerFrame>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Room id -> subscribed sessions.
///
/// Every mutation and every broadcast for a room runs under that room's
/// shard lock, and only non-blocking `try_send` happens inside it. That
/// serializes broadcasts per room without ever awaiting under the lock.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<ChannelId, HashMap<SessionId, Outbound>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: re-joining replaces the stored handle.
    pub fn join(&self, room: ChannelId, session: SessionId, outbound: Outbound) {
        self.rooms.entry(room).or_default().insert(session, outbound);
    }

    /// Returns whether the session was subscribed.
    pub fn leave(&self, room: ChannelId, session: SessionId) -> bool {
        let removed = match self.rooms.get_mut(&room) {
            Some(mut subs) => subs.remove(&session).is_some(),
            None => false,
        };
        self.rooms.remove_if(&room, |_, subs| subs.is_empty());
        removed
    }

    /// Delivers `frame` to every subscriber of `room`, sender included.
    ///
    /// A full queue drops the frame for that session only. A closed queue
    /// means the connection is gone; the handle is removed here.
    pub fn broadcast(&self, room: ChannelId, frame: &ServerFrame) -> Delivery {
        let mut report = Delivery::default();
        let Some(mut subs) = self.rooms.get_mut(&room) else {
            return report;
        };

        subs.retain(|session, outbound| match outbound.try_send(frame.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                report.dropped += 1;
                tracing::debug!(%session, room, "outbound queue full; dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.dropped += 1;
                tracing::debug!(%session, room, "outbound queue closed; unsubscribing");
                false
            }
        });
        let empty = subs.is_empty();
        drop(subs);

        if empty {
            self.rooms.remove_if(&room, |_, subs| subs.is_empty());
        }
        report
    }

    pub fn subscribers(&self, room: ChannelId) -> Vec<SessionId> {
        self.rooms
            .get(&room)
            .map(|subs| subs.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, room: ChannelId, session: SessionId) -> bool {
        self.rooms
            .get(&room)
            .is_some_and(|subs| subs.contains_key(&session))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn session(cap: usize) -> (SessionId, Outbound, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(cap);
        (Uuid::now_v7(), tx, rx)
    }

    fn presence(user_id: i64) -> ServerFrame {
        ServerFrame::Presence { user_id, status: true }
    }

    #[test]
    fn join_leave_tracks_exact_membership() {
        let registry = RoomRegistry::new();
        let (a, a_tx, _a_rx) = session(4);
        let (b, b_tx, _b_rx) = session(4);

        registry.join(1, a, a_tx.clone());
        registry.join(1, a, a_tx);
        registry.join(1, b, b_tx.clone());
        registry.join(2, b, b_tx);

        let subs: HashSet<_> = registry.subscribers(1).into_iter().collect();
        assert_eq!(subs, HashSet::from([a, b]));
        assert_eq!(registry.subscribers(1).len(), 2);

        assert!(registry.leave(1, a));
        assert!(!registry.leave(1, a));
        assert_eq!(registry.subscribers(1), vec![b]);

        assert!(registry.leave(1, b));
        assert!(registry.leave(2, b));
        assert_eq!(registry.room_count(), 0);
        assert!(!registry.leave(3, b));
    }

    #[test]
    fn broadcast_reaches_everyone_in_room_only() {
        let registry = RoomRegistry::new();
        let (a, a_tx, mut a_rx) = session(4);
        let (b, b_tx, mut b_rx) = session(4);
        let (c, c_tx, mut c_rx) = session(4);
        registry.join(1, a, a_tx);
        registry.join(1, b, b_tx);
        registry.join(2, c, c_tx);

        let report = registry.broadcast(1, &presence(7));
        assert_eq!(report, Delivery { delivered: 2, dropped: 0 });
        assert_eq!(a_rx.try_recv().unwrap(), presence(7));
        assert_eq!(b_rx.try_recv().unwrap(), presence(7));
        assert!(c_rx.try_recv().is_err());

        assert_eq!(registry.broadcast(9, &presence(7)), Delivery::default());
    }

    #[test]
    fn slow_session_does_not_block_others() {
        let registry = RoomRegistry::new();
        let (slow, slow_tx, mut slow_rx) = session(1);
        let (fast, fast_tx, mut fast_rx) = session(8);
        registry.join(1, slow, slow_tx);
        registry.join(1, fast, fast_tx);

        for i in 0..3 {
            registry.broadcast(1, &presence(i));
        }

        for i in 0..3 {
            assert_eq!(fast_rx.try_recv().unwrap(), presence(i));
        }
        assert_eq!(slow_rx.try_recv().unwrap(), presence(0));
        assert!(slow_rx.try_recv().is_err());
        // full is not fatal
        assert!(registry.is_subscribed(1, slow));
    }

    #[test]
    fn dead_session_is_unsubscribed() {
        let registry = RoomRegistry::new();
        let (dead, dead_tx, dead_rx) = session(4);
        let (live, live_tx, mut live_rx) = session(4);
        registry.join(1, dead, dead_tx);
        registry.join(1, live, live_tx);
        drop(dead_rx);

        let report = registry.broadcast(1, &presence(1));
        assert_eq!(report, Delivery { delivered: 1, dropped: 1 });
        assert!(!registry.is_subscribed(1, dead));
        assert_eq!(live_rx.try_recv().unwrap(), presence(1));
    }

    #[test]
    fn per_room_order_is_issue_order() {
        let registry = RoomRegistry::new();
        let (a, a_tx, mut a_rx) = session(64);
        registry.join(1, a, a_tx);

        for i in 0..50 {
            registry.broadcast(1, &presence(i));
        }
        for i in 0..50 {
            assert_eq!(a_rx.try_recv().unwrap(), presence(i));
        }
    }
}
