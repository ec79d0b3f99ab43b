//! Session lifecycle for room sockets.
//!
//! A [`Session`] is opened by [`Gateway::open`], fed inbound text frames via
//! [`Session::handle_text`], and finished with [`Session::close`]. Dropping a
//! session that was never closed (task cancelled, panic while unwinding)
//! still unsubscribes it and releases its presence.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    auth::{CredentialResolver, Identity, Principal},
    db::{self, ChannelId, UserId},
    presence::PresenceStore,
    ratelimit::RateLimiter,
};

use super::{
    frame::{InboundFrame, ServerFrame},
    msg::{MessageStore, StoreError},
    registry::{Outbound, RoomRegistry, SessionId},
};

pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Failures surfaced to the sending session as an error frame.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Message rate limit exceeded")]
    RateLimitExceeded,
    #[error("You are not a member of this channel")]
    PermissionDenied,
    #[error("Invalid message format")]
    Validation,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Text sent to the client; internal failures stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "Internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PermissionDenied => GatewayError::PermissionDenied,
            StoreError::Database(e) => GatewayError::Internal(e.into()),
        }
    }
}

struct Inner {
    registry: RoomRegistry,
    presence: Arc<PresenceStore>,
    limiter: Arc<RateLimiter>,
    store: Arc<dyn MessageStore>,
    resolver: Arc<CredentialResolver>,
    outbound_buffer: usize,
}

/// Shared entry point for every room socket on this node.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(
        resolver: Arc<CredentialResolver>,
        presence: Arc<PresenceStore>,
        limiter: Arc<RateLimiter>,
        store: Arc<dyn MessageStore>,
        outbound_buffer: usize,
    ) -> Self {
        Gateway {
            inner: Arc::new(Inner {
                registry: RoomRegistry::new(),
                presence,
                limiter,
                store,
                resolver,
                outbound_buffer: outbound_buffer.max(1),
            }),
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.inner.registry
    }

    pub fn presence(&self) -> &Arc<PresenceStore> {
        &self.inner.presence
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    fn announce(&self, room: ChannelId, frame: &ServerFrame) {
        let delivery = self.inner.registry.broadcast(room, frame);
        if delivery.dropped > 0 {
            tracing::warn!(
                room,
                delivered = delivery.delivered,
                dropped = delivery.dropped,
                "broadcast not delivered to every subscriber"
            );
        }
    }

    /// Records `user_id`'s current presence and tells `room` about it.
    async fn settle_presence(&self, room: ChannelId, user_id: UserId, when: Announce) {
        let result = self
            .inner
            .presence
            .settle(user_id, |settled| {
                if when == Announce::Always || settled.changed {
                    self.announce(room, &ServerFrame::Presence { user_id, status: settled.online });
                }
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, user_id, "failed to record presence");
        }
    }

    /// Authenticates, announces presence and subscribes to `channel_id`.
    ///
    /// Anonymous callers still get a session; they can watch but not send.
    /// The receiver carries every frame destined for this connection.
    pub async fn open(
        &self,
        channel_id: ChannelId,
        raw_token: Option<&str>,
    ) -> (Session, mpsc::Receiver<ServerFrame>) {
        let principal = self.inner.resolver.resolve(raw_token).await;
        let (outbound, rx) = mpsc::channel(self.inner.outbound_buffer);

        let mut session = Session {
            id: Uuid::now_v7(),
            channel_id,
            principal,
            outbound,
            gateway: self.clone(),
            state: SessionState::Open,
            holds_presence: false,
            pending_presence: None,
        };

        if let Some(user_id) = session.identity().map(|i| i.id) {
            session.holds_presence = true;
            self.inner.presence.session_opened(user_id);
            // a room someone just entered always hears about them
            self.settle_presence(channel_id, user_id, Announce::Always).await;
        }

        self.inner
            .registry
            .join(channel_id, session.id, session.outbound.clone());

        tracing::info!(
            session_id = %session.id,
            channel_id,
            user_id = session.identity().map(|i| i.id),
            "session opened"
        );
        (session, rx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Announce {
    Always,
    OnChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

pub struct Session {
    id: SessionId,
    channel_id: ChannelId,
    principal: Principal,
    outbound: Outbound,
    gateway: Gateway,
    state: SessionState,
    holds_presence: bool,
    // session count released, presence not yet settled
    pending_presence: Option<UserId>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.principal.identity()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handles one inbound text frame. Never fails: every error, including a
    /// panic in the handling path, becomes an error frame to this session.
    pub async fn handle_text(&self, text: &str) {
        let outcome = AssertUnwindSafe(self.process(text)).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.report(err),
            Err(_) => {
                tracing::error!(session_id = %self.id, "panic while handling inbound frame");
                self.report(GatewayError::Internal(anyhow::anyhow!("handler panicked")));
            }
        }
    }

    /// Sends `err` to this session only.
    pub fn report(&self, err: GatewayError) {
        match &err {
            GatewayError::Internal(e) => {
                tracing::error!(session_id = %self.id, channel_id = self.channel_id, error = ?e, "inbound frame failed");
            }
            other => {
                tracing::debug!(session_id = %self.id, channel_id = self.channel_id, error = %other, "inbound frame rejected");
            }
        }
        self.reply(ServerFrame::error(err.client_message()));
    }

    fn reply(&self, frame: ServerFrame) {
        if let Err(e) = self.outbound.try_send(frame) {
            tracing::warn!(session_id = %self.id, error = %e, "could not queue reply");
        }
    }

    async fn process(&self, text: &str) -> Result<(), GatewayError> {
        let InboundFrame { message } =
            serde_json::from_str(text).map_err(|_| GatewayError::Validation)?;

        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let content: String = trimmed.chars().take(MAX_MESSAGE_CHARS).collect();

        let identity = self.identity().ok_or(GatewayError::AuthenticationRequired)?;
        let inner = &self.gateway.inner;

        if !inner.limiter.allow(identity.id) {
            return Err(GatewayError::RateLimitExceeded);
        }

        let saved = inner.store.save_message(self.channel_id, identity, &content).await?;
        tracing::debug!(message_id = saved.id, channel_id = self.channel_id, user_id = identity.id, "message saved");

        if let Err(e) = inner.store.touch_last_seen(identity, self.channel_id).await {
            tracing::warn!(error = %e, user_id = identity.id, "failed to update channel read marker");
        }

        self.gateway.announce(
            self.channel_id,
            &ServerFrame::Chat {
                message: saved.content,
                user_id: identity.id,
                username: identity.username.clone(),
                timestamp: db::rfc3339(saved.timestamp),
                message_id: saved.id,
            },
        );
        Ok(())
    }

    /// Unsubscribes and releases presence without awaiting anything.
    fn detach(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.gateway.inner.registry.leave(self.channel_id, self.id);

        if self.holds_presence {
            self.holds_presence = false;
            if let Some(user_id) = self.principal.identity().map(|i| i.id) {
                self.gateway.inner.presence.session_closed(user_id);
                self.pending_presence = Some(user_id);
            }
        }
    }

    /// Leaves the room, writes the presence change and announces it.
    pub async fn close(mut self) {
        self.detach();

        // cleared only once settled, so a cancelled close still settles in Drop
        if let Some(user_id) = self.pending_presence {
            self.gateway
                .settle_presence(self.channel_id, user_id, Announce::OnChange)
                .await;
            self.pending_presence = None;
        }

        tracing::info!(session_id = %self.id, channel_id = self.channel_id, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Open {
            tracing::warn!(session_id = %self.id, "session dropped without close");
        }
        self.detach();

        let Some(user_id) = self.pending_presence.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (gateway, room) = (self.gateway.clone(), self.channel_id);
                handle.spawn(async move {
                    gateway.settle_presence(room, user_id, Announce::OnChange).await;
                });
            }
            // the stale sweep will catch it
            Err(_) => tracing::warn!(user_id, "no runtime to record presence change"),
        }
    }
}
