//! Chat requests: the handshake two strangers go through before they can
//! talk.
//!
//! `pending -> accepted` materializes the direct conversation (idempotently,
//! so a duplicate accept is harmless). `pending -> denied` starts a cooldown
//! during which the same requester may not ask the same recipient again.
//! At most one request may be pending between two users, whichever of them
//! asked.

use std::fmt;

use chrono::Duration;
use tracing::{debug, info};

use murmur_shared::{
    ChangeEvent, ChangeKind, ChatRequest, Conversation, RequestId, RequestStatus, Row, UserId,
};
use murmur_store::StoreError;

use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::registry::ConversationRegistry;

/// Why a chat request may not be sent right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBlock {
    SelfRequest,
    /// A request between the two users is already waiting for an answer.
    AlreadyPending,
    ConversationExists,
    /// Denied recently; the remaining wait.
    CoolingDown(Duration),
}

impl fmt::Display for RequestBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBlock::SelfRequest => f.write_str("cannot send a chat request to yourself"),
            RequestBlock::AlreadyPending => f.write_str("a chat request is already pending"),
            RequestBlock::ConversationExists => f.write_str("you already have a conversation"),
            RequestBlock::CoolingDown(remaining) => {
                write!(f, "try again in {}", format_remaining(*remaining))
            }
        }
    }
}

/// Human readable wait, e.g. `23h 5m`, `12m`, `less than a minute`.
pub fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes();
    if minutes < 1 {
        return "less than a minute".to_string();
    }
    let (hours, minutes) = (minutes / 60, minutes % 60);
    match (hours, minutes) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

#[derive(Clone)]
pub(crate) struct ChatRequests {
    ctx: Context,
    registry: ConversationRegistry,
}

impl ChatRequests {
    pub fn new(ctx: Context, registry: ConversationRegistry) -> Self {
        Self { ctx, registry }
    }

    /// `None` when `requester` may ask `recipient` now.
    pub async fn check_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> Result<Option<RequestBlock>> {
        if requester == recipient {
            return Ok(Some(RequestBlock::SelfRequest));
        }

        let store = self.ctx.store();
        if store.find_pending_request(requester, recipient).await?.is_some()
            || store.find_pending_request(recipient, requester).await?.is_some()
        {
            return Ok(Some(RequestBlock::AlreadyPending));
        }
        if store
            .find_direct_conversation(requester, recipient)
            .await?
            .is_some()
        {
            return Ok(Some(RequestBlock::ConversationExists));
        }
        if let Some(remaining) = self.cooldown_remaining(requester, recipient).await? {
            return Ok(Some(RequestBlock::CoolingDown(remaining)));
        }
        Ok(None)
    }

    pub async fn can_request(&self, requester: UserId, recipient: UserId) -> Result<bool> {
        Ok(self.check_request(requester, recipient).await?.is_none())
    }

    /// Time left before `requester` may ask `recipient` again after their
    /// latest denial. `None` once the cooldown has elapsed.
    pub async fn cooldown_remaining(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> Result<Option<Duration>> {
        let Some(denied) = self
            .ctx
            .store()
            .latest_denied_request(requester, recipient)
            .await?
        else {
            return Ok(None);
        };
        let Some(denied_at) = denied.denied_at else {
            return Ok(None);
        };

        let remaining = self.ctx.config.request_cooldown - (self.ctx.now() - denied_at);
        if remaining <= Duration::zero() {
            Ok(None)
        } else {
            Ok(Some(remaining))
        }
    }

    /// Send a request after re-checking every gate against the store.
    pub async fn create(&self, requester: UserId, recipient: UserId) -> Result<ChatRequest> {
        self.ctx.directory.get_user(recipient).await?;
        if let Some(block) = self.check_request(requester, recipient).await? {
            debug!(recipient = %recipient, reason = %block, "Chat request blocked");
            return Err(ClientError::RequestRejected(block));
        }

        let request = ChatRequest::new(requester, recipient, self.ctx.now());
        match self.ctx.store().insert_chat_request(&request).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => {
                return Err(ClientError::RequestRejected(RequestBlock::AlreadyPending));
            }
            Err(e) => return Err(e.into()),
        }

        info!(request = %request.id, recipient = %recipient, "Chat request sent");
        self.merge(request.clone());
        Ok(request)
    }

    /// Accept a pending request as its recipient and open the conversation.
    /// Accepting an already accepted request just returns the conversation.
    pub async fn accept(&self, id: RequestId, acting: UserId) -> Result<Conversation> {
        let request = self.load_as_recipient(id, acting).await?;

        match request.status {
            RequestStatus::Pending => {
                let moved = self
                    .ctx
                    .store()
                    .transition_chat_request(
                        id,
                        RequestStatus::Pending,
                        RequestStatus::Accepted,
                        self.ctx.now(),
                        acting,
                    )
                    .await?;
                match moved {
                    Some(updated) => {
                        info!(request = %id, "Chat request accepted");
                        self.merge(updated);
                    }
                    None => {
                        let current = self.load_as_recipient(id, acting).await?;
                        if current.status != RequestStatus::Accepted {
                            return Err(ClientError::Conflict(format!(
                                "request is {}",
                                current.status
                            )));
                        }
                        debug!(request = %id, "Request accepted concurrently");
                    }
                }
            }
            RequestStatus::Accepted => {
                debug!(request = %id, "Request already accepted");
            }
            RequestStatus::Denied => {
                return Err(ClientError::Conflict("request was denied".into()));
            }
        }

        self.registry.create(acting, request.requester_id).await
    }

    /// Deny a pending request as its recipient; starts the cooldown.
    pub async fn deny(&self, id: RequestId, acting: UserId) -> Result<ChatRequest> {
        let request = self.load_as_recipient(id, acting).await?;
        if request.status != RequestStatus::Pending {
            return Err(ClientError::Conflict(format!("request is {}", request.status)));
        }

        let updated = self
            .ctx
            .store()
            .transition_chat_request(
                id,
                RequestStatus::Pending,
                RequestStatus::Denied,
                self.ctx.now(),
                acting,
            )
            .await?
            .ok_or_else(|| ClientError::Conflict("request was answered concurrently".into()))?;

        info!(request = %id, "Chat request denied");
        self.merge(updated.clone());
        Ok(updated)
    }

    /// Reload every request we sent or received.
    pub async fn refresh(&self) -> Result<Vec<ChatRequest>> {
        let requests = self.ctx.store().list_chat_requests(self.ctx.me).await?;
        self.ctx.state.write(|s| s.requests = requests.clone());
        self.ctx.events.publish(ClientEvent::ChatRequestsChanged);
        Ok(requests)
    }

    pub fn on_remote_change(&self, event: &ChangeEvent) {
        let Row::ChatRequest(request) = &event.row else {
            return;
        };
        if !request.involves(self.ctx.me) {
            return;
        }
        match event.kind {
            ChangeKind::Delete => {
                self.ctx
                    .state
                    .write(|s| s.requests.retain(|r| r.id != request.id));
                self.ctx.events.publish(ClientEvent::ChatRequestsChanged);
            }
            ChangeKind::Insert | ChangeKind::Update => self.merge(request.clone()),
        }
    }

    /// Merge by id, newest first.
    fn merge(&self, request: ChatRequest) {
        self.ctx.state.write(|s| {
            match s.requests.iter_mut().find(|r| r.id == request.id) {
                Some(existing) => *existing = request,
                None => s.requests.insert(0, request),
            }
        });
        self.ctx.events.publish(ClientEvent::ChatRequestsChanged);
    }

    async fn load_as_recipient(&self, id: RequestId, acting: UserId) -> Result<ChatRequest> {
        let request = self
            .ctx
            .store()
            .get_chat_request(id)
            .await?
            .ok_or(ClientError::NotFound)?;
        if request.recipient_id != acting {
            return Err(ClientError::Unauthorized(
                "only the recipient can answer a chat request".into(),
            ));
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{settle, TestBackend};

    #[tokio::test]
    async fn request_deny_cooldown_scenario() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;

        assert!(a.can_request(bob.id).await.unwrap());
        let request = a.request_chat(bob.id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert!(!a.can_request(bob.id).await.unwrap());

        let denied = b.deny_request(request.id).await.unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);
        assert!(denied.denied_at.is_some());

        let remaining = a.cooldown_remaining(bob.id).await.unwrap().unwrap();
        assert_eq!(remaining, Duration::hours(24));
        assert!(!a.can_request(bob.id).await.unwrap());
        assert!(matches!(
            a.request_chat(bob.id).await,
            Err(ClientError::RequestRejected(RequestBlock::CoolingDown(_)))
        ));

        backend.clock.advance(Duration::hours(23));
        assert_eq!(
            a.cooldown_remaining(bob.id).await.unwrap(),
            Some(Duration::hours(1))
        );
        assert!(!a.can_request(bob.id).await.unwrap());

        backend.clock.advance(Duration::hours(1) + Duration::seconds(1));
        assert_eq!(a.cooldown_remaining(bob.id).await.unwrap(), None);
        assert!(a.can_request(bob.id).await.unwrap());
        a.request_chat(bob.id).await.unwrap();
    }

    #[tokio::test]
    async fn cooldown_is_per_direction() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;

        let request = a.request_chat(bob.id).await.unwrap();
        b.deny_request(request.id).await.unwrap();

        assert!(!a.can_request(bob.id).await.unwrap());
        assert!(b.can_request(alice.id).await.unwrap());
    }

    #[tokio::test]
    async fn pending_blocks_both_directions() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;

        a.request_chat(bob.id).await.unwrap();
        assert_eq!(
            b.check_request(alice.id).await.unwrap(),
            Some(RequestBlock::AlreadyPending)
        );
        assert!(matches!(
            a.request_chat(bob.id).await,
            Err(ClientError::RequestRejected(RequestBlock::AlreadyPending))
        ));
    }

    #[tokio::test]
    async fn self_requests_and_existing_conversations_are_blocked() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        backend.befriend(&alice, &bob).await;
        let a = backend.client(&alice).await;

        assert_eq!(
            a.check_request(alice.id).await.unwrap(),
            Some(RequestBlock::SelfRequest)
        );
        assert_eq!(
            a.check_request(bob.id).await.unwrap(),
            Some(RequestBlock::ConversationExists)
        );
    }

    #[tokio::test]
    async fn duplicate_accept_yields_one_conversation() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;

        let request = a.request_chat(bob.id).await.unwrap();
        let first = b.accept_request(request.id).await.unwrap();
        let second = b.accept_request(request.id).await.unwrap();
        assert_eq!(first.id, second.id);

        let directs = backend.store().list_direct_conversations(bob.id).await.unwrap();
        assert_eq!(directs.len(), 1);

        settle().await;
        assert_eq!(b.conversations().len(), 1);
        assert_eq!(a.conversations().len(), 1);
        assert_eq!(a.conversations()[0].id, first.id);
        assert!(!a.can_request(bob.id).await.unwrap());
    }

    #[tokio::test]
    async fn only_the_recipient_may_answer() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let carol = backend.user("carol").await;
        let a = backend.client(&alice).await;
        let c = backend.client(&carol).await;

        let request = a.request_chat(bob.id).await.unwrap();
        assert!(matches!(
            a.accept_request(request.id).await,
            Err(ClientError::Unauthorized(_))
        ));
        assert!(matches!(
            c.deny_request(request.id).await,
            Err(ClientError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn denied_request_cannot_be_accepted() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;

        let request = a.request_chat(bob.id).await.unwrap();
        b.deny_request(request.id).await.unwrap();
        assert!(matches!(
            b.accept_request(request.id).await,
            Err(ClientError::Conflict(_))
        ));
        assert!(matches!(
            b.deny_request(request.id).await,
            Err(ClientError::Conflict(_))
        ));
        assert!(backend
            .store()
            .find_direct_conversation(alice.id, bob.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn request_lists_follow_push_events() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;

        let request = a.request_chat(bob.id).await.unwrap();
        settle().await;
        assert_eq!(b.incoming_requests().len(), 1);
        assert_eq!(a.outgoing_requests().len(), 1);

        b.deny_request(request.id).await.unwrap();
        settle().await;
        assert!(b.incoming_requests().is_empty());
        assert_eq!(a.chat_requests()[0].status, RequestStatus::Denied);
    }

    #[test]
    fn remaining_is_human_readable() {
        assert_eq!(format_remaining(Duration::hours(23) + Duration::minutes(5)), "23h 5m");
        assert_eq!(format_remaining(Duration::hours(2)), "2h");
        assert_eq!(format_remaining(Duration::minutes(12)), "12m");
        assert_eq!(format_remaining(Duration::seconds(30)), "less than a minute");
        assert_eq!(
            RequestBlock::CoolingDown(Duration::hours(1)).to_string(),
            "try again in 1h"
        );
    }
}
