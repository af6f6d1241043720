//! Realtime sync loop.
//!
//! Subscribes to the change feed for the rows this client can see and hands
//! each event to [`Core::handle_change`]. Message and roster filters are
//! scoped to the conversations in the registry; whenever that set changes
//! the loop subscribes again and catches up on the conversations it gained.
//! The first subscription is opened before the task starts so nothing
//! written after `spawn` returns is missed.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_realtime::ChangeSubscription;
use murmur_shared::{ChangeFilter, ConversationId, Table, UserId};

use crate::client::Core;
use crate::events::ClientEvent;

/// Conversations the change feed is currently scoped to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Scope {
    pub conversations: BTreeSet<ConversationId>,
    pub groups: BTreeSet<ConversationId>,
}

impl Scope {
    fn of(core: &Core) -> Self {
        core.ctx.state.read(|s| {
            let mut scope = Scope::default();
            for conversation in &s.conversations {
                scope.conversations.insert(conversation.id);
                if conversation.is_group() {
                    scope.groups.insert(conversation.id);
                }
            }
            scope
        })
    }
}

/// Change filters for `me`. Rows naming `me` are always covered, so a new
/// conversation is heard of even before it is in `scope`.
pub(crate) fn filters(me: UserId, scope: &Scope) -> Vec<ChangeFilter> {
    let mut filters = vec![
        ChangeFilter::table(Table::Conversations).eq("user_a", me),
        ChangeFilter::table(Table::Conversations).eq("user_b", me),
        ChangeFilter::table(Table::ConversationParticipants).eq("user_id", me),
        ChangeFilter::table(Table::ChatRequests).eq("recipient_id", me),
        ChangeFilter::table(Table::ChatRequests).eq("requester_id", me),
    ];
    for group in &scope.groups {
        filters.push(ChangeFilter::table(Table::Conversations).eq("id", group));
        filters.push(ChangeFilter::table(Table::ConversationParticipants).eq("conversation_id", group));
    }
    for conversation in &scope.conversations {
        filters.push(ChangeFilter::table(Table::Messages).eq("conversation_id", conversation));
    }
    filters
}

fn subscribe(core: &Core, scope: &Scope) -> ChangeSubscription {
    let me = core.ctx.me;
    let subscription = core.ctx.backend.realtime.subscribe(filters(me, scope));
    debug!(user = %me, conversations = scope.conversations.len(), "Realtime subscription opened");
    subscription
}

pub(crate) fn spawn(core: Arc<Core>) -> JoinHandle<()> {
    let me = core.ctx.me;
    let mut scope = Scope::of(&core);
    let mut subscription = subscribe(&core, &scope);
    let mut events = core.ctx.events.subscribe();

    tokio::spawn(async move {
        info!(user = %me, "Sync loop started");
        loop {
            tokio::select! {
                change = subscription.recv() => match change {
                    Ok(event) => core.handle_change(event).await,
                    Err(e) => {
                        warn!(user = %me, error = %e, "Change feed closed");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Ok(ClientEvent::ConversationsChanged) | Err(RecvError::Lagged(_)) => {}
                    Ok(_) => continue,
                    Err(RecvError::Closed) => break,
                },
            }

            let current = Scope::of(&core);
            if current == scope {
                continue;
            }
            let gained: Vec<ConversationId> = current
                .conversations
                .difference(&scope.conversations)
                .copied()
                .collect();

            let mut previous = std::mem::replace(&mut subscription, subscribe(&core, &current));
            while let Some(event) = previous.try_recv() {
                core.handle_change(event).await;
            }
            drop(previous);
            scope = current;

            for conversation in gained {
                if let Err(e) = core.catch_up(conversation).await {
                    warn!(conversation = %conversation, error = %e, "Catch-up failed");
                }
            }
        }
    })
}
