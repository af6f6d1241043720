//! Presence and typing indicators.
//!
//! Nothing here is persisted. Both ride on realtime presence channels:
//! presence on one shared topic keyed by user id, typing on one topic per
//! conversation with a [`TypingPayload`]. Watchers always see the complete
//! map and rebuild their slice of state from it.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::debug;

use murmur_realtime::{PresenceGuard, PresenceMap};
use murmur_shared::constants::{PRESENCE_TOPIC, TYPING_TOPIC_PREFIX};
use murmur_shared::{ConversationId, UserId};

use crate::context::Context;
use crate::events::ClientEvent;

/// What a client publishes on a conversation's typing topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingPayload {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    pub typing: bool,
}

pub(crate) type PresenceCallback = Arc<dyn Fn(&BTreeSet<UserId>) + Send + Sync>;

#[derive(Clone)]
enum Watch {
    Presence(PresenceCallback),
    Typing {
        conversation: ConversationId,
        self_id: UserId,
        callback: PresenceCallback,
    },
}

struct TypingSession {
    guard: Arc<PresenceGuard>,
    clear: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    own: Option<PresenceGuard>,
    typing: HashMap<ConversationId, TypingSession>,
    watches: Vec<Watch>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
pub(crate) struct PresenceTracker {
    ctx: Context,
    inner: Arc<Mutex<Inner>>,
}

impl PresenceTracker {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track `user` as online until [`Self::reset`] or drop.
    pub fn announce_presence(&self, user: UserId) {
        let channel = self.ctx.backend.realtime.presence(PRESENCE_TOPIC);
        let guard = channel.track(
            &user.to_string(),
            json!({ "user_id": user, "online_at": self.ctx.now() }),
        );
        self.lock().own = Some(guard);
    }

    /// Track `user` and call `callback` with the full online set on every
    /// change.
    pub fn subscribe_presence(&self, user: UserId, callback: PresenceCallback) {
        self.announce_presence(user);
        self.add_watch(Watch::Presence(callback));
    }

    /// Publish whether `user` is typing in `conversation`. A `true` clears
    /// itself after the idle window unless announced again.
    pub fn announce_typing(&self, conversation: ConversationId, user: UserId, is_typing: bool) {
        let payload = |typing: bool| {
            json!(TypingPayload {
                user_id: user,
                conversation_id: conversation,
                typing,
            })
        };

        let mut inner = self.lock();
        let mut session = match inner.typing.remove(&conversation) {
            Some(mut session) => {
                if let Some(task) = session.clear.take() {
                    task.abort();
                }
                session.guard.update(payload(is_typing));
                session
            }
            None => {
                let channel = self.ctx.backend.realtime.presence(&typing_topic(conversation));
                TypingSession {
                    guard: Arc::new(channel.track(&user.to_string(), payload(is_typing))),
                    clear: None,
                }
            }
        };

        if is_typing {
            let guard = session.guard.clone();
            let idle = self.ctx.config.typing_idle;
            let cleared = payload(false);
            session.clear = Some(tokio::spawn(async move {
                tokio::time::sleep(idle).await;
                guard.update(cleared);
                debug!(conversation = %conversation, "Typing indicator expired");
            }));
        }
        inner.typing.insert(conversation, session);
    }

    /// Call `callback` with everyone but `self_id` typing in `conversation`.
    pub fn subscribe_typing(
        &self,
        conversation: ConversationId,
        self_id: UserId,
        callback: PresenceCallback,
    ) {
        self.add_watch(Watch::Typing {
            conversation,
            self_id,
            callback,
        });
    }

    /// Forget every ephemeral state: untrack ourselves, stop the watchers and
    /// clear the online and typing slices. Registered watches are kept for
    /// [`Self::resume`].
    pub fn reset(&self) {
        {
            let mut inner = self.lock();
            for task in inner.tasks.drain(..) {
                task.abort();
            }
            for (_, session) in inner.typing.drain() {
                if let Some(task) = session.clear {
                    task.abort();
                }
            }
            inner.own = None;
        }

        let typing: Vec<ConversationId> = self.ctx.state.write(|s| {
            s.online.clear();
            s.typing.drain().map(|(id, _)| id).collect()
        });
        self.ctx.events.publish(ClientEvent::PresenceChanged);
        for conversation in typing {
            self.ctx.events.publish(ClientEvent::TypingChanged(conversation));
        }
        debug!("Presence state reset");
    }

    /// Re-announce ourselves and restart every registered watch.
    pub fn resume(&self, user: UserId) {
        let watches = self.lock().watches.clone();
        if watches.iter().any(|w| matches!(w, Watch::Presence(_))) {
            self.announce_presence(user);
        }
        for watch in &watches {
            let task = self.spawn_watch(watch);
            self.lock().tasks.push(task);
        }
    }

    /// Reset and drop every registered watch.
    pub fn shutdown(&self) {
        self.reset();
        self.lock().watches.clear();
    }

    fn add_watch(&self, watch: Watch) {
        let task = self.spawn_watch(&watch);
        let mut inner = self.lock();
        inner.watches.push(watch);
        inner.tasks.push(task);
    }

    fn spawn_watch(&self, watch: &Watch) -> JoinHandle<()> {
        let state = self.ctx.state.clone();
        let events = self.ctx.events.clone();

        match watch.clone() {
            Watch::Presence(callback) => {
                let mut rx = self.ctx.backend.realtime.presence(PRESENCE_TOPIC).subscribe();
                tokio::spawn(async move {
                    loop {
                        let online = online_users(&rx.borrow_and_update());
                        state.write(|s| s.online = online.clone());
                        events.publish(ClientEvent::PresenceChanged);
                        callback(&online);
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                })
            }
            Watch::Typing {
                conversation,
                self_id,
                callback,
            } => {
                let mut rx = self
                    .ctx
                    .backend
                    .realtime
                    .presence(&typing_topic(conversation))
                    .subscribe();
                tokio::spawn(async move {
                    loop {
                        let typing = typing_users(&rx.borrow_and_update(), self_id);
                        state.write(|s| {
                            s.typing.insert(conversation, typing.clone());
                        });
                        events.publish(ClientEvent::TypingChanged(conversation));
                        callback(&typing);
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                })
            }
        }
    }
}

fn typing_topic(conversation: ConversationId) -> String {
    format!("{TYPING_TOPIC_PREFIX}{conversation}")
}

fn online_users(map: &PresenceMap) -> BTreeSet<UserId> {
    map.keys().filter_map(|key| key.parse().ok()).collect()
}

fn typing_users(map: &PresenceMap, self_id: UserId) -> BTreeSet<UserId> {
    map.values()
        .flatten()
        .filter_map(|value| serde_json::from_value::<TypingPayload>(value.clone()).ok())
        .filter(|p| p.typing && p.user_id != self_id)
        .map(|p| p.user_id)
        .collect()
}
