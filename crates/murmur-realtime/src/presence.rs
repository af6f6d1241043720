//! Presence channels.
//!
//! A presence channel is a topic on which clients track a key (usually their
//! user id) together with a JSON payload. Subscribers are handed the complete
//! map on every change, never a diff. A key may be tracked more than once
//! (several sessions of the same user); it stays present until every one of
//! its guards is dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

/// Full presence state: every tracked key with the payloads of its sessions.
pub type PresenceMap = BTreeMap<String, Vec<Value>>;

#[derive(Default)]
struct Sessions {
    next_ref: u64,
    by_key: BTreeMap<String, BTreeMap<u64, Value>>,
}

impl Sessions {
    fn snapshot(&self) -> PresenceMap {
        self.by_key
            .iter()
            .map(|(key, metas)| (key.clone(), metas.values().cloned().collect()))
            .collect()
    }
}

struct ChannelState {
    topic: String,
    sessions: Mutex<Sessions>,
    tx: watch::Sender<PresenceMap>,
}

impl ChannelState {
    fn modify(&self, f: impl FnOnce(&mut Sessions)) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut sessions);
        self.tx.send_replace(sessions.snapshot());
    }
}

#[derive(Clone)]
pub struct PresenceChannel {
    state: Arc<ChannelState>,
}

impl PresenceChannel {
    pub(crate) fn new(topic: &str) -> Self {
        let (tx, _rx) = watch::channel(PresenceMap::new());
        Self {
            state: Arc::new(ChannelState {
                topic: topic.to_string(),
                sessions: Mutex::new(Sessions::default()),
                tx,
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.state.topic
    }

    /// Start tracking `key`. The key is untracked when the guard is dropped.
    pub fn track(&self, key: &str, payload: Value) -> PresenceGuard {
        let mut session = 0;
        self.state.modify(|s| {
            s.next_ref += 1;
            session = s.next_ref;
            s.by_key
                .entry(key.to_string())
                .or_default()
                .insert(session, payload);
        });
        debug!(topic = %self.state.topic, key, "Tracking presence");

        PresenceGuard {
            state: self.state.clone(),
            key: key.to_string(),
            session,
        }
    }

    /// Watch the full map. The receiver starts with the current state.
    pub fn subscribe(&self) -> watch::Receiver<PresenceMap> {
        self.state.tx.subscribe()
    }

    pub fn current(&self) -> PresenceMap {
        self.state.tx.borrow().clone()
    }
}

/// A tracked presence session.
pub struct PresenceGuard {
    state: Arc<ChannelState>,
    key: String,
    session: u64,
}

impl PresenceGuard {
    /// Replace this session's payload; subscribers see a fresh sync.
    pub fn update(&self, payload: Value) {
        self.state.modify(|s| {
            if let Some(meta) = s
                .by_key
                .get_mut(&self.key)
                .and_then(|metas| metas.get_mut(&self.session))
            {
                *meta = payload;
            }
        });
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.state.modify(|s| {
            if let Some(metas) = s.by_key.get_mut(&self.key) {
                metas.remove(&self.session);
                if metas.is_empty() {
                    s.by_key.remove(&self.key);
                }
            }
        });
        debug!(topic = %self.state.topic, key = %self.key, "Untracked presence");
    }
}
