//! The client facade.
//!
//! [`ChatClient`] wires the components to one shared state container and a
//! realtime sync loop. UI code reads state through the getters and changes
//! it through the actions; [`ClientEvent`](crate::ClientEvent)s say which getters to re-read.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use murmur_shared::{
    Attachment, ChangeEvent, ChangeKind, ChatRequest, Conversation, ConversationId, Message,
    MessageId, MessageView, ProfileUpdate, RequestId, RequestStatus, Role, Row, User, UserId,
};

use crate::config::ClientConfig;
use crate::context::{Backend, Context};
use crate::directory::{self, Directory, IdentityProvider};
use crate::error::{ClientError, Result};
use crate::events::{EventBus, EventReceiver};
use crate::groups::GroupAuthority;
use crate::ledger::MessageLedger;
use crate::presence::PresenceTracker;
use crate::registry::ConversationRegistry;
use crate::requests::{ChatRequests, RequestBlock};
use crate::state::SharedState;
use crate::sync;

/// Components of one signed-in client, shared with the sync loop.
pub(crate) struct Core {
    pub(crate) ctx: Context,
    pub(crate) registry: ConversationRegistry,
    pub(crate) ledger: MessageLedger,
    pub(crate) presence: PresenceTracker,
    pub(crate) requests: ChatRequests,
    pub(crate) groups: GroupAuthority,
    identity: Arc<dyn IdentityProvider>,
}

impl Core {
    fn new(ctx: Context, identity: Arc<dyn IdentityProvider>) -> Self {
        let registry = ConversationRegistry::new(ctx.clone());
        Self {
            ledger: MessageLedger::new(ctx.clone()),
            presence: PresenceTracker::new(ctx.clone()),
            requests: ChatRequests::new(ctx.clone(), registry.clone()),
            groups: GroupAuthority::new(ctx.clone(), registry.clone()),
            registry,
            identity,
            ctx,
        }
    }

    /// Route one change event to the components that own the affected state.
    /// Failures are logged, never propagated: the next reload recovers.
    pub(crate) async fn handle_change(&self, event: ChangeEvent) {
        if let Err(e) = self.apply_change(&event).await {
            warn!(table = %event.table(), error = %e, "Failed to apply remote change");
        }
    }

    async fn apply_change(&self, event: &ChangeEvent) -> Result<()> {
        match (&event.kind, &event.row) {
            (_, Row::Conversation(_)) | (_, Row::Participant(_)) => {
                self.registry.on_remote_change(event).await?;
            }
            (ChangeKind::Insert, Row::Message(message)) => {
                self.registry.on_remote_change(event).await?;
                self.ledger.on_remote_insert(message.clone()).await?;

                let active = self.ctx.state.read(|s| s.active);
                if active == Some(message.conversation_id) && message.sender_id != self.ctx.me {
                    self.mark_read(message.conversation_id).await?;
                }
            }
            (ChangeKind::Update, Row::Message(message)) => {
                self.registry.on_remote_change(event).await?;
                self.ledger.on_remote_update(message.clone());
            }
            (ChangeKind::Delete, Row::Message(message)) => {
                self.registry.on_remote_change(event).await?;
                self.ledger.on_remote_delete(message);
            }
            (_, Row::ChatRequest(_)) => self.requests.on_remote_change(event),
        }
        Ok(())
    }

    async fn mark_read(&self, conversation: ConversationId) -> Result<usize> {
        let count = self.ledger.mark_read(conversation, self.ctx.me).await?;
        self.registry.clear_unread(conversation);
        Ok(count)
    }

    /// Re-read a conversation that just came into the change feed's scope,
    /// so writes made before the feed covered it are not missed.
    pub(crate) async fn catch_up(&self, conversation: ConversationId) -> Result<()> {
        if self.registry.refresh(conversation).await?.is_none() {
            return Ok(());
        }
        if self.ctx.state.read(|s| s.active) == Some(conversation) {
            self.ledger.load(conversation).await?;
            self.mark_read(conversation).await?;
        } else {
            self.registry.recount(conversation).await?;
        }
        Ok(())
    }

    async fn select(&self, conversation: ConversationId) -> Result<()> {
        self.registry.select(conversation)?;
        self.ledger.load(conversation).await?;
        self.mark_read(conversation).await?;
        Ok(())
    }
}

/// A signed-in user's view of the chat backend.
///
/// Dropping the client stops its sync loop and takes the user offline.
pub struct ChatClient {
    pub(crate) core: Arc<Core>,
    sync: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Sign in as the identity's current user, start listening for changes
    /// and load conversations and chat requests.
    pub async fn connect(
        backend: Backend,
        identity: Arc<dyn IdentityProvider>,
        config: ClientConfig,
    ) -> Result<Self> {
        let user = identity.current_user().await?;
        let me = user.id;

        let directory = Directory::new(backend.store.clone());
        directory.remember(user);
        let ctx = Context {
            me,
            backend,
            config: Arc::new(config),
            state: SharedState::new(),
            events: EventBus::default(),
            directory,
        };

        let core = Arc::new(Core::new(ctx, identity));
        let client = Self {
            sync: Mutex::new(Some(sync::spawn(core.clone()))),
            core,
        };

        let conversations = client.core.registry.load(me).await?;
        client.core.requests.refresh().await?;
        info!(user = %me, conversations = conversations.len(), "Client connected");
        Ok(client)
    }

    fn sync_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.sync.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop every ephemeral and cached state and rebuild it from the store.
    pub async fn reconnect(&self) -> Result<()> {
        let me = self.me();
        if let Some(task) = self.sync_slot().take() {
            task.abort();
        }
        self.core.presence.reset();
        self.core.ctx.directory.clear();

        *self.sync_slot() = Some(sync::spawn(self.core.clone()));

        let user = self.core.identity.current_user().await?;
        self.core.ctx.directory.remember(user);
        self.core.registry.load(me).await?;
        self.core.requests.refresh().await?;
        self.core.presence.resume(me);

        if let Some(active) = self.core.ctx.state.read(|s| s.active) {
            self.core.select(active).await?;
        }
        info!(user = %me, "Client reconnected");
        Ok(())
    }

    // -- identity -----------------------------------------------------------

    pub fn me(&self) -> UserId {
        self.core.ctx.me
    }

    pub async fn current_user(&self) -> Result<User> {
        self.core.ctx.directory.get_user(self.me()).await
    }

    pub fn events(&self) -> EventReceiver {
        self.core.ctx.events.subscribe()
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User> {
        let user = self.core.identity.update_profile(update).await?;
        self.core.ctx.directory.remember(user.clone());
        Ok(user)
    }

    pub async fn update_avatar(&self, bytes: &[u8], extension: &str) -> Result<User> {
        let user = directory::update_avatar(
            self.core.identity.as_ref(),
            self.core.ctx.backend.blobs.as_ref(),
            self.me(),
            bytes,
            extension,
        )
        .await?;
        self.core.ctx.directory.remember(user.clone());
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.core.ctx.directory.get_user(id).await
    }

    pub async fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<User>> {
        self.core.ctx.directory.search_users(prefix, limit).await
    }

    // -- getters ------------------------------------------------------------

    /// Most recent activity first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.core.ctx.state.read(|s| s.conversations.clone())
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.core.ctx.state.read(|s| s.active)
    }

    /// Messages of the active conversation, oldest first.
    pub fn messages(&self) -> Vec<MessageView> {
        self.core.ctx.state.read(|s| s.messages.clone())
    }

    pub fn unread_counts(&self) -> HashMap<ConversationId, usize> {
        self.core.ctx.state.read(|s| s.unread_counts())
    }

    pub fn unread_count(&self, conversation: ConversationId) -> usize {
        self.core.ctx.state.read(|s| s.unread_count(conversation))
    }

    pub fn online_users(&self) -> BTreeSet<UserId> {
        self.core.ctx.state.read(|s| s.online.clone())
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.core.ctx.state.read(|s| s.online.contains(&user))
    }

    /// Everyone but us currently typing in `conversation`.
    pub fn typing_users(&self, conversation: ConversationId) -> BTreeSet<UserId> {
        self.core
            .ctx
            .state
            .read(|s| s.typing.get(&conversation).cloned().unwrap_or_default())
    }

    /// Every request we sent or received, newest first.
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.core.ctx.state.read(|s| s.requests.clone())
    }

    pub fn incoming_requests(&self) -> Vec<ChatRequest> {
        let me = self.me();
        self.pending_requests(|r| r.recipient_id == me)
    }

    pub fn outgoing_requests(&self) -> Vec<ChatRequest> {
        let me = self.me();
        self.pending_requests(|r| r.requester_id == me)
    }

    fn pending_requests(&self, keep: impl Fn(&ChatRequest) -> bool) -> Vec<ChatRequest> {
        self.core.ctx.state.read(|s| {
            s.requests
                .iter()
                .filter(|r| r.status == RequestStatus::Pending && keep(r))
                .cloned()
                .collect()
        })
    }

    // -- conversations and messages -----------------------------------------

    pub async fn load_conversations(&self) -> Result<Vec<Conversation>> {
        self.core.registry.load(self.me()).await
    }

    /// Open the direct conversation with `other`. Only allowed once the two
    /// already talk or a chat request between them was accepted.
    pub async fn open_direct(&self, other: UserId) -> Result<Conversation> {
        let me = self.me();
        let store = self.core.ctx.store();
        let allowed = store.find_direct_conversation(me, other).await?.is_some()
            || store.has_accepted_request(me, other).await?;
        if !allowed {
            if let Some(block @ RequestBlock::AlreadyPending) =
                self.core.requests.check_request(me, other).await?
            {
                return Err(ClientError::RequestRejected(block));
            }
            return Err(ClientError::Unauthorized(
                "send a chat request before starting a conversation".into(),
            ));
        }
        self.core.registry.create(me, other).await
    }

    /// Make `conversation` the open one, load its messages and mark them
    /// read.
    pub async fn select_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<MessageView>> {
        self.core.select(conversation).await?;
        Ok(self.messages())
    }

    pub async fn send_message(
        &self,
        conversation: ConversationId,
        content: &str,
        attachment: Option<Attachment>,
        reply_to: Option<MessageId>,
    ) -> Result<MessageView> {
        let view = self
            .core
            .ledger
            .send(conversation, content, attachment, reply_to)
            .await?;
        self.core.registry.note_message(&view.message);
        Ok(view)
    }

    pub async fn edit_message(&self, id: MessageId, content: &str) -> Result<Message> {
        let updated = self.core.ledger.edit(id, content).await?;
        self.core.registry.note_message(&updated);
        Ok(updated)
    }

    pub async fn toggle_like(&self, id: MessageId) -> Result<Message> {
        self.core.ledger.toggle_like(id).await
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<()> {
        let deleted = self.core.ledger.delete(id).await?;
        self.core.registry.note_message_deleted(&deleted).await
    }

    /// Mark everything in `conversation` read. Returns how many messages
    /// changed; calling it again returns 0.
    pub async fn mark_read(&self, conversation: ConversationId) -> Result<usize> {
        self.core.mark_read(conversation).await
    }

    pub async fn upload_attachment(
        &self,
        conversation: ConversationId,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<Attachment> {
        self.core
            .ledger
            .upload_attachment(conversation, file_name, mime_type, bytes)
            .await
    }

    // -- presence and typing ------------------------------------------------

    pub fn announce_presence(&self) {
        self.core.presence.announce_presence(self.me());
    }

    /// Go online and receive the full online set on every change.
    pub fn subscribe_presence(
        &self,
        callback: impl Fn(&BTreeSet<UserId>) + Send + Sync + 'static,
    ) {
        self.core
            .presence
            .subscribe_presence(self.me(), Arc::new(callback));
    }

    pub fn announce_typing(&self, conversation: ConversationId, is_typing: bool) {
        self.core
            .presence
            .announce_typing(conversation, self.me(), is_typing);
    }

    pub fn subscribe_typing(
        &self,
        conversation: ConversationId,
        callback: impl Fn(&BTreeSet<UserId>) + Send + Sync + 'static,
    ) {
        self.core
            .presence
            .subscribe_typing(conversation, self.me(), Arc::new(callback));
    }

    // -- chat requests ------------------------------------------------------

    pub async fn can_request(&self, recipient: UserId) -> Result<bool> {
        self.core.requests.can_request(self.me(), recipient).await
    }

    /// Why a request to `recipient` would be refused right now, if it would.
    pub async fn check_request(&self, recipient: UserId) -> Result<Option<RequestBlock>> {
        self.core.requests.check_request(self.me(), recipient).await
    }

    pub async fn request_chat(&self, recipient: UserId) -> Result<ChatRequest> {
        self.core.requests.create(self.me(), recipient).await
    }

    pub async fn accept_request(&self, id: RequestId) -> Result<Conversation> {
        self.core.requests.accept(id, self.me()).await
    }

    pub async fn deny_request(&self, id: RequestId) -> Result<ChatRequest> {
        self.core.requests.deny(id, self.me()).await
    }

    pub async fn cooldown_remaining(&self, recipient: UserId) -> Result<Option<Duration>> {
        self.core
            .requests
            .cooldown_remaining(self.me(), recipient)
            .await
    }

    // -- groups -------------------------------------------------------------

    pub async fn create_group(&self, name: &str, members: &[UserId]) -> Result<Conversation> {
        self.core
            .groups
            .create_group(name, self.me(), members)
            .await
    }

    pub async fn add_member(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Conversation> {
        self.core
            .groups
            .add_member(conversation, self.me(), user)
            .await
    }

    pub async fn remove_member(&self, conversation: ConversationId, user: UserId) -> Result<()> {
        self.core
            .groups
            .remove_member(conversation, self.me(), user)
            .await
    }

    pub async fn set_role(
        &self,
        conversation: ConversationId,
        user: UserId,
        role: Role,
    ) -> Result<Conversation> {
        self.core
            .groups
            .set_role(conversation, self.me(), user, role)
            .await
    }

    pub async fn rename_group(
        &self,
        conversation: ConversationId,
        name: &str,
    ) -> Result<Conversation> {
        self.core
            .groups
            .rename_group(conversation, self.me(), name)
            .await
    }

    pub async fn change_group_icon(
        &self,
        conversation: ConversationId,
        bytes: &[u8],
        extension: &str,
    ) -> Result<Conversation> {
        self.core
            .groups
            .change_group_icon(conversation, self.me(), bytes, extension)
            .await
    }

    pub async fn leave_group(&self, conversation: ConversationId) -> Result<()> {
        self.core
            .groups
            .leave_group(conversation, self.me())
            .await
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(task) = self.sync_slot().take() {
            task.abort();
        }
        self.core.presence.shutdown();
        debug!(user = %self.core.ctx.me, "Client dropped");
    }
}
