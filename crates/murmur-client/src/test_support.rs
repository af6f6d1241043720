//! Multi-user fixtures: several clients on one in-memory backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use murmur_shared::{
    ChatRequest, Clock, ConversationId, ConversationRow, GroupUpdate, ManualClock, Message,
    MessageId, Participant, ProfileUpdate, RequestId, RequestStatus, Role, User, UserId,
};
use murmur_store::{
    BlobStore, Database, FsBlobStore, Result as StoreResult, StoreClient, StoreError,
};
use tempfile::TempDir;
use tokio::sync::Notify;

use crate::client::ChatClient;
use crate::config::ClientConfig;
use crate::context::Backend;
use crate::directory::LocalIdentity;

pub(crate) struct TestBackend {
    pub backend: Backend,
    pub clock: ManualClock,
    _blob_dir: TempDir,
}

impl TestBackend {
    pub async fn new() -> Self {
        let blob_dir = tempfile::tempdir().expect("blob dir");
        let blobs = FsBlobStore::new(
            blob_dir.path().to_path_buf(),
            "https://cdn.example.org",
            1024 * 1024,
        )
        .await
        .expect("blob store");
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let db = Database::open_in_memory().expect("in-memory db");

        Self {
            backend: Backend::assemble(db, Arc::new(blobs), Arc::new(clock.clone())),
            clock,
            _blob_dir: blob_dir,
        }
    }

    pub fn store(&self) -> Arc<dyn StoreClient> {
        self.backend.store.clone()
    }

    pub fn blobs(&self) -> Arc<dyn BlobStore> {
        self.backend.blobs.clone()
    }

    pub async fn user(&self, name: &str) -> User {
        let user = User {
            id: UserId::new(),
            username: Some(name.to_string()),
            fullname: format!("{name} fullname"),
            avatar_url: None,
            bio: None,
            email: Some(format!("{name}@example.org")),
        };
        self.backend.store.upsert_user(&user).await.expect("seed user");
        user
    }

    pub async fn client(&self, user: &User) -> ChatClient {
        self.client_on(self.backend.clone(), user).await
    }

    /// Client for `user` talking to a customised copy of the backend.
    pub async fn client_on(&self, backend: Backend, user: &User) -> ChatClient {
        let identity = Arc::new(LocalIdentity::new(user.id, self.store()));
        ChatClient::connect(backend, identity, ClientConfig::default())
            .await
            .expect("connect")
    }

    /// Direct conversation written straight to the store.
    pub async fn befriend(&self, a: &User, b: &User) -> ConversationId {
        let row = ConversationRow::direct(a.id, b.id, self.clock.now());
        self.backend
            .store
            .insert_conversation(&row)
            .await
            .expect("insert direct conversation");
        row.id
    }
}

/// Let spawned tasks (sync loops, presence watchers) drain their queues.
pub(crate) async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Store wrapper for exercising failure and interleaving paths. It can
/// refuse to add one user to any roster, and it can hold a listing call at a
/// [`Gate`] after the rows are read. Everything else goes to `inner`.
pub(crate) struct HookedStore {
    pub inner: Arc<dyn StoreClient>,
    pub refuse: Option<UserId>,
    pub messages_gate: Arc<Gate>,
    pub groups_gate: Arc<Gate>,
}

impl HookedStore {
    pub fn new(inner: Arc<dyn StoreClient>) -> Self {
        Self {
            inner,
            refuse: None,
            messages_gate: Arc::default(),
            groups_gate: Arc::default(),
        }
    }

    pub fn refusing(mut self, user: UserId) -> Self {
        self.refuse = Some(user);
        self
    }
}

/// One-shot pause point. Once armed, the next call through it signals
/// `reached` and waits for `release`.
#[derive(Default)]
pub(crate) struct Gate {
    armed: AtomicBool,
    reached: Notify,
    resume: Notify,
}

impl Gate {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.resume.notify_one();
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.resume.notified().await;
        }
    }
}

#[async_trait]
impl StoreClient for HookedStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }
    async fn get_users(&self, ids: &[UserId]) -> StoreResult<Vec<User>> {
        self.inner.get_users(ids).await
    }
    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        self.inner.upsert_user(user).await
    }
    async fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> StoreResult<User> {
        self.inner.update_profile(id, update).await
    }
    async fn search_users(&self, prefix: &str, limit: u32) -> StoreResult<Vec<User>> {
        self.inner.search_users(prefix, limit).await
    }
    async fn find_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> StoreResult<Option<ConversationRow>> {
        self.inner.find_direct_conversation(a, b).await
    }
    async fn insert_conversation(&self, row: &ConversationRow) -> StoreResult<()> {
        self.inner.insert_conversation(row).await
    }
    async fn get_conversation(&self, id: ConversationId) -> StoreResult<Option<ConversationRow>> {
        self.inner.get_conversation(id).await
    }
    async fn list_direct_conversations(&self, user: UserId) -> StoreResult<Vec<ConversationRow>> {
        self.inner.list_direct_conversations(user).await
    }
    async fn list_group_conversations(&self, user: UserId) -> StoreResult<Vec<ConversationRow>> {
        let rows = self.inner.list_group_conversations(user).await?;
        self.groups_gate.pass().await;
        Ok(rows)
    }
    async fn update_group(
        &self,
        id: ConversationId,
        update: &GroupUpdate,
        acting: UserId,
    ) -> StoreResult<ConversationRow> {
        self.inner.update_group(id, update, acting).await
    }
    async fn delete_conversation(&self, id: ConversationId, acting: UserId) -> StoreResult<bool> {
        self.inner.delete_conversation(id, acting).await
    }
    async fn insert_participant(&self, participant: &Participant, acting: UserId) -> StoreResult<()> {
        if self.refuse == Some(participant.user_id) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "backend unavailable",
            )));
        }
        self.inner.insert_participant(participant, acting).await
    }
    async fn list_participants(&self, conversation: ConversationId) -> StoreResult<Vec<Participant>> {
        self.inner.list_participants(conversation).await
    }
    async fn get_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> StoreResult<Option<Participant>> {
        self.inner.get_participant(conversation, user).await
    }
    async fn update_role(
        &self,
        conversation: ConversationId,
        user: UserId,
        role: Role,
        acting: UserId,
    ) -> StoreResult<Participant> {
        self.inner.update_role(conversation, user, role, acting).await
    }
    async fn delete_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
        acting: UserId,
    ) -> StoreResult<bool> {
        self.inner.delete_participant(conversation, user, acting).await
    }
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        self.inner.insert_message(message).await
    }
    async fn get_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        self.inner.get_message(id).await
    }
    async fn list_messages(&self, conversation: ConversationId) -> StoreResult<Vec<Message>> {
        let rows = self.inner.list_messages(conversation).await?;
        self.messages_gate.pass().await;
        Ok(rows)
    }
    async fn latest_message(&self, conversation: ConversationId) -> StoreResult<Option<Message>> {
        self.inner.latest_message(conversation).await
    }
    async fn update_message_content(
        &self,
        id: MessageId,
        content: &str,
        edited_at: DateTime<Utc>,
        acting: UserId,
    ) -> StoreResult<Message> {
        self.inner.update_message_content(id, content, edited_at, acting).await
    }
    async fn toggle_message_like(&self, id: MessageId, user: UserId) -> StoreResult<Message> {
        self.inner.toggle_message_like(id, user).await
    }
    async fn delete_message(&self, id: MessageId, acting: UserId) -> StoreResult<bool> {
        self.inner.delete_message(id, acting).await
    }
    async fn mark_messages_as_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.inner.mark_messages_as_read(conversation, reader, at).await
    }
    async fn unread_message_ids(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> StoreResult<Vec<MessageId>> {
        self.inner.unread_message_ids(conversation, reader).await
    }
    async fn insert_chat_request(&self, request: &ChatRequest) -> StoreResult<()> {
        self.inner.insert_chat_request(request).await
    }
    async fn get_chat_request(&self, id: RequestId) -> StoreResult<Option<ChatRequest>> {
        self.inner.get_chat_request(id).await
    }
    async fn find_pending_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> StoreResult<Option<ChatRequest>> {
        self.inner.find_pending_request(requester, recipient).await
    }
    async fn latest_denied_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> StoreResult<Option<ChatRequest>> {
        self.inner.latest_denied_request(requester, recipient).await
    }
    async fn has_accepted_request(&self, a: UserId, b: UserId) -> StoreResult<bool> {
        self.inner.has_accepted_request(a, b).await
    }
    async fn transition_chat_request(
        &self,
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
        acting: UserId,
    ) -> StoreResult<Option<ChatRequest>> {
        self.inner.transition_chat_request(id, from, to, at, acting).await
    }
    async fn list_chat_requests(&self, user: UserId) -> StoreResult<Vec<ChatRequest>> {
        self.inner.list_chat_requests(user).await
    }
}
