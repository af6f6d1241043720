//! User directory and identity.
//!
//! [`Directory`] resolves user ids to profiles with an in-memory cache, so a
//! message list needs at most one batched lookup for the senders it has not
//! seen before. [`IdentityProvider`] is the seam to whatever authenticates
//! the user; [`LocalIdentity`] reads the profile straight from the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use murmur_shared::{ProfileUpdate, User, UserId};
use murmur_store::{BlobStore, StoreClient};

use crate::error::{ClientError, Result};

#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn StoreClient>,
    cache: Arc<Mutex<HashMap<UserId, User>>>,
    lookups: Arc<AtomicUsize>,
}

impl Directory {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self {
            store,
            cache: Arc::new(Mutex::new(HashMap::new())),
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn cached(&self, id: UserId) -> Option<User> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Insert or refresh a cached profile.
    pub fn remember(&self, user: User) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user.id, user);
    }

    /// Drop every cached profile.
    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        if let Some(user) = self.cached(id) {
            return Ok(user);
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let user = self.store.get_user(id).await?.ok_or(ClientError::NotFound)?;
        self.remember(user.clone());
        Ok(user)
    }

    /// Resolve many ids with one store round trip for the uncached ones.
    /// Unknown ids are absent from the result.
    pub async fn get_users(&self, ids: &[UserId]) -> Result<HashMap<UserId, User>> {
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for &id in ids {
            match self.cached(id) {
                Some(user) => {
                    found.insert(id, user);
                }
                None if !missing.contains(&id) => missing.push(id),
                None => {}
            }
        }

        if !missing.is_empty() {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            debug!(count = missing.len(), "Batched profile lookup");
            for user in self.store.get_users(&missing).await? {
                self.remember(user.clone());
                found.insert(user.id, user);
            }
        }

        Ok(found)
    }

    /// Users whose username or full name starts with `prefix`.
    pub async fn search_users(&self, prefix: &str, limit: u32) -> Result<Vec<User>> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let users = self.store.search_users(prefix, limit).await?;
        for user in &users {
            self.remember(user.clone());
        }
        Ok(users)
    }

    /// Store round trips made for profile lookups so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

/// Supplies the signed-in user and edits their profile.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self) -> Result<User>;
    async fn update_profile(&self, update: ProfileUpdate) -> Result<User>;
}

/// Identity backed by the user's row in the store.
pub struct LocalIdentity {
    user_id: UserId,
    store: Arc<dyn StoreClient>,
}

impl LocalIdentity {
    pub fn new(user_id: UserId, store: Arc<dyn StoreClient>) -> Self {
        Self { user_id, store }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn current_user(&self) -> Result<User> {
        self.store
            .get_user(self.user_id)
            .await?
            .ok_or(ClientError::NotFound)
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<User> {
        if let Some(name) = &update.fullname {
            if name.trim().is_empty() {
                return Err(ClientError::Validation("full name cannot be empty".into()));
            }
        }
        Ok(self.store.update_profile(self.user_id, &update).await?)
    }
}

/// Upload a new avatar for `user` and point the profile at it.
pub(crate) async fn update_avatar(
    identity: &dyn IdentityProvider,
    blobs: &dyn BlobStore,
    user: UserId,
    bytes: &[u8],
    extension: &str,
) -> Result<User> {
    let extension = extension.trim_start_matches('.');
    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ClientError::Validation(format!(
            "invalid avatar extension: {extension:?}"
        )));
    }

    let path = format!("avatars/{user}/{}.{extension}", uuid::Uuid::new_v4());
    let url = blobs.upload(&path, bytes).await?;
    debug!(user = %user, url = %url, "Avatar uploaded");

    identity
        .update_profile(ProfileUpdate {
            avatar_url: Some(url),
            ..Default::default()
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestBackend;

    #[tokio::test]
    async fn batched_lookup_hits_store_once() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let directory = Directory::new(backend.store());

        let users = directory
            .get_users(&[alice.id, bob.id, alice.id, UserId::new()])
            .await
            .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(directory.lookups(), 1);

        directory.get_user(bob.id).await.unwrap();
        directory.get_users(&[alice.id, bob.id]).await.unwrap();
        assert_eq!(directory.lookups(), 1);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let backend = TestBackend::new().await;
        let directory = Directory::new(backend.store());
        assert!(matches!(
            directory.get_user(UserId::new()).await,
            Err(ClientError::NotFound)
        ));
    }

    #[tokio::test]
    async fn search_matches_prefix() {
        let backend = TestBackend::new().await;
        backend.user("alice").await;
        backend.user("albert").await;
        backend.user("bob").await;
        let directory = Directory::new(backend.store());

        let hits = directory.search_users("al", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(directory.search_users("  ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn avatar_upload_updates_profile() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let identity = LocalIdentity::new(alice.id, backend.store());

        let updated = update_avatar(&identity, backend.blobs().as_ref(), alice.id, b"png", "png")
            .await
            .unwrap();
        let url = updated.avatar_url.unwrap();
        assert!(url.contains(&format!("avatars/{}", alice.id)));
        assert!(url.ends_with(".png"));

        assert!(matches!(
            update_avatar(&identity, backend.blobs().as_ref(), alice.id, b"x", "../x").await,
            Err(ClientError::Validation(_))
        ));
    }
}
