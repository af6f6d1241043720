//! Group membership authority.
//!
//! Every roster change is checked here first so the user gets a clear
//! answer, and again by the store, which has the final word. Members are
//! only admissible if the person adding them already talks to them: an
//! existing direct conversation or an accepted chat request in either
//! direction.

use std::collections::BTreeSet;

use tracing::{info, warn};

use murmur_shared::constants::MAX_GROUP_NAME_LEN;
use murmur_shared::{
    Conversation, ConversationId, ConversationRow, GroupUpdate, Participant, Role, UserId,
};

use crate::context::Context;
use crate::error::{ClientError, Result};
use crate::registry::ConversationRegistry;

#[derive(Clone)]
pub(crate) struct GroupAuthority {
    ctx: Context,
    registry: ConversationRegistry,
}

impl GroupAuthority {
    pub fn new(ctx: Context, registry: ConversationRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Create a group with `creator` as its admin.
    ///
    /// Nothing is written unless every member is admissible. If a write fails
    /// half way, the conversation is deleted again, taking any participant
    /// rows with it.
    pub async fn create_group(
        &self,
        name: &str,
        creator: UserId,
        members: &[UserId],
    ) -> Result<Conversation> {
        let name = validate_name(name)?;

        let members: Vec<UserId> = members
            .iter()
            .copied()
            .filter(|m| *m != creator)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut inadmissible = Vec::new();
        for &member in &members {
            if !self.admissible(creator, member).await? {
                inadmissible.push(member);
            }
        }
        if !inadmissible.is_empty() {
            warn!(count = inadmissible.len(), "Group members not admissible");
            return Err(ClientError::InadmissibleMembers(inadmissible));
        }

        let row = ConversationRow::group(name, creator, self.ctx.now());
        self.ctx.store().insert_conversation(&row).await?;

        if let Err(e) = self.populate(row.id, creator, &members).await {
            warn!(conversation = %row.id, error = %e, "Group creation failed, rolling back");
            if let Err(cleanup) = self.ctx.store().delete_conversation(row.id, creator).await {
                warn!(conversation = %row.id, error = %cleanup, "Rollback failed");
            }
            return Err(e);
        }

        info!(conversation = %row.id, members = members.len(), "Group created");
        self.registry
            .refresh(row.id)
            .await?
            .ok_or(ClientError::NotFound)
    }

    /// Creator first, as admin, so the later inserts pass the admin check.
    async fn populate(
        &self,
        conversation: ConversationId,
        creator: UserId,
        members: &[UserId],
    ) -> Result<()> {
        let store = self.ctx.store();
        store
            .insert_participant(&self.participant(conversation, creator, Role::Admin), creator)
            .await?;
        for &member in members {
            store
                .insert_participant(&self.participant(conversation, member, Role::Member), creator)
                .await?;
        }
        Ok(())
    }

    pub async fn add_member(
        &self,
        conversation: ConversationId,
        acting: UserId,
        user: UserId,
    ) -> Result<Conversation> {
        self.require_admin(conversation, acting).await?;
        if !self.admissible(acting, user).await? {
            return Err(ClientError::InadmissibleMembers(vec![user]));
        }

        self.ctx
            .store()
            .insert_participant(&self.participant(conversation, user, Role::Member), acting)
            .await?;
        info!(conversation = %conversation, user = %user, "Member added");
        self.refreshed(conversation).await
    }

    /// Admins may remove anyone; anybody may remove themselves.
    pub async fn remove_member(
        &self,
        conversation: ConversationId,
        acting: UserId,
        user: UserId,
    ) -> Result<()> {
        if acting == user {
            return self.leave_group(conversation, acting).await;
        }
        self.require_admin(conversation, acting).await?;

        if !self
            .ctx
            .store()
            .delete_participant(conversation, user, acting)
            .await?
        {
            return Err(ClientError::NotFound);
        }
        info!(conversation = %conversation, user = %user, "Member removed");
        self.registry.refresh(conversation).await?;
        Ok(())
    }

    /// Change a member's role. The last admin cannot be demoted.
    pub async fn set_role(
        &self,
        conversation: ConversationId,
        acting: UserId,
        user: UserId,
        role: Role,
    ) -> Result<Conversation> {
        self.require_admin(conversation, acting).await?;

        let roster = self.ctx.store().list_participants(conversation).await?;
        let target = roster
            .iter()
            .find(|p| p.user_id == user)
            .ok_or(ClientError::NotFound)?;
        let admins = roster.iter().filter(|p| p.role == Role::Admin).count();
        if target.role == Role::Admin && role == Role::Member && admins == 1 {
            return Err(ClientError::Conflict(
                "a group needs at least one admin".into(),
            ));
        }

        self.ctx
            .store()
            .update_role(conversation, user, role, acting)
            .await?;
        info!(conversation = %conversation, user = %user, role = %role, "Role changed");
        self.refreshed(conversation).await
    }

    pub async fn rename_group(
        &self,
        conversation: ConversationId,
        acting: UserId,
        name: &str,
    ) -> Result<Conversation> {
        let name = validate_name(name)?;
        self.require_admin(conversation, acting).await?;

        self.ctx
            .store()
            .update_group(
                conversation,
                &GroupUpdate {
                    name: Some(name),
                    icon_url: None,
                },
                acting,
            )
            .await?;
        info!(conversation = %conversation, "Group renamed");
        self.refreshed(conversation).await
    }

    /// Upload a new icon and point the group at it.
    pub async fn change_group_icon(
        &self,
        conversation: ConversationId,
        acting: UserId,
        bytes: &[u8],
        extension: &str,
    ) -> Result<Conversation> {
        self.require_admin(conversation, acting).await?;
        let extension = extension.trim_start_matches('.');
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ClientError::Validation(format!(
                "invalid icon extension: {extension:?}"
            )));
        }

        let path = format!(
            "group-icons/{conversation}/{}.{extension}",
            uuid::Uuid::new_v4()
        );
        let url = self.ctx.backend.blobs.upload(&path, bytes).await?;
        self.ctx
            .store()
            .update_group(
                conversation,
                &GroupUpdate {
                    name: None,
                    icon_url: Some(url),
                },
                acting,
            )
            .await?;
        info!(conversation = %conversation, "Group icon changed");
        self.refreshed(conversation).await
    }

    /// Remove `user` from the group.
    ///
    /// The last admin leaving a group that still has members promotes the
    /// longest-standing member first. The last participant leaving deletes
    /// the group.
    pub async fn leave_group(&self, conversation: ConversationId, user: UserId) -> Result<()> {
        let store = self.ctx.store();
        let roster = store.list_participants(conversation).await?;
        let me = roster
            .iter()
            .find(|p| p.user_id == user)
            .ok_or(ClientError::NotFound)?;
        let others: Vec<&Participant> = roster.iter().filter(|p| p.user_id != user).collect();

        if others.is_empty() {
            store.delete_conversation(conversation, user).await?;
            info!(conversation = %conversation, "Last participant left, group deleted");
            self.registry.forget(conversation);
            return Ok(());
        }

        let other_admin = others.iter().any(|p| p.role == Role::Admin);
        if me.role == Role::Admin && !other_admin {
            // roster is ordered by joined_at
            let heir = others[0].user_id;
            store
                .update_role(conversation, heir, Role::Admin, user)
                .await?;
            info!(conversation = %conversation, user = %heir, "Promoted to admin");
        }

        store.delete_participant(conversation, user, user).await?;
        info!(conversation = %conversation, user = %user, "Left group");
        if user == self.ctx.me {
            self.registry.forget(conversation);
        }
        Ok(())
    }

    async fn admissible(&self, a: UserId, b: UserId) -> Result<bool> {
        let store = self.ctx.store();
        if store.find_direct_conversation(a, b).await?.is_some() {
            return Ok(true);
        }
        Ok(store.has_accepted_request(a, b).await?)
    }

    async fn require_admin(&self, conversation: ConversationId, acting: UserId) -> Result<()> {
        match self
            .ctx
            .store()
            .get_participant(conversation, acting)
            .await?
        {
            Some(p) if p.role == Role::Admin => Ok(()),
            Some(_) => Err(ClientError::Unauthorized(
                "only group admins can do that".into(),
            )),
            None => Err(ClientError::Unauthorized(
                "not a participant of this group".into(),
            )),
        }
    }

    async fn refreshed(&self, conversation: ConversationId) -> Result<Conversation> {
        self.registry
            .refresh(conversation)
            .await?
            .ok_or(ClientError::NotFound)
    }

    fn participant(&self, conversation: ConversationId, user: UserId, role: Role) -> Participant {
        Participant {
            conversation_id: conversation,
            user_id: user,
            role,
            joined_at: self.ctx.now(),
        }
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ClientError::Validation("group name is empty".into()));
    }
    if name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(ClientError::Validation(format!(
            "group name is longer than {MAX_GROUP_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{settle, HookedStore, TestBackend};
    use chrono::Duration;
    use murmur_shared::ConversationKind;
    use std::sync::Arc;

    fn roster(conversation: &Conversation) -> Vec<(UserId, Role)> {
        match &conversation.kind {
            ConversationKind::Group { participants, .. } => {
                participants.iter().map(|m| (m.user.id, m.role)).collect()
            }
            ConversationKind::Direct { .. } => Vec::new(),
        }
    }

    #[tokio::test]
    async fn creator_is_admin_and_members_join() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let carol = backend.user("carol").await;
        backend.befriend(&alice, &bob).await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;
        let c = backend.client(&carol).await;

        let request = c.request_chat(alice.id).await.unwrap();
        a.accept_request(request.id).await.unwrap();
        let group = a
            .create_group("  Weekend  ", &[bob.id, carol.id, bob.id, alice.id])
            .await
            .unwrap();

        assert!(matches!(
            &group.kind,
            ConversationKind::Group { name, created_by, .. }
                if name == "Weekend" && *created_by == Some(alice.id)
        ));
        let members = roster(&group);
        assert_eq!(members.len(), 3);
        assert_eq!(members[0], (alice.id, Role::Admin));
        assert_eq!(group.role_of(bob.id), Some(Role::Member));

        settle().await;
        assert!(b.conversations().iter().any(|conv| conv.id == group.id));
        assert!(c.conversations().iter().any(|conv| conv.id == group.id));
    }

    #[tokio::test]
    async fn one_inadmissible_member_leaves_nothing_behind() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let stranger = backend.user("stranger").await;
        backend.befriend(&alice, &bob).await;
        let a = backend.client(&alice).await;

        let err = a
            .create_group("crew", &[bob.id, stranger.id])
            .await
            .unwrap_err();
        match err {
            ClientError::InadmissibleMembers(ids) => assert_eq!(ids, vec![stranger.id]),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(backend
            .store()
            .list_group_conversations(alice.id)
            .await
            .unwrap()
            .is_empty());
        assert!(backend
            .store()
            .list_group_conversations(bob.id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(a.conversations().len(), 1);
    }

    #[tokio::test]
    async fn pending_request_does_not_make_a_member_admissible() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let a = backend.client(&alice).await;
        a.request_chat(bob.id).await.unwrap();

        assert!(matches!(
            a.create_group("crew", &[bob.id]).await,
            Err(ClientError::InadmissibleMembers(_))
        ));
    }

    #[tokio::test]
    async fn failed_member_insert_rolls_back_the_group() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let carol = backend.user("carol").await;
        backend.befriend(&alice, &bob).await;
        backend.befriend(&alice, &carol).await;

        let mut flaky = backend.backend.clone();
        flaky.store = Arc::new(HookedStore::new(backend.store()).refusing(carol.id));
        let a = backend.client_on(flaky, &alice).await;

        let result = a.create_group("crew", &[bob.id, carol.id]).await;
        assert!(matches!(result, Err(ClientError::Transient(_))));

        assert!(backend
            .store()
            .list_group_conversations(alice.id)
            .await
            .unwrap()
            .is_empty());
        assert!(backend
            .store()
            .list_group_conversations(bob.id)
            .await
            .unwrap()
            .is_empty());
        settle().await;
        assert!(a.conversations().iter().all(|conv| !conv.is_group()));
    }

    #[tokio::test]
    async fn member_may_leave_but_not_remove_others() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let carol = backend.user("carol").await;
        backend.befriend(&alice, &bob).await;
        backend.befriend(&alice, &carol).await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;

        let group = a
            .create_group("crew", &[bob.id, carol.id])
            .await
            .unwrap();
        settle().await;

        assert!(matches!(
            b.remove_member(group.id, carol.id).await,
            Err(ClientError::Unauthorized(_))
        ));
        b.remove_member(group.id, bob.id).await.unwrap();

        let remaining = backend.store().list_participants(group.id).await.unwrap();
        let ids: Vec<UserId> = remaining.iter().map(|p| p.user_id).collect();
        assert_eq!(ids, vec![alice.id, carol.id]);
        assert!(b.conversations().iter().all(|conv| conv.id != group.id));

        settle().await;
        let seen_by_alice = a
            .conversations()
            .into_iter()
            .find(|conv| conv.id == group.id)
            .unwrap();
        assert_eq!(roster(&seen_by_alice).len(), 2);
    }

    #[tokio::test]
    async fn server_rejects_roster_changes_by_non_admins() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let carol = backend.user("carol").await;
        backend.befriend(&alice, &bob).await;
        backend.befriend(&alice, &carol).await;
        let a = backend.client(&alice).await;
        let group = a.create_group("crew", &[bob.id, carol.id]).await.unwrap();

        // Skipping the client-side check still hits the store's.
        let result = backend
            .store()
            .delete_participant(group.id, carol.id, bob.id)
            .await;
        assert!(matches!(
            result.map_err(ClientError::from),
            Err(ClientError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn admin_operations() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let carol = backend.user("carol").await;
        backend.befriend(&alice, &bob).await;
        backend.befriend(&alice, &carol).await;
        let a = backend.client(&alice).await;
        let b = backend.client(&bob).await;

        let group = a.create_group("crew", &[bob.id]).await.unwrap();
        settle().await;

        assert!(matches!(
            b.add_member(group.id, carol.id).await,
            Err(ClientError::Unauthorized(_))
        ));
        assert!(matches!(
            b.rename_group(group.id, "mine now").await,
            Err(ClientError::Unauthorized(_))
        ));

        let group = a.add_member(group.id, carol.id).await.unwrap();
        assert_eq!(group.role_of(carol.id), Some(Role::Member));
        assert!(matches!(
            a.add_member(group.id, carol.id).await,
            Err(ClientError::Conflict(_))
        ));

        let renamed = a.rename_group(group.id, "crew v2").await.unwrap();
        assert!(matches!(
            renamed.kind,
            ConversationKind::Group { ref name, .. } if name == "crew v2"
        ));
        assert!(matches!(
            a.rename_group(group.id, " ").await,
            Err(ClientError::Validation(_))
        ));

        let with_icon = a.change_group_icon(group.id, b"png", "png").await.unwrap();
        assert!(matches!(
            with_icon.kind,
            ConversationKind::Group { icon_url: Some(ref url), .. } if url.contains("group-icons")
        ));

        let promoted = a.set_role(group.id, bob.id, Role::Admin).await.unwrap();
        assert_eq!(promoted.role_of(bob.id), Some(Role::Admin));
        b.remove_member(group.id, carol.id).await.unwrap();

        settle().await;
        let seen_by_bob = b
            .conversations()
            .into_iter()
            .find(|conv| conv.id == group.id)
            .unwrap();
        assert_eq!(seen_by_bob.role_of(bob.id), Some(Role::Admin));
        assert!(matches!(
            seen_by_bob.kind,
            ConversationKind::Group { ref name, .. } if name == "crew v2"
        ));
    }

    #[tokio::test]
    async fn last_admin_cannot_be_demoted() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        backend.befriend(&alice, &bob).await;
        let a = backend.client(&alice).await;
        let group = a.create_group("crew", &[bob.id]).await.unwrap();

        assert!(matches!(
            a.set_role(group.id, alice.id, Role::Member).await,
            Err(ClientError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn last_admin_leaving_promotes_longest_standing_member() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let bob = backend.user("bob").await;
        let carol = backend.user("carol").await;
        backend.befriend(&alice, &bob).await;
        backend.befriend(&alice, &carol).await;
        let a = backend.client(&alice).await;

        let group = a.create_group("crew", &[bob.id]).await.unwrap();
        backend.clock.advance(Duration::minutes(5));
        a.add_member(group.id, carol.id).await.unwrap();

        a.leave_group(group.id).await.unwrap();

        let roster = backend.store().list_participants(group.id).await.unwrap();
        let roles: Vec<(UserId, Role)> = roster.iter().map(|p| (p.user_id, p.role)).collect();
        assert_eq!(roles, vec![(bob.id, Role::Admin), (carol.id, Role::Member)]);
        assert!(a.conversations().iter().all(|conv| conv.id != group.id));
    }

    #[tokio::test]
    async fn last_participant_leaving_deletes_the_group() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let a = backend.client(&alice).await;

        let group = a.create_group("solo", &[]).await.unwrap();
        a.leave_group(group.id).await.unwrap();
        assert!(backend.store().get_conversation(group.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_or_long_names_are_rejected() {
        let backend = TestBackend::new().await;
        let alice = backend.user("alice").await;
        let a = backend.client(&alice).await;

        assert!(matches!(
            a.create_group("   ", &[]).await,
            Err(ClientError::Validation(_))
        ));
        let long = "n".repeat(MAX_GROUP_NAME_LEN + 1);
        assert!(matches!(
            a.create_group(&long, &[]).await,
            Err(ClientError::Validation(_))
        ));
    }
}
