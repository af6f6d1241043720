//! Fixtures shared by the store tests.

use chrono::Utc;
use murmur_shared::{ConversationRow, Participant, Role, User, UserId};

use crate::database::Database;

pub(crate) fn user(name: &str) -> User {
    User {
        id: UserId::new(),
        username: Some(name.to_string()),
        fullname: format!("{name} fullname"),
        avatar_url: None,
        bio: None,
        email: Some(format!("{name}@example.org")),
    }
}

/// In-memory database seeded with the named users.
pub(crate) fn seeded(names: &[&str]) -> (Database, Vec<User>) {
    let db = Database::open_in_memory().expect("open in-memory db");
    let users: Vec<User> = names.iter().map(|n| user(n)).collect();
    for u in &users {
        db.upsert_user(u).expect("seed user");
    }
    (db, users)
}

/// Group created by `creator` with the creator bootstrapped as admin.
pub(crate) fn group(db: &Database, creator: UserId) -> ConversationRow {
    let row = ConversationRow::group("crew".into(), creator, Utc::now());
    db.insert_conversation(&row).expect("insert group");
    db.insert_participant(
        &Participant {
            conversation_id: row.id,
            user_id: creator,
            role: Role::Admin,
            joined_at: Utc::now(),
        },
        creator,
    )
    .expect("bootstrap admin");
    row
}
