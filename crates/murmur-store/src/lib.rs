//! # murmur-store
//!
//! The persistent store behind murmur: users, conversations, participants,
//! messages and chat requests, backed by SQLite.
//!
//! [`Database`] is the synchronous handle with typed CRUD helpers per table.
//! The schema and the write helpers enforce the rules the backend is the
//! source of truth for (unique direct pairs, one pending request per pair,
//! admin-only roster changes, sender-only edits). [`SqliteStore`] wraps a
//! `Database` behind the async [`StoreClient`] trait the client core talks to
//! and emits a [`murmur_shared::ChangeEvent`] for every successful write.
//!
//! [`FsBlobStore`] is the filesystem implementation of the [`BlobStore`]
//! used for avatars and attachments.

pub mod blobs;
pub mod chat_requests;
pub mod client;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod participants;
pub mod users;

mod error;
mod sql;

#[cfg(test)]
pub(crate) mod test_util;

pub use blobs::{BlobStore, FsBlobStore};
pub use client::{SqliteStore, StoreClient};
pub use database::Database;
pub use error::{Result, StoreError};
