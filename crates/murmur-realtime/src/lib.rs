//! # murmur-realtime
//!
//! In-process realtime layer: row-change fan-out and presence channels.
//!
//! [`RealtimeHub`] is plugged into the store as its change sink and hands
//! each write to every [`ChangeSubscription`] whose filters match. Presence
//! and typing ride on [`PresenceChannel`]s, which always publish the
//! complete map.

pub mod error;
pub mod hub;
pub mod presence;

pub use error::RealtimeError;
pub use hub::{ChangeSubscription, Realtime, RealtimeHub};
pub use presence::{PresenceChannel, PresenceGuard, PresenceMap};
