//! # murmur-client
//!
//! Client-side synchronization core: keeps a consistent local view of
//! conversations, messages, unread counts, presence and typing state against
//! the store and its realtime echo, and enforces the chat-request and group
//! membership rules that decide who may talk to whom.
//!
//! [`ChatClient`] is the entry point. Everything a UI needs is a getter or an
//! action on it; [`ClientEvent`]s announce which slice of state changed.

pub mod client;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod events;
pub mod state;

mod groups;
mod ledger;
mod presence;
mod registry;
mod requests;
mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use context::Backend;
pub use directory::{Directory, IdentityProvider, LocalIdentity};
pub use error::{ClientError, Result};
pub use events::{ClientEvent, EventBus, EventReceiver};
pub use presence::TypingPayload;
pub use requests::{format_remaining, RequestBlock};
pub use state::ClientState;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` wins over the default
/// filter. Call once from the host application.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("murmur_client=debug,murmur_store=info,murmur_realtime=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
