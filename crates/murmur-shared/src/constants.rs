/// Application name
pub const APP_NAME: &str = "murmur";

/// Hours a requester must wait after a denial before asking the same recipient again
pub const CHAT_REQUEST_COOLDOWN_HOURS: i64 = 24;

/// Typing indicators clear themselves after this many milliseconds without a keystroke
pub const TYPING_IDLE_MS: u64 = 3_000;

/// Maximum message length in characters
pub const MAX_MESSAGE_LEN: usize = 4_000;

/// Maximum group name length in characters
pub const MAX_GROUP_NAME_LEN: usize = 100;

/// Maximum attachment / avatar size in bytes (50 MiB)
pub const MAX_BLOB_SIZE: usize = 50 * 1024 * 1024;

/// Presence topic every signed-in client tracks itself on
pub const PRESENCE_TOPIC: &str = "online-users";

/// Prefix of the per-conversation typing topic
pub const TYPING_TOPIC_PREFIX: &str = "typing:";
