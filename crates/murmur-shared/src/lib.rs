//! Types shared by every murmur crate: identifiers, the persisted data model,
//! the row-change vocabulary used by the realtime layer, and a clock seam.

pub mod change;
pub mod clock;
pub mod constants;
pub mod error;
pub mod models;
pub mod types;

pub use change::{ChangeEvent, ChangeFilter, ChangeKind, ChangeSink, Row, Table};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ModelError;
pub use models::*;
pub use types::{ConversationId, MessageId, RequestId, UserId};
