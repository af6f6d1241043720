use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Realtime channel closed")]
    ChannelClosed,
}
