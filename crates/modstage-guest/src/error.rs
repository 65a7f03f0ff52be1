//! Error types for the guest runtime.

/// Errors that can occur in a guest runtime.
#[derive(Debug, thiserror::Error)]
pub enum GuestError {
    #[error("Guest runtime has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Guest thread panicked")]
    ThreadPanic,

    #[error("invoke '{0}' timed out")]
    InvokeTimeout(String),

    #[error("invoke '{command}' failed: {error}")]
    Command { command: String, error: String },

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}
