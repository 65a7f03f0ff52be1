//! Backend command bridge seam.
//!
//! The chat/LLM/TTS pipeline, persistence and the backend mod-script
//! runtime live behind this trait; the messaging core only ever calls it
//! and never implements it.

use async_trait::async_trait;
use serde_json::Value;

/// Error surfaced by the backend bridge.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BridgeError(pub String);

impl BridgeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The backend the host delegates to.
#[async_trait]
pub trait CommandBridge: Send + Sync {
    /// Perform a correlated command call. Failure surfaces as an error the
    /// gateway relays back to the guest in an `invoke-result`.
    async fn invoke(&self, command: &str, args: Value) -> Result<Value, BridgeError>;

    /// Fire-and-forget dispatch into the backend mod-script runtime,
    /// keyed `action:<name>` for guest actions and `event:<name>` for
    /// relayed host lifecycle events.
    async fn dispatch_script(&self, key: &str, data: Value) -> Result<(), BridgeError>;
}
