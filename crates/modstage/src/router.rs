//! Message Router - directory of live gateway channels.
//!
//! Maps a channel name (the gateway's component identifier) to the handle
//! used to deliver messages into its guest context. Mounting order is
//! caller-controlled, so registration is last-register-wins; this is
//! deliberately different from the Slot Registry's override-wins rule.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use modstage_protocol::{ContextId, Message};

/// A communication handle toward one guest context.
#[derive(Clone)]
pub struct ChannelHandle {
    context_id: ContextId,
    to_guest: mpsc::UnboundedSender<Message>,
}

impl ChannelHandle {
    pub fn new(context_id: ContextId, to_guest: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            context_id,
            to_guest,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Deliver a message; returns false if the guest side is gone.
    pub fn deliver(&self, message: Message) -> bool {
        self.to_guest.send(message).is_ok()
    }
}

/// Directory of registered channels with targeted send and broadcast.
pub struct MessageRouter {
    channels: RwLock<HashMap<String, ChannelHandle>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new router wrapped in an Arc
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Associate a channel name with a handle, replacing any prior
    /// association for that name.
    pub fn register(&self, name: impl Into<String>, handle: ChannelHandle) {
        let name = name.into();
        let previous = self.channels.write().insert(name.clone(), handle);
        if previous.is_some() {
            tracing::debug!(channel = %name, "Replaced existing channel registration");
        } else {
            tracing::debug!(channel = %name, "Registered channel");
        }
    }

    /// Remove the association; idempotent.
    pub fn unregister(&self, name: &str) {
        if self.channels.write().remove(name).is_some() {
            tracing::debug!(channel = %name, "Unregistered channel");
        }
    }

    /// Deliver to the single handle registered under `name`.
    ///
    /// An unknown name is a logged no-op, not an error: gateways come and
    /// go and senders are not expected to track mount state.
    pub fn send(&self, name: &str, message: Message) -> bool {
        let handle = self.channels.read().get(name).cloned();
        match handle {
            Some(handle) => {
                if !handle.deliver(message) {
                    tracing::warn!(channel = %name, "Channel is dead, message dropped");
                    return false;
                }
                true
            }
            None => {
                tracing::warn!(channel = %name, "Send to unknown channel, message dropped");
                false
            }
        }
    }

    /// Deliver the same message to every handle registered at call time.
    ///
    /// Delivery is one sequential pass over a snapshot; one handle's
    /// failure never blocks the rest. Returns the number of successful
    /// deliveries.
    pub fn broadcast(&self, message: Message) -> usize {
        let snapshot: Vec<(String, ChannelHandle)> = self
            .channels
            .read()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect();

        let mut delivered = 0;
        for (name, handle) in snapshot {
            if handle.deliver(message.clone()) {
                delivered += 1;
            } else {
                tracing::warn!(channel = %name, "Broadcast delivery failed");
            }
        }
        delivered
    }

    /// Pure membership query.
    pub fn has(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
