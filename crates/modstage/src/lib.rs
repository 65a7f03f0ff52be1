//! modstage - Mod sandbox messaging & extensibility core
//!
//! This crate provides the host side of the sandbox protocol, including:
//! - Message routing between mounted mod surfaces via `router`
//! - UI extension points with override-wins semantics via `slots`
//! - Per-surface trust boundaries via `gateway`
//! - Guest action/event translation via `dispatch`
//! - Mod manifest loading via `loader`

// Re-export the shared protocol types
pub use modstage_protocol as protocol;

// Backend seam
pub mod bridge;

// Guest action/event translation
pub mod dispatch;

// Error types
pub mod error;

// Trust boundary per mounted surface
pub mod gateway;

// Session-scoped integration layer
pub mod host;

// Manifest loading
pub mod loader;

// Channel directory
pub mod router;

// Extension point directory
pub mod slots;

pub use bridge::{BridgeError, CommandBridge};
pub use dispatch::{ActionDispatcher, EventObserver, HostNotification};
pub use error::{Error, Result};
pub use gateway::HostGateway;
pub use host::{ContextLauncher, ModHost};
pub use loader::{LoadError, ModLoader};
pub use router::{ChannelHandle, MessageRouter};
pub use slots::{ChangeListener, SlotComponent, SlotRegistry, SlotSubscription};
