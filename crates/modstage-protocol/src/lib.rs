//! Shared protocol types for the modstage sandbox system.
//!
//! This crate defines the boundary between the host and isolated guest
//! contexts. Both sides depend on these types to ensure a stable
//! serialization contract:
//! - The message envelope exchanged over the channel pair
//! - Opaque context identity used to validate message origin
//! - The mod manifest (identity, permissions, entry points)
//! - The capability-to-restriction-profile mapping

pub mod manifest;
pub mod message;
pub mod sandbox;

pub use manifest::{ManifestError, ModManifest};
pub use message::{
    ActionPayload, ContextId, EventPayload, GuestFrame, GuestLink, InvokePayload,
    InvokeResultPayload, Message, EVENT_LOG, EVENT_UPDATE,
};
pub use sandbox::{RestrictionProfile, PERMISSION_OVERLAY};
