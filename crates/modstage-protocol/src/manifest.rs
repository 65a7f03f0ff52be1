//! Mod manifest types.
//!
//! The manifest is produced by the mod-loading subsystem and read-only to
//! the messaging core: the core only consumes `id`, `permissions` and the
//! `components` slot map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::sandbox::RestrictionProfile;

/// Manifest describing a unit of third-party mod content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModManifest {
    /// Unique mod identifier.
    pub id: String,
    /// Semantic version string.
    pub version: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,

    /// Declared capability strings (e.g. "overlay").
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Backend script entry point.
    #[serde(default)]
    pub entry: Option<String>,
    /// UI entry point rendered outside any named slot.
    #[serde(default)]
    pub ui_entry: Option<String>,
    /// Slot name -> resource locator for slot-claiming UI components.
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Theme resource locator.
    #[serde(default)]
    pub theme: Option<String>,
    /// Layout resource locator.
    #[serde(default)]
    pub layout: Option<String>,
    /// Additional backend script files.
    #[serde(default)]
    pub scripts: Vec<String>,
}

impl ModManifest {
    /// Minimal structural validation; payload semantics stay with the
    /// mod-loading subsystem.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError::MissingId);
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError::MissingVersion(self.id.clone()));
        }
        if self.components.keys().any(|s| s.trim().is_empty()) {
            return Err(ManifestError::EmptySlotName(self.id.clone()));
        }
        Ok(())
    }

    /// Derive the execution-restriction profile from the declared
    /// permissions.
    pub fn restriction_profile(&self) -> RestrictionProfile {
        RestrictionProfile::for_permissions(self.permissions.iter().map(String::as_str))
    }

    /// Whether the mod declares the given capability.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Errors from manifest validation.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Mod manifest is missing an id")]
    MissingId,

    #[error("Mod '{0}' is missing a version")]
    MissingVersion(String),

    #[error("Mod '{0}' declares a component with an empty slot name")]
    EmptySlotName(String),
}
