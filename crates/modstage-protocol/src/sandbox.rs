//! Capability-to-restriction mapping for isolated contexts.
//!
//! The mapping is a pure function so it can be tested without constructing
//! a real isolated execution context. The default profile allows script
//! execution and nothing else; the only capability that currently widens it
//! is `overlay`, which additionally allows popup-style windows.

use serde::{Deserialize, Serialize};

/// Capability string granting popup-style windows.
pub const PERMISSION_OVERLAY: &str = "overlay";

/// Execution-restriction profile applied to an isolated guest context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionProfile {
    /// Script execution. Always granted; a context that cannot run scripts
    /// cannot host a guest runtime at all.
    pub allow_scripts: bool,
    /// Popup-style windows, granted by the `overlay` capability.
    pub allow_popups: bool,
}

impl RestrictionProfile {
    /// The default profile: script execution only.
    pub fn scripts_only() -> Self {
        Self {
            allow_scripts: true,
            allow_popups: false,
        }
    }

    /// Derive a profile from a set of declared capability strings.
    ///
    /// Unrecognized capabilities are ignored; they never widen the profile.
    pub fn for_permissions<'a, I>(permissions: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut profile = Self::scripts_only();
        for permission in permissions {
            if permission == PERMISSION_OVERLAY {
                profile.allow_popups = true;
            }
        }
        profile
    }
}

impl Default for RestrictionProfile {
    fn default() -> Self {
        Self::scripts_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_scripts_only() {
        let profile = RestrictionProfile::for_permissions([]);
        assert!(profile.allow_scripts);
        assert!(!profile.allow_popups);
    }

    #[test]
    fn test_overlay_allows_popups() {
        let profile = RestrictionProfile::for_permissions(["overlay"]);
        assert!(profile.allow_scripts);
        assert!(profile.allow_popups);
    }

    #[test]
    fn test_unknown_capabilities_ignored() {
        let profile = RestrictionProfile::for_permissions(["filesystem", "network"]);
        assert_eq!(profile, RestrictionProfile::scripts_only());

        let profile = RestrictionProfile::for_permissions(["network", "overlay"]);
        assert!(profile.allow_popups);
    }
}
