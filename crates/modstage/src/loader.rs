//! Mod manifest loading.
//!
//! Loads manifests from disk. A mod directory carries either `mod.json` or
//! `mod.toml`; a mods directory holds one subdirectory per mod. Scanning is
//! tolerant: a broken manifest is logged and skipped, never fatal for its
//! neighbors.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use modstage_protocol::{ManifestError, ModManifest};

/// Error type for mod loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Mod path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Mod manifest not found in: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid manifest: {0}")]
    Invalid(#[from] ManifestError),
}

/// Mod loader
pub struct ModLoader;

impl ModLoader {
    /// Load and validate the manifest from a mod directory.
    pub async fn load(path: impl AsRef<Path>) -> Result<ModManifest, LoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(LoadError::PathNotFound(path.to_path_buf()));
        }

        let json_path = path.join("mod.json");
        let toml_path = path.join("mod.toml");

        let manifest: ModManifest = if json_path.exists() {
            let content = fs::read_to_string(&json_path).await?;
            serde_json::from_str(&content)?
        } else if toml_path.exists() {
            let content = fs::read_to_string(&toml_path).await?;
            toml::from_str(&content)?
        } else {
            return Err(LoadError::ManifestNotFound(path.to_path_buf()));
        };

        manifest.validate()?;
        info!(mod_id = %manifest.id, version = %manifest.version, "Loaded mod manifest");
        Ok(manifest)
    }

    /// Scan a mods directory, loading every subdirectory's manifest.
    ///
    /// Entries that fail to load are logged and skipped.
    pub async fn scan(dir: impl AsRef<Path>) -> Result<Vec<(PathBuf, ModManifest)>, LoadError> {
        let dir = dir.as_ref();
        let mut mods = Vec::new();

        if !dir.exists() {
            debug!("No mods directory at {}", dir.display());
            return Ok(mods);
        }

        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match Self::load(&path).await {
                Ok(manifest) => {
                    debug!(mod_id = %manifest.id, "Found mod at {}", path.display());
                    mods.push((path, manifest));
                }
                Err(e) => {
                    warn!("Failed to load mod from {}: {}", path.display(), e);
                }
            }
        }

        Ok(mods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_json_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mod.json"),
            r#"{"id": "modX", "version": "1.0.0", "components": {"Panel": "panel.html"}}"#,
        )
        .unwrap();

        let manifest = ModLoader::load(dir.path()).await.unwrap();
        assert_eq!(manifest.id, "modX");
        assert_eq!(
            manifest.components.get("Panel").map(String::as_str),
            Some("panel.html")
        );
    }

    #[tokio::test]
    async fn test_load_toml_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mod.toml"),
            "id = \"modY\"\nversion = \"0.2.0\"\npermissions = [\"overlay\"]\n",
        )
        .unwrap();

        let manifest = ModLoader::load(dir.path()).await.unwrap();
        assert_eq!(manifest.id, "modY");
        assert!(manifest.restriction_profile().allow_popups);
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ModLoader::load(dir.path()).await,
            Err(LoadError::ManifestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_skips_broken_mods() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good");
        std::fs::create_dir(&good).unwrap();
        std::fs::write(good.join("mod.json"), r#"{"id": "good", "version": "1.0.0"}"#).unwrap();

        let broken = dir.path().join("broken");
        std::fs::create_dir(&broken).unwrap();
        std::fs::write(broken.join("mod.json"), "{not json").unwrap();

        let invalid = dir.path().join("invalid");
        std::fs::create_dir(&invalid).unwrap();
        std::fs::write(invalid.join("mod.json"), r#"{"id": "", "version": "1"}"#).unwrap();

        let mods = ModLoader::scan(dir.path()).await.unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].1.id, "good");
    }

    #[tokio::test]
    async fn test_scan_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mods = ModLoader::scan(dir.path().join("nope")).await.unwrap();
        assert!(mods.is_empty());
    }
}
