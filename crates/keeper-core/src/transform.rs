//! Per-channel manifest variants.
//!
//! Two channels can share one source root and differ only in a manifest
//! field (who may open the web app, whose identity it runs as). The transform
//! rewrites the manifest before that channel's push; the returned guard puts
//! the original bytes back when dropped.

use crate::error::{KeeperError, Result};
use crate::io;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestTransform {
    /// JSON file relative to the project root, usually `appsscript.json`.
    pub file: String,
    /// Top-level keys overwritten in the manifest.
    #[serde(default)]
    pub set: Map<String, Value>,
}

impl ManifestTransform {
    /// Rewrite the manifest under `project_root`. The original contents come
    /// back when the guard is dropped or [`ManifestGuard::restore`] is called.
    pub fn apply(&self, project_root: &Path) -> Result<ManifestGuard> {
        let path = project_root.join(&self.file);
        let original = std::fs::read(&path).map_err(|e| manifest_error(&path, e))?;
        let mut manifest: Value =
            serde_json::from_slice(&original).map_err(|e| manifest_error(&path, e))?;
        let Some(object) = manifest.as_object_mut() else {
            return Err(manifest_error(&path, "top level is not a JSON object"));
        };
        for (key, value) in &self.set {
            object.insert(key.clone(), value.clone());
        }

        let mut data = serde_json::to_string_pretty(&manifest)?;
        data.push('\n');
        io::atomic_write(&path, data.as_bytes())?;
        tracing::debug!(file = %path.display(), keys = self.set.len(), "manifest transformed");

        Ok(ManifestGuard {
            path,
            original,
            restored: false,
        })
    }
}

fn manifest_error(path: &Path, reason: impl std::fmt::Display) -> KeeperError {
    KeeperError::Manifest {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Holds a transformed manifest's original bytes.
#[must_use = "dropping the guard immediately restores the manifest"]
#[derive(Debug)]
pub struct ManifestGuard {
    path: PathBuf,
    original: Vec<u8>,
    restored: bool,
}

impl ManifestGuard {
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        io::atomic_write(&self.path, &self.original)
    }
}

impl Drop for ManifestGuard {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = io::atomic_write(&self.path, &self.original) {
            tracing::error!(
                file = %self.path.display(),
                error = %e,
                "failed to restore manifest; restore it from version control"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
  "timeZone": "Asia/Tokyo",
  "webapp": { "access": "MYSELF", "executeAs": "USER_ACCESSING" }
}
"#;

    fn staff_transform() -> ManifestTransform {
        let mut set = Map::new();
        set.insert(
            "webapp".to_string(),
            json!({ "access": "ANYONE", "executeAs": "USER_DEPLOYING" }),
        );
        ManifestTransform {
            file: "appsscript.json".to_string(),
            set,
        }
    }

    #[test]
    fn apply_overwrites_keys_and_drop_restores_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("appsscript.json");
        std::fs::write(&path, MANIFEST).unwrap();

        {
            let _guard = staff_transform().apply(dir.path()).unwrap();
            let during: Value =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(during["webapp"]["access"], "ANYONE");
            assert_eq!(during["timeZone"], "Asia/Tokyo");
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), MANIFEST);
    }

    #[test]
    fn explicit_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("appsscript.json");
        std::fs::write(&path, MANIFEST).unwrap();
        let guard = staff_transform().apply(dir.path()).unwrap();
        guard.restore().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), MANIFEST);
    }

    #[test]
    fn missing_manifest_is_manifest_error() {
        let dir = TempDir::new().unwrap();
        let err = staff_transform().apply(dir.path()).unwrap_err();
        assert!(matches!(err, KeeperError::Manifest { .. }), "got {err:?}");
    }

    #[test]
    fn non_object_manifest_is_rejected_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("appsscript.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(staff_transform().apply(dir.path()).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2]");
    }

    #[test]
    fn transform_parses_from_yaml() {
        let yaml = "file: appsscript.json\nset:\n  webapp:\n    access: ANYONE\n";
        let t: ManifestTransform = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(t.set["webapp"]["access"], "ANYONE");
    }
}
