//! Durable channel → deployment id bindings.
//!
//! Layout (`.keeper/bindings.yaml`):
//!
//! ```yaml
//! bindings:
//!   owner: AKfycb...
//!   staff: AKfycb...
//! secrets:
//!   url_update_secret: ...
//! ```
//!
//! Loading never fails: a missing or unreadable document is an empty store.
//! Saving always rewrites the whole document atomically.

use crate::error::Result;
use crate::{io, paths};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingStore {
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
}

impl BindingStore {
    pub fn load(root: &Path) -> Self {
        let path = paths::bindings_path(root);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "binding store unreadable; starting empty");
                return Self::default();
            }
        };
        match serde_yaml::from_str::<Option<BindingStore>>(&data) {
            Ok(store) => store.unwrap_or_default().normalized(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "binding store unparsable; starting empty");
                Self::default()
            }
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::bindings_path(root);
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&path, data.as_bytes())
    }

    /// Drop blank ids and surrounding whitespace left by hand edits.
    fn normalized(mut self) -> Self {
        self.bindings = self
            .bindings
            .into_iter()
            .map(|(tag, id)| (tag, id.trim().to_string()))
            .filter(|(_, id)| !id.is_empty())
            .collect();
        self
    }

    pub fn binding(&self, tag: &str) -> Option<&str> {
        self.bindings.get(tag).map(String::as_str)
    }

    /// Record `id` as the current deployment for `tag`. Returns the id it replaced.
    pub fn bind(&mut self, tag: &str, id: &str) -> Option<String> {
        self.bindings.insert(tag.to_string(), id.to_string())
    }

    pub fn unbind(&mut self, tag: &str) -> Option<String> {
        self.bindings.remove(tag)
    }

    /// The channel currently bound to `id`, if any.
    pub fn owner_of(&self, id: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, bound)| bound.as_str() == id)
            .map(|(tag, _)| tag.as_str())
    }

    pub fn bound_ids(&self) -> BTreeSet<String> {
        self.bindings.values().cloned().collect()
    }

    pub fn secret(&self, name: &str) -> Option<&str> {
        self.secrets
            .get(name)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}
