use crate::error::{KeeperError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const KEEPER_DIR: &str = ".keeper";
pub const CONFIG_FILE: &str = ".keeper/config.yaml";
pub const BINDINGS_FILE: &str = ".keeper/bindings.yaml";

pub const CLASP_JSON: &str = ".clasp.json";
pub const CLASP_IGNORE: &str = ".claspignore";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn keeper_dir(root: &Path) -> PathBuf {
    root.join(KEEPER_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn bindings_path(root: &Path) -> PathBuf {
    root.join(BINDINGS_FILE)
}

// ---------------------------------------------------------------------------
// Tag validation
// ---------------------------------------------------------------------------

static TAG_RE: OnceLock<Regex> = OnceLock::new();

fn tag_re() -> &'static Regex {
    TAG_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() || tag.len() > 64 || !tag_re().is_match(tag) {
        return Err(KeeperError::InvalidTag(tag.to_string()));
    }
    Ok(())
}
