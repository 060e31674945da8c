//! Pre-push validation gate.
//!
//! Several applications can share one publish workspace, so every project
//! declares which identifiers its snapshot must and must not declare. The
//! check is a pure function over the snapshot text and runs for every project
//! before anything touches the network.

use crate::error::Result;
use crate::paths;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// File extensions scanned into a snapshot.
pub const SOURCE_EXTENSIONS: &[&str] = &["gs", "js", "ts", "html"];

const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", ".keeper"];

// ---------------------------------------------------------------------------
// GateRules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateRules {
    /// Identifiers that must not be declared anywhere in scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden: Vec<String>,
    /// Identifiers (entry points) that must be declared somewhere in scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Restrict the scan to these snapshot-relative files. Empty = all files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Lines the project's `.claspignore` must contain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_entries: Vec<String>,
}

impl GateRules {
    pub fn is_empty(&self) -> bool {
        self.forbidden.is_empty()
            && self.required.is_empty()
            && self.files.is_empty()
            && self.ignore_entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Violation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    #[error("forbidden identifier '{identifier}' is declared in {file}")]
    Forbidden { identifier: String, file: String },

    #[error("required identifier '{identifier}' is not declared")]
    MissingRequired { identifier: String },

    #[error("required file '{file}' is missing")]
    MissingFile { file: String },

    #[error("'{entry}' must be listed in {ignore_file}", ignore_file = paths::CLASP_IGNORE)]
    MissingIgnoreEntry { entry: String },
}

impl Violation {
    /// The identifier, file, or ignore entry that tripped the gate.
    pub fn offender(&self) -> &str {
        match self {
            Violation::Forbidden { identifier, .. } => identifier,
            Violation::MissingRequired { identifier } => identifier,
            Violation::MissingFile { file } => file,
            Violation::MissingIgnoreEntry { entry } => entry,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Path relative to the snapshot root, `/`-separated.
    pub path: String,
    pub text: String,
}

/// The textual contents of a project root as it would be pushed.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub files: Vec<SourceFile>,
    /// Contents of `.claspignore`, if present.
    pub ignore: Option<String>,
}

impl Snapshot {
    pub fn load(root: &Path) -> Result<Self> {
        let mut files = Vec::new();
        collect(root, root, &mut files)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let ignore_path = root.join(paths::CLASP_IGNORE);
        let ignore = if ignore_path.is_file() {
            Some(std::fs::read_to_string(&ignore_path)?)
        } else {
            None
        };
        Ok(Self { files, ignore })
    }

    pub fn file(&self, path: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<SourceFile>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if entry.file_type()?.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            collect(root, &path, out)?;
            continue;
        }
        let scanned = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));
        if !scanned {
            continue;
        }
        let bytes = std::fs::read(&path)?;
        out.push(SourceFile {
            path: relative(root, &path),
            text: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    Ok(())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// Check a snapshot against a rule set. Returns the first violation found.
pub fn validate(snapshot: &Snapshot, rules: &GateRules) -> std::result::Result<(), Violation> {
    let mut scope: Vec<&SourceFile> = Vec::new();
    if rules.files.is_empty() {
        scope.extend(snapshot.files.iter());
    } else {
        for file in &rules.files {
            let found = snapshot.file(file).ok_or_else(|| Violation::MissingFile {
                file: file.clone(),
            })?;
            scope.push(found);
        }
    }

    for identifier in &rules.forbidden {
        let re = declaration_re(identifier);
        if let Some(file) = scope.iter().find(|f| re.is_match(&f.text)) {
            return Err(Violation::Forbidden {
                identifier: identifier.clone(),
                file: file.path.clone(),
            });
        }
    }

    for identifier in &rules.required {
        let re = declaration_re(identifier);
        if !scope.iter().any(|f| re.is_match(&f.text)) {
            return Err(Violation::MissingRequired {
                identifier: identifier.clone(),
            });
        }
    }

    let ignore = snapshot.ignore.as_deref().unwrap_or("");
    for entry in &rules.ignore_entries {
        if !ignore.lines().any(|l| l.trim() == entry) {
            return Err(Violation::MissingIgnoreEntry {
                entry: entry.clone(),
            });
        }
    }

    Ok(())
}

/// Matches a top-level declaration of `identifier` in script source.
fn declaration_re(identifier: &str) -> Regex {
    let pattern = format!(
        r"\b(?:const|let|var|function|class)\s+{}\b",
        regex::escape(identifier)
    );
    // The identifier is escaped, so the pattern is always valid.
    Regex::new(&pattern).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
