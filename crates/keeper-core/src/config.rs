use crate::error::{KeeperError, Result};
use crate::gate::GateRules;
use crate::paths;
use crate::transform::ManifestTransform;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PlatformSettings
// ---------------------------------------------------------------------------

pub const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    /// Overrides clasp discovery, e.g. `npx clasp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_address_template")]
    pub address_template: String,
    #[serde(default = "default_trusted_domains")]
    pub trusted_domains: Vec<String>,
    /// Hard cap on live deployment records per platform project.
    #[serde(default = "default_deployment_limit")]
    pub deployment_limit: usize,
    #[serde(default = "default_version_ceiling")]
    pub version_ceiling: u32,
    #[serde(default = "default_version_warn_margin")]
    pub version_warn_margin: u32,
}

fn default_timeout() -> u64 {
    120
}

fn default_address_template() -> String {
    "https://script.google.com/macros/s/{id}/exec".to_string()
}

fn default_trusted_domains() -> Vec<String> {
    vec!["script.google.com".to_string()]
}

fn default_deployment_limit() -> usize {
    20
}

fn default_version_ceiling() -> u32 {
    200
}

fn default_version_warn_margin() -> u32 {
    50
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            command: None,
            timeout_seconds: default_timeout(),
            address_template: default_address_template(),
            trusted_domains: default_trusted_domains(),
            deployment_limit: default_deployment_limit(),
            version_ceiling: default_version_ceiling(),
            version_warn_margin: default_version_warn_margin(),
        }
    }
}

impl PlatformSettings {
    /// Derive the permanent address of a deployment record.
    pub fn address_of(&self, id: &str, query: Option<&str>) -> String {
        let base = self.address_template.replace(ID_PLACEHOLDER, id);
        match query {
            Some(q) if !q.is_empty() => {
                let sep = if base.contains('?') { '&' } else { '?' };
                format!("{base}{sep}{q}")
            }
            _ => base,
        }
    }

    /// True once the version counter is inside the warning margin.
    pub fn near_version_ceiling(&self, count: u32) -> bool {
        count >= self.version_ceiling.saturating_sub(self.version_warn_margin)
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Channel {
    pub tag: String,
    /// Description prefix written on every update; discovery matches on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Query string appended to the derived address (e.g. `staff=1`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default = "default_allow_create")]
    pub allow_create: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<ManifestTransform>,
}

fn default_allow_create() -> bool {
    true
}

impl Channel {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            label: None,
            query: None,
            allow_create: true,
            transform: None,
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.tag)
    }

    pub fn description(&self, date: NaiveDate) -> String {
        format!("{} {}", self.label(), date.format("%Y-%m-%d"))
    }

    /// A record belongs to this channel when its description is the label,
    /// or the label followed by a space (the dated form we write).
    pub fn matches_description(&self, description: &str) -> bool {
        let label = self.label();
        let description = description.trim();
        description == label
            || description
                .strip_prefix(label)
                .is_some_and(|rest| rest.starts_with(' '))
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// One platform project: a source root pushed as a unit, and the channels
/// deployed from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    pub name: String,
    #[serde(default = "default_project_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub rules: GateRules,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

impl Project {
    pub fn source_root(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.root)
    }
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Propagation {
    /// Channel whose address is sent.
    pub from: String,
    /// Channel whose running instance receives it.
    pub to: String,
    pub action: String,
    /// Key into the binding store's secrets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub propagations: Vec<Propagation>,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            platform: PlatformSettings::default(),
            projects: Vec::new(),
            propagations: Vec::new(),
        }
    }
}

impl Config {
    /// Starter config written by `keeper init`: one project at the root with
    /// a single channel.
    pub fn starter() -> Self {
        Self {
            projects: vec![Project {
                name: "main".to_string(),
                root: default_project_root(),
                rules: GateRules::default(),
                channels: vec![Channel::new("main")],
            }],
            ..Self::default()
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(KeeperError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Write the starter config unless one exists. Returns true if written.
    pub fn write_starter(root: &Path) -> Result<bool> {
        let data = serde_yaml::to_string(&Self::starter())?;
        crate::io::write_if_missing(&paths::config_path(root), data.as_bytes())
    }

    /// Every channel in declaration order, paired with its project.
    pub fn channels(&self) -> impl Iterator<Item = (&Project, &Channel)> {
        self.projects
            .iter()
            .flat_map(|p| p.channels.iter().map(move |c| (p, c)))
    }

    pub fn channel(&self, tag: &str) -> Result<(&Project, &Channel)> {
        self.channels()
            .find(|(_, c)| c.tag == tag)
            .ok_or_else(|| KeeperError::UnknownChannel(tag.to_string()))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut error = |message: String| {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message,
            })
        };

        if self.projects.is_empty() {
            error("no projects configured".to_string());
        }

        let mut seen_tags = HashSet::new();
        let mut seen_projects = HashSet::new();
        for project in &self.projects {
            if !seen_projects.insert(project.name.as_str()) {
                error(format!("duplicate project name '{}'", project.name));
            }
            if project.channels.is_empty() {
                error(format!("project '{}' has no channels", project.name));
            }
            if project.channels.len() > self.platform.deployment_limit {
                error(format!(
                    "project '{}' declares {} channels but the platform allows {} deployments",
                    project.name,
                    project.channels.len(),
                    self.platform.deployment_limit
                ));
            }
            for channel in &project.channels {
                if paths::validate_tag(&channel.tag).is_err() {
                    error(format!("invalid channel tag '{}'", channel.tag));
                }
                if !seen_tags.insert(channel.tag.as_str()) {
                    error(format!("duplicate channel tag '{}'", channel.tag));
                }
                if channel.label().trim().is_empty() {
                    error(format!("channel '{}' has an empty label", channel.tag));
                }
            }
            // Discovery must never attribute one channel's record to another.
            for (i, a) in project.channels.iter().enumerate() {
                for b in &project.channels[i + 1..] {
                    if a.matches_description(b.label()) || b.matches_description(a.label()) {
                        error(format!(
                            "channels '{}' and '{}' have overlapping labels '{}' and '{}'",
                            a.tag,
                            b.tag,
                            a.label(),
                            b.label()
                        ));
                    }
                }
            }
        }

        for prop in &self.propagations {
            for tag in [&prop.from, &prop.to] {
                if !seen_tags.contains(tag.as_str()) {
                    error(format!(
                        "propagation '{}' references unknown channel '{}'",
                        prop.action, tag
                    ));
                }
            }
            if prop.from == prop.to {
                error(format!(
                    "propagation '{}' sends channel '{}' to itself",
                    prop.action, prop.from
                ));
            }
        }

        if !self.platform.address_template.contains(ID_PLACEHOLDER) {
            error(format!(
                "platform.address_template must contain '{ID_PLACEHOLDER}'"
            ));
        }

        if self.platform.trusted_domains.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "platform.trusted_domains is empty: every propagation will be rejected"
                    .to_string(),
            });
        }

        if self.platform.version_warn_margin >= self.platform.version_ceiling {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "platform.version_warn_margin={} is not below version_ceiling={} \
                     (the version warning will always fire)",
                    self.platform.version_warn_margin, self.platform.version_ceiling
                ),
            });
        }

        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: 1
projects:
  - name: main
    root: .
    rules:
      ignore_entries: [ChecklistApp.gs]
    channels:
      - tag: owner
        label: owner-app
      - tag: staff
        query: staff=1
        transform:
          file: appsscript.json
          set:
            webapp:
              access: ANYONE
              executeAs: USER_DEPLOYING
  - name: checklist
    root: checklist-app
    rules:
      forbidden: [SHEET_NAME]
      required: [doGet]
      files: [Code.gs]
    channels:
      - tag: checklist
        allow_create: false
propagations:
  - from: staff
    to: owner
    action: setStaffUrl
    secret: url_update_secret
"#;

    #[test]
    fn sample_config_parses_with_defaults() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.projects.len(), 2);
        assert_eq!(cfg.platform.timeout_seconds, 120);
        assert_eq!(cfg.platform.deployment_limit, 20);
        assert_eq!(cfg.platform.trusted_domains, vec!["script.google.com"]);

        let tags: Vec<&str> = cfg.channels().map(|(_, c)| c.tag.as_str()).collect();
        assert_eq!(tags, vec!["owner", "staff", "checklist"]);

        let (project, checklist) = cfg.channel("checklist").unwrap();
        assert_eq!(project.name, "checklist");
        assert!(!checklist.allow_create);
        assert_eq!(project.rules.required, vec!["doGet"]);

        let (_, staff) = cfg.channel("staff").unwrap();
        assert!(staff.allow_create);
        assert_eq!(staff.transform.as_ref().unwrap().file, "appsscript.json");
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn unknown_channel_lookup_fails() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert!(matches!(
            cfg.channel("nope"),
            Err(KeeperError::UnknownChannel(t)) if t == "nope"
        ));
    }

    #[test]
    fn channel_rejects_unknown_fields() {
        let yaml = "projects:\n  - name: main\n    channels:\n      - tag: owner\n        lable: x\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn address_derivation() {
        let p = PlatformSettings::default();
        assert_eq!(
            p.address_of("AKfycbABC", None),
            "https://script.google.com/macros/s/AKfycbABC/exec"
        );
        assert_eq!(
            p.address_of("AKfycbABC", Some("staff=1")),
            "https://script.google.com/macros/s/AKfycbABC/exec?staff=1"
        );
        let templated = PlatformSettings {
            address_template: "https://x.test/run?d={id}".to_string(),
            ..PlatformSettings::default()
        };
        assert_eq!(
            templated.address_of("abc", Some("v=2")),
            "https://x.test/run?d=abc&v=2"
        );
    }

    #[test]
    fn description_matching_requires_label_boundary() {
        let mut ch = Channel::new("owner");
        assert!(ch.matches_description("owner"));
        assert!(ch.matches_description("owner 2026-01-02"));
        assert!(!ch.matches_description("owners 2026-01-02"));
        assert!(!ch.matches_description("co-owner 2026-01-02"));

        ch.label = Some("オーナー用".to_string());
        assert!(ch.matches_description("オーナー用 2026-01-02"));
        assert!(!ch.matches_description("owner 2026-01-02"));
    }

    #[test]
    fn description_is_dated_label() {
        let ch = Channel::new("checklist");
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(ch.description(date), "checklist 2026-03-09");
        assert!(ch.matches_description(&ch.description(date)));
    }

    #[test]
    fn version_ceiling_margin() {
        let p = PlatformSettings::default();
        assert!(!p.near_version_ceiling(149));
        assert!(p.near_version_ceiling(150));
        assert!(p.near_version_ceiling(250));
    }

    #[test]
    fn validate_duplicate_tags_and_bad_propagation() {
        let yaml = r#"
projects:
  - name: a
    channels: [{tag: owner}]
  - name: b
    channels: [{tag: owner}, {tag: Bad_Tag}]
propagations:
  - {from: owner, to: ghost, action: setX}
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let warnings = cfg.validate();
        assert!(Config::has_errors(&warnings));
        let messages: Vec<&str> = warnings.iter().map(|w| w.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("duplicate channel tag 'owner'")));
        assert!(messages.iter().any(|m| m.contains("invalid channel tag 'Bad_Tag'")));
        assert!(messages.iter().any(|m| m.contains("unknown channel 'ghost'")));
    }

    #[test]
    fn validate_rejects_labels_that_prefix_each_other() {
        let yaml = r#"
projects:
  - name: main
    channels:
      - {tag: owner}
      - {tag: staff, label: owner staff}
      - {tag: admin}
  - name: other
    channels:
      - {tag: admin-copy, label: admin}
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let warnings = cfg.validate();
        let overlaps: Vec<&str> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error && w.message.contains("overlapping labels"))
            .map(|w| w.message.as_str())
            .collect();
        // Labels only collide within one project's listing.
        assert_eq!(overlaps.len(), 1, "{overlaps:?}");
        assert!(overlaps[0].contains("'owner' and 'staff'"));

        let mut same = Config::starter();
        let mut twin = Channel::new("twin");
        twin.label = Some("main".to_string());
        same.projects[0].channels.push(twin);
        assert!(Config::has_errors(&same.validate()));
    }

    #[test]
    fn validate_template_and_margin() {
        let mut cfg = Config::starter();
        cfg.platform.address_template = "https://example.test/exec".to_string();
        cfg.platform.version_warn_margin = 500;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("address_template")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("version_warn_margin")));
    }

    #[test]
    fn starter_roundtrip_is_valid() {
        let cfg = Config::starter();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        assert!(!yaml.contains("propagations"));
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.projects[0].channels[0].tag, "main");
        assert!(parsed.validate().is_empty());
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(KeeperError::NotInitialized)
        ));
        assert!(Config::write_starter(dir.path()).unwrap());
        assert!(!Config::write_starter(dir.path()).unwrap());
        assert_eq!(Config::load(dir.path()).unwrap().projects.len(), 1);
    }
}
