//! Declarative skills: discovery, source precedence, eligibility, and
//! trigger matching.
//!
//! Skills are `skill.md` (front-matter + body) or `skill.{yaml,yml}`
//! documents discovered under four ordered source directories. A higher
//! precedence source replaces a lower one for the same skill id; load
//! order within the same precedence never changes the outcome.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::RwLock;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Where a skill was loaded from; later variants override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillSource {
    Extra,
    Bundled,
    Managed,
    Workspace,
}

impl SkillSource {
    /// Precedence rank; higher overrides lower.
    pub fn precedence(self) -> u8 {
        match self {
            SkillSource::Extra => 0,
            SkillSource::Bundled => 1,
            SkillSource::Managed => 2,
            SkillSource::Workspace => 3,
        }
    }
}

/// Trigger set deciding when a skill is relevant to user text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillTrigger {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub intents: Vec<String>,
}

/// Security constraints on a skill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillSecurity {
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub admin_only: bool,
    #[serde(default)]
    pub allowed_channels: Vec<String>,
    #[serde(default)]
    pub denied_channels: Vec<String>,
}

/// Environment requirements a skill needs before it is registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillEligibility {
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub binaries: Vec<String>,
    #[serde(default)]
    pub config_flags: Vec<String>,
    #[serde(default)]
    pub required_providers: Vec<String>,
}

/// Why a skill was not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibilityReason {
    OsIncompatible,
    MissingBinary,
    ConfigDisabled,
    MissingProvider,
}

/// Record of a skill that failed its eligibility check.
#[derive(Debug, Clone)]
pub struct IneligibleSkill {
    pub skill_id: String,
    pub reason: IneligibilityReason,
    pub message: String,
}

/// A loaded skill document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub triggers: SkillTrigger,
    pub tools: Vec<String>,
    pub security: SkillSecurity,
    pub eligibility: SkillEligibility,
    pub source: SkillSource,
    /// Free-text body injected into the prompt when the skill matches.
    pub content: String,
    pub file_path: Option<PathBuf>,
}

impl SkillDefinition {
    /// Whether any trigger matches the given text: keyword substring,
    /// regex pattern, or exact intent.
    pub fn matches_input(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();

        if self
            .triggers
            .keywords
            .iter()
            .any(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
        {
            return true;
        }

        for pattern in &self.triggers.patterns {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => {
                    if re.is_match(text) {
                        return true;
                    }
                }
                Err(error) => {
                    debug!(skill = %self.id, %pattern, %error, "skipping invalid trigger pattern")
                }
            }
        }

        let trimmed = lowered.trim();
        self.triggers
            .intents
            .iter()
            .any(|intent| intent.to_lowercase() == trimmed)
    }
}

/// Registry configuration: the four source roots plus the environment
/// facts eligibility is checked against.
#[derive(Debug, Clone)]
pub struct SkillsRegistryConfig {
    pub workspace_path: PathBuf,
    pub managed_path: Option<PathBuf>,
    pub bundled_path: Option<PathBuf>,
    pub extra_paths: Vec<PathBuf>,
    pub check_eligibility: bool,
    pub available_providers: HashSet<String>,
    pub config_flags: HashMap<String, bool>,
}

impl Default for SkillsRegistryConfig {
    fn default() -> Self {
        Self {
            workspace_path: PathBuf::from("./skills"),
            managed_path: None,
            bundled_path: None,
            extra_paths: Vec::new(),
            check_eligibility: true,
            available_providers: HashSet::new(),
            config_flags: HashMap::new(),
        }
    }
}

/// In-memory registry of loaded skills, keyed by id, replacement gated
/// on source precedence.
pub struct SkillsRegistry {
    config: SkillsRegistryConfig,
    skills: RwLock<Vec<SkillDefinition>>,
    ineligible: RwLock<Vec<IneligibleSkill>>,
}

impl SkillsRegistry {
    pub fn new(config: SkillsRegistryConfig) -> Self {
        Self {
            config,
            skills: RwLock::new(Vec::new()),
            ineligible: RwLock::new(Vec::new()),
        }
    }

    /// Load every skill from every source, lowest precedence first.
    /// Returns the number of unique registered skills.
    pub async fn load_skills(&self) -> usize {
        {
            self.skills.write().expect("skills lock").clear();
            self.ineligible.write().expect("ineligible lock").clear();
        }

        let mut roots: Vec<(PathBuf, SkillSource)> = Vec::new();
        for extra in &self.config.extra_paths {
            roots.push((extra.clone(), SkillSource::Extra));
        }
        if let Some(bundled) = &self.config.bundled_path {
            roots.push((bundled.clone(), SkillSource::Bundled));
        }
        if let Some(managed) = &self.config.managed_path {
            roots.push((managed.clone(), SkillSource::Managed));
        }
        roots.push((self.config.workspace_path.clone(), SkillSource::Workspace));

        for (root, source) in roots {
            if root.exists() {
                self.load_from_path(&root, source).await;
            }
        }

        let count = self.skill_count();
        let ineligible = self.ineligible.read().expect("ineligible lock").len();
        info!(count, ineligible, "skills loaded");
        count
    }

    async fn load_from_path(&self, root: &Path, source: SkillSource) {
        for file in discover_skill_files(root) {
            match load_skill_file(&file, source).await {
                Ok(Some(skill)) => self.register(skill),
                Ok(None) => {}
                Err(error) => {
                    error!(path = %file.display(), %error, "skill load error");
                }
            }
        }
    }

    /// Register one skill, honoring eligibility and source precedence.
    pub fn register(&self, skill: SkillDefinition) {
        if self.config.check_eligibility {
            if let Err(ineligible) = self.check_eligibility(&skill) {
                debug!(
                    skill_id = %ineligible.skill_id,
                    reason = ?ineligible.reason,
                    "skill ineligible"
                );
                self.ineligible
                    .write()
                    .expect("ineligible lock")
                    .push(ineligible);
                return;
            }
        }

        let mut skills = self.skills.write().expect("skills lock");
        if let Some(existing) = skills.iter_mut().find(|s| s.id == skill.id) {
            if skill.source.precedence() >= existing.source.precedence() {
                info!(
                    skill_id = %skill.id,
                    old_source = ?existing.source,
                    new_source = ?skill.source,
                    "skill replaced by higher-precedence source"
                );
                *existing = skill;
            } else {
                debug!(skill_id = %skill.id, "skill override skipped, lower precedence");
            }
            return;
        }

        info!(skill_id = %skill.id, source = ?skill.source, "skill registered");
        skills.push(skill);
    }

    fn check_eligibility(&self, skill: &SkillDefinition) -> Result<(), IneligibleSkill> {
        let eligibility = &skill.eligibility;

        if !eligibility.os.is_empty() {
            let current = normalize_os(std::env::consts::OS);
            let allowed = eligibility
                .os
                .iter()
                .any(|os| normalize_os(os) == current);
            if !allowed {
                return Err(IneligibleSkill {
                    skill_id: skill.id.clone(),
                    reason: IneligibilityReason::OsIncompatible,
                    message: format!(
                        "skill requires OS {:?} (current: {current})",
                        eligibility.os
                    ),
                });
            }
        }

        for binary in &eligibility.binaries {
            if !binary_on_path(binary) {
                return Err(IneligibleSkill {
                    skill_id: skill.id.clone(),
                    reason: IneligibilityReason::MissingBinary,
                    message: format!("required binary not found: {binary}"),
                });
            }
        }

        for flag in &eligibility.config_flags {
            if !self.config.config_flags.get(flag).copied().unwrap_or(false) {
                return Err(IneligibleSkill {
                    skill_id: skill.id.clone(),
                    reason: IneligibilityReason::ConfigDisabled,
                    message: format!("config flag not enabled: {flag}"),
                });
            }
        }

        for provider in &eligibility.required_providers {
            if !self.config.available_providers.contains(provider) {
                return Err(IneligibleSkill {
                    skill_id: skill.id.clone(),
                    reason: IneligibilityReason::MissingProvider,
                    message: format!("required provider not available: {provider}"),
                });
            }
        }

        Ok(())
    }

    pub fn get(&self, skill_id: &str) -> Option<SkillDefinition> {
        self.skills
            .read()
            .expect("skills lock")
            .iter()
            .find(|s| s.id == skill_id)
            .cloned()
    }

    /// All registered skills in registration order.
    pub fn list_skills(&self) -> Vec<SkillDefinition> {
        self.skills.read().expect("skills lock").clone()
    }

    pub fn skill_count(&self) -> usize {
        self.skills.read().expect("skills lock").len()
    }

    /// Skills that failed eligibility, with their typed reasons.
    pub fn ineligible_skills(&self) -> Vec<IneligibleSkill> {
        self.ineligible.read().expect("ineligible lock").clone()
    }

    /// Up to `limit` skills whose triggers match `text`, in registration
    /// order.
    pub fn find_matching_skills(&self, text: &str, limit: usize) -> Vec<SkillDefinition> {
        self.skills
            .read()
            .expect("skills lock")
            .iter()
            .filter(|skill| skill.matches_input(text))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Write a generated skill document into the workspace source and
    /// register it. Used by the learn loop.
    pub async fn create_skill(
        &self,
        skill_id: &str,
        name: &str,
        description: &str,
        triggers: Vec<String>,
        tools: Vec<String>,
        steps: Vec<String>,
        guidelines: Vec<String>,
    ) -> Result<SkillDefinition, std::io::Error> {
        let dir = self.config.workspace_path.join(skill_id);
        tokio::fs::create_dir_all(&dir).await?;

        let front_matter = serde_yaml::to_string(&serde_yaml::Value::Mapping(
            [
                ("name".into(), name.into()),
                ("description".into(), description.into()),
                ("version".into(), "1.0.0".into()),
                (
                    "triggers".into(),
                    serde_yaml::Value::Sequence(
                        triggers.iter().map(|t| t.as_str().into()).collect(),
                    ),
                ),
                (
                    "tools".into(),
                    serde_yaml::Value::Sequence(tools.iter().map(|t| t.as_str().into()).collect()),
                ),
            ]
            .into_iter()
            .collect(),
        ))
        .unwrap_or_default();

        let mut body = format!("# {name}\n\n## Overview\n{description}\n");
        if !steps.is_empty() {
            body.push_str("\n## Steps\n");
            for (i, step) in steps.iter().enumerate() {
                body.push_str(&format!("{}. {step}\n", i + 1));
            }
        }
        if !guidelines.is_empty() {
            body.push_str("\n## Guidelines\n");
            for guideline in &guidelines {
                body.push_str(&format!("- {guideline}\n"));
            }
        }

        let content = format!("---\n{}---\n\n{body}", front_matter);
        let file = dir.join("SKILL.md");
        tokio::fs::write(&file, &content).await?;

        let skill = SkillDefinition {
            id: skill_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: "1.0.0".to_string(),
            triggers: SkillTrigger {
                keywords: triggers,
                patterns: Vec::new(),
                intents: Vec::new(),
            },
            tools,
            security: SkillSecurity::default(),
            eligibility: SkillEligibility::default(),
            source: SkillSource::Workspace,
            content: body,
            file_path: Some(file),
        };
        self.register(skill.clone());

        info!(skill_id, "skill created");
        Ok(skill)
    }
}

/// Recursively find `skill.{md,yaml,yml}` files (case-insensitive) under
/// `root`, in a stable order.
fn discover_skill_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        children.sort();
        for child in children {
            if child.is_dir() {
                stack.push(child);
            } else if child
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| {
                    let lower = n.to_lowercase();
                    lower == "skill.md" || lower == "skill.yaml" || lower == "skill.yml"
                })
            {
                found.push(child);
            }
        }
    }

    found.sort();
    found
}

static FRONT_MATTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^---\s*\n(.*?)\n---\s*\n?(.*)$").expect("valid front-matter regex")
});

/// Raw deserialization target for skill documents.
#[derive(Debug, Default, Deserialize)]
struct SkillDocument {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    description: String,
    version: Option<String>,
    #[serde(default)]
    triggers: TriggersField,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    security: SkillSecurity,
    #[serde(default)]
    eligibility: SkillEligibility,
    #[serde(default)]
    required_providers: Vec<String>,
}

/// `triggers:` may be a plain keyword list or a detailed map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TriggersField {
    List(Vec<String>),
    Detailed(SkillTrigger),
}

impl Default for TriggersField {
    fn default() -> Self {
        TriggersField::List(Vec::new())
    }
}

async fn load_skill_file(
    path: &Path,
    source: SkillSource,
) -> Result<Option<SkillDefinition>, serde_yaml::Error> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(error) => {
            warn!(path = %path.display(), %error, "skill file unreadable");
            return Ok(None);
        }
    };

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let (document, body) = if is_yaml {
        (serde_yaml::from_str::<SkillDocument>(&content)?, String::new())
    } else {
        let Some(captures) = FRONT_MATTER.captures(&content) else {
            warn!(path = %path.display(), "skill markdown has no front-matter");
            return Ok(None);
        };
        (
            serde_yaml::from_str::<SkillDocument>(&captures[1])?,
            captures[2].to_string(),
        )
    };

    Ok(Some(build_skill(document, body, path, source)))
}

fn build_skill(
    document: SkillDocument,
    body: String,
    path: &Path,
    source: SkillSource,
) -> SkillDefinition {
    let fallback_name = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("skill")
        .to_string();

    let raw_id = document
        .id
        .clone()
        .or_else(|| document.name.clone())
        .unwrap_or(fallback_name.clone());
    let id = raw_id.to_lowercase().replace(' ', "-");

    let triggers = match document.triggers {
        TriggersField::List(keywords) => SkillTrigger {
            keywords,
            patterns: Vec::new(),
            intents: Vec::new(),
        },
        TriggersField::Detailed(triggers) => triggers,
    };

    let mut eligibility = document.eligibility;
    if eligibility.required_providers.is_empty() {
        eligibility.required_providers = document.required_providers;
    }

    SkillDefinition {
        name: document.name.unwrap_or_else(|| id.clone()),
        id,
        description: document.description,
        version: document.version.unwrap_or_else(|| "1.0.0".to_string()),
        triggers,
        tools: document.tools,
        security: document.security,
        eligibility,
        source,
        content: body,
        file_path: Some(path.to_path_buf()),
    }
}

fn normalize_os(os: &str) -> &'static str {
    match os.to_lowercase().as_str() {
        "darwin" | "macos" | "mac" => "macos",
        "windows" | "win" => "windows",
        "linux" => "linux",
        _ => "other",
    }
}

fn binary_on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return true;
        }
        #[cfg(windows)]
        {
            if dir.join(format!("{name}.exe")).is_file() {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &Path, subdir: &str, front_matter: &str, body: &str) {
        let skill_dir = dir.join(subdir);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("skill.md"),
            format!("---\n{front_matter}\n---\n\n{body}"),
        )
        .unwrap();
    }

    fn registry_for(workspace: &Path) -> SkillsRegistry {
        SkillsRegistry::new(SkillsRegistryConfig {
            workspace_path: workspace.to_path_buf(),
            check_eligibility: true,
            ..SkillsRegistryConfig::default()
        })
    }

    #[tokio::test]
    async fn loads_markdown_skill_with_front_matter() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "greet",
            "name: Greet\ndescription: Greets people\ntriggers:\n  - hello\n  - hi",
            "# Greet\nSay hello warmly.",
        );

        let registry = registry_for(dir.path());
        assert_eq!(registry.load_skills().await, 1);

        let skill = registry.get("greet").unwrap();
        assert_eq!(skill.name, "Greet");
        assert_eq!(skill.triggers.keywords, vec!["hello", "hi"]);
        assert!(skill.content.contains("Say hello warmly."));
        assert_eq!(skill.source, SkillSource::Workspace);
    }

    #[tokio::test]
    async fn detailed_triggers_parse_keywords_patterns_intents() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "deploy",
            "name: Deploy\ntriggers:\n  keywords: [deploy]\n  patterns: ['ship\\s+it']\n  intents: [release now]",
            "Deploy runbook.",
        );

        let registry = registry_for(dir.path());
        registry.load_skills().await;
        let skill = registry.get("deploy").unwrap();

        assert!(skill.matches_input("please deploy the service"));
        assert!(skill.matches_input("SHIP   IT"));
        assert!(skill.matches_input("Release Now"));
        assert!(!skill.matches_input("unrelated message"));
    }

    #[tokio::test]
    async fn workspace_overrides_bundled_regardless_of_load_order() {
        let workspace = tempfile::tempdir().unwrap();
        let bundled = tempfile::tempdir().unwrap();
        write_skill(
            workspace.path(),
            "greet",
            "name: greet\ndescription: workspace copy",
            "",
        );
        write_skill(
            bundled.path(),
            "greet",
            "name: greet\ndescription: bundled copy",
            "",
        );

        // Normal order: bundled loads first, workspace replaces it.
        let registry = SkillsRegistry::new(SkillsRegistryConfig {
            workspace_path: workspace.path().to_path_buf(),
            bundled_path: Some(bundled.path().to_path_buf()),
            ..SkillsRegistryConfig::default()
        });
        registry.load_skills().await;
        assert_eq!(registry.skill_count(), 1);
        assert_eq!(registry.get("greet").unwrap().description, "workspace copy");

        // Reversed registration order: precedence still decides.
        let registry = registry_for(workspace.path());
        registry.load_skills().await;
        let lower = SkillDefinition {
            id: "greet".to_string(),
            name: "greet".to_string(),
            description: "bundled copy".to_string(),
            version: "1.0.0".to_string(),
            triggers: SkillTrigger::default(),
            tools: Vec::new(),
            security: SkillSecurity::default(),
            eligibility: SkillEligibility::default(),
            source: SkillSource::Bundled,
            content: String::new(),
            file_path: None,
        };
        registry.register(lower);
        assert_eq!(registry.get("greet").unwrap().description, "workspace copy");
    }

    #[tokio::test]
    async fn same_precedence_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_for(dir.path());
        for description in ["first", "second"] {
            registry.register(SkillDefinition {
                id: "dup".to_string(),
                name: "dup".to_string(),
                description: description.to_string(),
                version: "1.0.0".to_string(),
                triggers: SkillTrigger::default(),
                tools: Vec::new(),
                security: SkillSecurity::default(),
                eligibility: SkillEligibility::default(),
                source: SkillSource::Workspace,
                content: String::new(),
                file_path: None,
            });
        }
        assert_eq!(registry.skill_count(), 1);
        assert_eq!(registry.get("dup").unwrap().description, "second");
    }

    #[tokio::test]
    async fn missing_binary_makes_skill_ineligible() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "exotic",
            "name: exotic\neligibility:\n  binaries: [definitely-not-a-real-binary-xyz]",
            "",
        );

        let registry = registry_for(dir.path());
        assert_eq!(registry.load_skills().await, 0);
        let ineligible = registry.ineligible_skills();
        assert_eq!(ineligible.len(), 1);
        assert_eq!(ineligible[0].reason, IneligibilityReason::MissingBinary);
    }

    #[tokio::test]
    async fn disabled_config_flag_makes_skill_ineligible() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "flagged",
            "name: flagged\neligibility:\n  config_flags: [experimental]",
            "",
        );

        let registry = registry_for(dir.path());
        registry.load_skills().await;
        assert_eq!(
            registry.ineligible_skills()[0].reason,
            IneligibilityReason::ConfigDisabled
        );

        let mut config = SkillsRegistryConfig {
            workspace_path: dir.path().to_path_buf(),
            ..SkillsRegistryConfig::default()
        };
        config.config_flags.insert("experimental".to_string(), true);
        let registry = SkillsRegistry::new(config);
        assert_eq!(registry.load_skills().await, 1);
    }

    #[tokio::test]
    async fn missing_provider_makes_skill_ineligible() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "voiced",
            "name: voiced\nrequired_providers: [tts]",
            "",
        );

        let registry = registry_for(dir.path());
        registry.load_skills().await;
        assert_eq!(
            registry.ineligible_skills()[0].reason,
            IneligibilityReason::MissingProvider
        );
    }

    #[tokio::test]
    async fn find_matching_respects_limit_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_for(dir.path());
        for name in ["alpha", "beta", "gamma"] {
            registry.register(SkillDefinition {
                id: name.to_string(),
                name: name.to_string(),
                description: String::new(),
                version: "1.0.0".to_string(),
                triggers: SkillTrigger {
                    keywords: vec!["widget".to_string()],
                    patterns: Vec::new(),
                    intents: Vec::new(),
                },
                tools: Vec::new(),
                security: SkillSecurity::default(),
                eligibility: SkillEligibility::default(),
                source: SkillSource::Workspace,
                content: String::new(),
                file_path: None,
            });
        }

        let matches = registry.find_matching_skills("fix the widget", 2);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "alpha");
        assert_eq!(matches[1].id, "beta");
    }

    #[tokio::test]
    async fn create_skill_writes_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_for(dir.path());

        let skill = registry
            .create_skill(
                "timezones",
                "Timezones",
                "Convert between timezones",
                vec!["timezone".to_string()],
                vec!["clock".to_string()],
                vec!["Find the offset".to_string()],
                vec!["Prefer IANA names".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(skill.source, SkillSource::Workspace);
        assert!(dir.path().join("timezones").join("SKILL.md").exists());
        assert!(registry.get("timezones").is_some());

        // The written document parses back through the normal loader.
        let reloaded = registry.load_skills().await;
        assert_eq!(reloaded, 1);
        let parsed = registry.get("timezones").unwrap();
        assert_eq!(parsed.triggers.keywords, vec!["timezone"]);
        assert!(parsed.content.contains("Find the offset"));
    }

    #[tokio::test]
    async fn yaml_skill_files_load() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("plain");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("skill.yaml"),
            "name: Plain\ndescription: yaml-defined\ntriggers: [plain]\n",
        )
        .unwrap();

        let registry = registry_for(dir.path());
        assert_eq!(registry.load_skills().await, 1);
        assert_eq!(registry.get("plain").unwrap().description, "yaml-defined");
    }
}
