//! Runtime configuration: YAML file with `${VAR}` environment expansion
//! plus a small set of environment-variable overrides.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::security::SecurityConfig;
use crate::tool_policy::{ToolGroup, ToolPolicyConfig};
use crate::validator::ValidatorConfig;

/// Configuration loading failures; these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("config file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file not parseable: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Bot identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    pub description: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "switchboard".to_string(),
            description: "an agent runtime with multiplexed transports".to_string(),
        }
    }
}

/// Model provider selection. Everything beyond `provider` is passed to
/// the provider implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "echo".to_string(),
            model: String::new(),
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalGatewayConfig {
    pub enabled: bool,
}

impl Default for TerminalGatewayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketGatewayConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for SocketGatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8765,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaysConfig {
    pub terminal: TerminalGatewayConfig,
    pub socket: SocketGatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 18_792,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub db_path: String,
    pub paths: Vec<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            db_path: "data/memory.db".to_string(),
            paths: Vec::new(),
            chunk_size: 500,
            chunk_overlap: 50,
            embedding_model: String::new(),
            embedding_dimensions: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSection {
    pub memory_path: String,
    pub max_history_tokens: usize,
    pub summary_threshold_tokens: usize,
    pub min_messages_to_keep: usize,
    pub compaction_strategy: crate::compaction::CompactionStrategy,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            memory_path: "./memory".to_string(),
            max_history_tokens: 50_000,
            summary_threshold_tokens: 30_000,
            min_messages_to_keep: 4,
            compaction_strategy: crate::compaction::CompactionStrategy::Adaptive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillsSection {
    pub workspace_path: String,
    pub managed_path: Option<String>,
    pub bundled_path: Option<String>,
    pub extra_paths: Vec<String>,
    pub check_eligibility: bool,
    pub flags: std::collections::HashMap<String, bool>,
}

impl Default for SkillsSection {
    fn default() -> Self {
        Self {
            workspace_path: "./skills".to_string(),
            managed_path: None,
            bundled_path: None,
            extra_paths: Vec::new(),
            check_eligibility: true,
            flags: std::collections::HashMap::new(),
        }
    }
}

/// One tool catalog entry, as declared in configuration. Each tool is a
/// black-box capability; the runtime only needs its policy facts and a
/// description for the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
    pub group: Option<ToolGroup>,
    pub groups: Vec<ToolGroup>,
    pub approval_required: bool,
    pub dangerous: bool,
    pub admin_only: bool,
}

impl Default for ToolCatalogEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            group: None,
            groups: Vec::new(),
            approval_required: false,
            dangerous: false,
            admin_only: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub policy: ToolPolicyConfig,
    pub catalog: Vec<ToolCatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub auto_restart: bool,
    pub max_restarts: u32,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            auto_restart: true,
            max_restarts: 3,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bot: BotConfig,
    pub model: ModelConfig,
    pub gateways: GatewaysConfig,
    pub relay: RelaySection,
    pub memory: MemorySection,
    pub context: ContextSection,
    pub skills: SkillsSection,
    pub validation: ValidatorConfig,
    pub security: SecurityConfig,
    pub tools: ToolsSection,
    pub bus: BusSection,
    pub supervisor: SupervisorSection,
}

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env regex"));

/// Expand `${VAR}` references against the process environment; unset
/// variables expand to the empty string.
fn expand_env_vars(raw: &str) -> String {
    ENV_VAR
        .replace_all(raw, |captures: &regex::Captures<'_>| {
            std::env::var(&captures[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Load configuration.
///
/// With an explicit path the file must exist. Without one, `config.yml`
/// then `config.yaml` in the working directory are tried, and defaults
/// are used when neither exists. Environment overrides are applied last.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            parse_file(path)?
        }
        None => {
            let mut discovered = Config::default();
            for candidate in ["config.yml", "config.yaml"] {
                let candidate = Path::new(candidate);
                if candidate.exists() {
                    discovered = parse_file(candidate)?;
                    break;
                }
            }
            discovered
        }
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

fn parse_file(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let expanded = expand_env_vars(&raw);
    Ok(serde_yaml::from_str(&expanded)?)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(port) = std::env::var("SOCKET_PORT") {
        match port.parse() {
            Ok(port) => config.gateways.socket.port = port,
            Err(_) => warn!(value = %port, "ignoring unparseable SOCKET_PORT"),
        }
    }
    if let Ok(host) = std::env::var("SOCKET_HOST") {
        config.gateways.socket.host = host;
    }
    if let Ok(db_path) = std::env::var("MEMORY_DB_PATH") {
        config.memory.db_path = db_path;
    }
    if let Ok(paths) = std::env::var("MEMORY_PATHS") {
        config.memory.paths = paths
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
        config.memory.embedding_model = model;
    }
    if let Ok(size) = std::env::var("CHUNK_SIZE") {
        match size.parse() {
            Ok(size) => config.memory.chunk_size = size,
            Err(_) => warn!(value = %size, "ignoring unparseable CHUNK_SIZE"),
        }
    }
    if let Ok(overlap) = std::env::var("CHUNK_OVERLAP") {
        match overlap.parse() {
            Ok(overlap) => config.memory.chunk_overlap = overlap,
            Err(_) => warn!(value = %overlap, "ignoring unparseable CHUNK_OVERLAP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.gateways.socket.port, 8765);
        assert_eq!(config.memory.db_path, "data/memory.db");
        assert_eq!(config.model.provider, "echo");
        assert!(config.supervisor.auto_restart);
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "bot:\n  name: testbot\ngateways:\n  socket:\n    port: 9000\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.bot.name, "testbot");
        assert_eq!(config.gateways.socket.port, 9000);
        // Untouched sections keep defaults.
        assert_eq!(config.memory.chunk_size, 500);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = load_config(Some(Path::new("/nope/missing.yml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn env_vars_expand_in_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        // Use a variable name unlikely to collide with the environment.
        unsafe { std::env::set_var("SWITCHBOARD_TEST_BOT_NAME", "expanded") };
        std::fs::write(&path, "bot:\n  name: ${SWITCHBOARD_TEST_BOT_NAME}\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.bot.name, "expanded");
        unsafe { std::env::remove_var("SWITCHBOARD_TEST_BOT_NAME") };
    }

    #[test]
    fn unknown_env_vars_expand_to_empty() {
        assert_eq!(expand_env_vars("x${SWITCHBOARD_DEFINITELY_UNSET_VAR}y"), "xy");
    }
}
