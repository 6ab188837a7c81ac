//! ProjectForge configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{AgentKind, Integrations};
use crate::events::DEFAULT_CHANNEL_CAPACITY;

/// Main ProjectForge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST/WebSocket server
    pub server: ServerConfig,

    /// Project store location
    pub storage: StorageConfig,

    /// Step timeout, retry and cancellation policy
    pub scheduler: SchedulerConfig,

    /// Progress event bus
    pub events: EventsConfig,

    /// External integrations configured on this deployment
    pub integrations: IntegrationsConfig,

    /// Agent adapters
    pub agents: AgentsConfig,

    /// Step template catalogue
    pub templates: TemplatesConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .projectforge.yml
        let local_config = PathBuf::from(".projectforge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/projectforge/projectforge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("projectforge").join("projectforge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialised
    ///
    /// Errors are swallowed; `load` reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".projectforge.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("projectforge").join("projectforge.yml"));
                }
                paths
            }
        };
        candidates
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// REST/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8420".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(rename = "db-path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/projectforge on Linux)
        let db_path = dirs::data_local_dir()
            .map(|d| d.join("projectforge"))
            .unwrap_or_else(|| PathBuf::from(".projectforge"))
            .join("projects.db");
        Self { db_path }
    }
}

/// Step execution policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Per-attempt agent timeout in milliseconds
    #[serde(rename = "step-timeout-ms")]
    pub step_timeout_ms: u64,

    /// Attempts per agent before a step fails
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    /// Retry delay cap in milliseconds
    #[serde(rename = "backoff-max-ms")]
    pub backoff_max_ms: u64,

    /// How long cancelled agents get to stop before they are abandoned
    #[serde(rename = "cancel-grace-ms")]
    pub cancel_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 300_000,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            cancel_grace_ms: 5_000,
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast buffer; slower subscribers skip ahead
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Which integrations this deployment can service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    pub repo: bool,
    pub ci: bool,
    pub jira: bool,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            repo: true,
            ci: true,
            jira: false,
        }
    }
}

impl IntegrationsConfig {
    pub fn available(&self) -> Integrations {
        Integrations {
            include_repo: self.repo,
            include_ci: self.ci,
            include_jira: self.jira,
        }
    }
}

/// Adapter implementation for an agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// Deterministic in-process agents
    #[default]
    Builtin,
    /// Remote agent service reached over HTTP
    Http,
}

/// Agent adapter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Adapter used for agents without an override
    pub default: AdapterKind,

    /// Endpoint for the HTTP adapter
    pub endpoint: Option<String>,

    /// Per-agent overrides keyed by agent id
    pub overrides: BTreeMap<AgentKind, AgentOverride>,
}

/// Override for a single agent kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentOverride {
    pub adapter: Option<AdapterKind>,
    pub endpoint: Option<String>,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

impl AgentOverride {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Template catalogue configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// YAML catalogue replacing the builtin one
    #[serde(rename = "catalogue-path")]
    pub catalogue_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind, "127.0.0.1:8420");
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.scheduler.step_timeout_ms, 300_000);
        assert_eq!(config.events.channel_capacity, 4096);
        assert!(config.integrations.repo);
        assert!(!config.integrations.jira);
        assert_eq!(config.agents.default, AdapterKind::Builtin);
        assert!(config.storage.db_path.ends_with("projects.db"));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
server:
  bind: 0.0.0.0:9000

storage:
  db-path: /var/lib/pf/projects.db

scheduler:
  step-timeout-ms: 1000
  max-attempts: 5
  backoff-base-ms: 10
  backoff-max-ms: 100
  cancel-grace-ms: 50

integrations:
  jira: true

agents:
  default: http
  endpoint: http://agents.local/invoke
  overrides:
    code_generator:
      adapter: builtin
      timeout-ms: 600000

templates:
  catalogue-path: ./catalogue.yml

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.storage.db_path, PathBuf::from("/var/lib/pf/projects.db"));
        assert_eq!(config.scheduler.max_attempts, 5);
        assert_eq!(config.scheduler.cancel_grace_ms, 50);
        assert!(config.integrations.jira);
        assert!(config.integrations.repo);
        assert_eq!(config.agents.default, AdapterKind::Http);
        let over = &config.agents.overrides[&AgentKind::CodeGenerator];
        assert_eq!(over.adapter, Some(AdapterKind::Builtin));
        assert_eq!(over.timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.templates.catalogue_path, Some(PathBuf::from("./catalogue.yml")));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
scheduler:
  max-attempts: 1
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.scheduler.max_attempts, 1);

        // Defaults for unspecified
        assert_eq!(config.scheduler.backoff_base_ms, 500);
        assert_eq!(config.server.bind, "127.0.0.1:8420");
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pf.yml");
        fs::write(&path, "log-level: trace\nserver:\n  bind: 127.0.0.1:1\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:1");
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("trace"));

        let missing = dir.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
        assert!(Config::load_log_level(Some(&missing)).is_none());
    }

    #[test]
    fn test_integrations_available() {
        let available = IntegrationsConfig::default().available();
        assert!(available.include_repo);
        assert!(available.include_ci);
        assert!(!available.include_jira);
    }
}
