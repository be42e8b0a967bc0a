//! Cluster settings types and loading

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::RetryPolicy;

/// Project-local settings file name
pub const SETTINGS_FILE: &str = "cluster-settings.yml";

/// Environment overrides, applied after the settings file
pub const ENV_ROLE: &str = "CLUSTERCTX_ROLE";
pub const ENV_AGENT_GROUP: &str = "CLUSTERCTX_AGENT_GROUP";
pub const ENV_COORDINATOR_URL: &str = "CLUSTERCTX_COORDINATOR_URL";
pub const ENV_MIN_AGENTS_COUNT: &str = "CLUSTERCTX_MIN_AGENTS_COUNT";

/// Main cluster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Base URL every runner uses to reach the coordinator
    #[serde(rename = "coordinator-url")]
    pub coordinator_url: String,

    /// Address the coordinator binds its server to
    #[serde(rename = "bind-address")]
    pub bind_address: String,

    /// Number of agents the coordinator waits for
    #[serde(rename = "min-agents-count")]
    pub min_agents_count: u64,

    /// This process's role
    pub runner: RunnerSettings,

    /// Scenarios the coordinator executes itself
    #[serde(rename = "coordinator-scenarios")]
    pub coordinator_scenarios: Vec<String>,

    /// Scenario assignment per agent group
    pub agents: Vec<AgentGroup>,

    /// Polling bounds
    pub retry: RetrySettings,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:5777".to_string(),
            bind_address: "0.0.0.0:5777".to_string(),
            min_agents_count: 0,
            runner: RunnerSettings::default(),
            coordinator_scenarios: Vec::new(),
            agents: Vec::new(),
            retry: RetrySettings::default(),
            log_level: None,
        }
    }
}

impl ClusterSettings {
    /// Load settings with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut settings = Self::load_file_chain(config_path)?;
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// Load only the log level, tolerating any error
    ///
    /// Runs before logging is set up, so failures are silent.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load_file_chain(config_path).ok().and_then(|s| s.log_level)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit settings path provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load settings from {}", path.display()));
        }

        // Try project-local settings: ./cluster-settings.yml
        let local = PathBuf::from(SETTINGS_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(settings) => return Ok(settings),
                Err(e) => {
                    tracing::warn!("Failed to load settings from {}: {}", local.display(), e);
                }
            }
        }

        // Try user settings: ~/.config/clusterctx/cluster-settings.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("clusterctx").join(SETTINGS_FILE);
            if user.exists() {
                match Self::load_from_file(&user) {
                    Ok(settings) => return Ok(settings),
                    Err(e) => {
                        tracing::warn!("Failed to load settings from {}: {}", user.display(), e);
                    }
                }
            }
        }

        tracing::info!("No settings file found, using defaults");
        Ok(Self::default())
    }

    /// Parse a settings file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read settings file")?;
        let settings: Self = serde_yaml::from_str(&content).context("Failed to parse settings file")?;
        tracing::info!("Loaded settings from: {}", path.as_ref().display());
        Ok(settings)
    }

    /// Override fields from `CLUSTERCTX_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(role) = lookup(ENV_ROLE) {
            debug!(%role, "apply_overrides: role");
            self.runner.role = role
                .parse::<RunnerRole>()
                .map_err(|e| eyre::eyre!("Invalid {}: {}", ENV_ROLE, e))?;
        }
        if let Some(group) = lookup(ENV_AGENT_GROUP) {
            debug!(%group, "apply_overrides: agent group");
            self.runner.agent_group = Some(group);
        }
        if let Some(url) = lookup(ENV_COORDINATOR_URL) {
            debug!(%url, "apply_overrides: coordinator url");
            self.coordinator_url = url;
        }
        if let Some(count) = lookup(ENV_MIN_AGENTS_COUNT) {
            debug!(%count, "apply_overrides: min agents count");
            self.min_agents_count = count
                .trim()
                .parse()
                .context(format!("Invalid {}: '{}'", ENV_MIN_AGENTS_COUNT, count))?;
        }
        Ok(())
    }

    /// Check settings before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator_url.trim().is_empty() {
            return Err(eyre::eyre!("coordinator-url is empty"));
        }
        reqwest::Url::parse(&self.coordinator_url)
            .context(format!("coordinator-url '{}' is not a valid URL", self.coordinator_url))?;

        if self.runner.role == RunnerRole::Coordinator && self.bind_address.trim().is_empty() {
            return Err(eyre::eyre!("bind-address is empty"));
        }

        if self.runner.role == RunnerRole::Agent
            && self.runner.agent_group.as_deref().is_none_or(|g| g.trim().is_empty())
        {
            return Err(eyre::eyre!("runner.agent-group is required for the agent role"));
        }

        Ok(())
    }

    /// Every configured scenario name, first-seen order, without duplicates
    pub fn all_scenario_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let agent_scenarios = self.agents.iter().flat_map(|a| a.target_scenarios.iter());
        for name in self.coordinator_scenarios.iter().chain(agent_scenarios) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Target scenarios of an agent group; empty if the group is unknown
    pub fn target_scenarios(&self, agent_group: &str) -> &[String] {
        self.agents
            .iter()
            .find(|a| a.agent_group == agent_group)
            .map(|a| a.target_scenarios.as_slice())
            .unwrap_or_default()
    }

    /// Readable YAML dump for startup logs
    pub fn to_readable_string(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_else(|e| format!("<unprintable settings: {}>", e))
    }
}

/// Role of the current process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerRole {
    #[default]
    Coordinator,
    Agent,
}

impl FromStr for RunnerRole {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "coordinator" => Ok(RunnerRole::Coordinator),
            "agent" => Ok(RunnerRole::Agent),
            other => Err(eyre::eyre!("Runner role '{}' is undefined (expected coordinator or agent)", other)),
        }
    }
}

impl fmt::Display for RunnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerRole::Coordinator => write!(f, "coordinator"),
            RunnerRole::Agent => write!(f, "agent"),
        }
    }
}

/// Role-specific runner settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub role: RunnerRole,

    /// Agent group this process belongs to (agents only)
    #[serde(rename = "agent-group")]
    pub agent_group: Option<String>,
}

/// Scenarios assigned to one group of agents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentGroup {
    #[serde(rename = "agent-group")]
    pub agent_group: String,

    #[serde(rename = "target-scenarios")]
    pub target_scenarios: Vec<String>,
}

/// Polling bounds for the waiting operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Readiness probe attempts
    #[serde(rename = "readiness-attempts")]
    pub readiness_attempts: u32,

    /// Barrier poll attempts
    #[serde(rename = "barrier-attempts")]
    pub barrier_attempts: u32,

    /// Shared value poll attempts
    #[serde(rename = "value-attempts")]
    pub value_attempts: u32,

    /// Delay after each missed attempt in milliseconds
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            readiness_attempts: 600,
            barrier_attempts: 600,
            value_attempts: 300,
            interval_ms: 1000,
        }
    }
}

impl RetrySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn readiness(&self) -> RetryPolicy {
        RetryPolicy::new(self.readiness_attempts, self.interval())
    }

    pub fn barrier(&self) -> RetryPolicy {
        RetryPolicy::new(self.barrier_attempts, self.interval())
    }

    pub fn value(&self) -> RetryPolicy {
        RetryPolicy::new(self.value_attempts, self.interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn sample_yaml() -> &'static str {
        r#"
coordinator-url: http://coordinator:5777
bind-address: 0.0.0.0:5777
min-agents-count: 2
runner:
  role: agent
  agent-group: readers
coordinator-scenarios:
  - checkout
agents:
  - agent-group: readers
    target-scenarios: [search, browse]
  - agent-group: writers
    target-scenarios: [checkout, review]
retry:
  barrier-attempts: 30
  interval-ms: 250
"#
    }

    #[test]
    fn test_default_settings() {
        let settings = ClusterSettings::default();
        assert_eq!(settings.coordinator_url, "http://localhost:5777");
        assert_eq!(settings.min_agents_count, 0);
        assert_eq!(settings.runner.role, RunnerRole::Coordinator);
        assert_eq!(settings.retry.readiness_attempts, 600);
        assert_eq!(settings.retry.value_attempts, 300);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_deserialize_settings() {
        let settings: ClusterSettings = serde_yaml::from_str(sample_yaml()).unwrap();

        assert_eq!(settings.coordinator_url, "http://coordinator:5777");
        assert_eq!(settings.min_agents_count, 2);
        assert_eq!(settings.runner.role, RunnerRole::Agent);
        assert_eq!(settings.runner.agent_group.as_deref(), Some("readers"));
        assert_eq!(settings.agents.len(), 2);

        // Partially specified retry section keeps defaults
        assert_eq!(settings.retry.barrier_attempts, 30);
        assert_eq!(settings.retry.readiness_attempts, 600);
        assert_eq!(settings.retry.barrier(), RetryPolicy::new(30, Duration::from_millis(250)));
    }

    #[test]
    fn test_all_scenario_names_dedup_in_order() {
        let settings: ClusterSettings = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(settings.all_scenario_names(), vec!["checkout", "search", "browse", "review"]);
    }

    #[test]
    fn test_target_scenarios() {
        let settings: ClusterSettings = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(settings.target_scenarios("writers"), ["checkout", "review"]);
        assert!(settings.target_scenarios("nobody").is_empty());
    }

    #[test]
    fn test_validate_agent_requires_group() {
        let mut settings = ClusterSettings::default();
        settings.runner.role = RunnerRole::Agent;
        assert!(settings.validate().is_err());

        settings.runner.agent_group = Some("  ".to_string());
        assert!(settings.validate().is_err());

        settings.runner.agent_group = Some("readers".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut settings = ClusterSettings::default();
        settings.coordinator_url = String::new();
        assert!(settings.validate().is_err());

        settings.coordinator_url = "not a url".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ROLE, "Agent"),
            (ENV_AGENT_GROUP, "writers"),
            (ENV_COORDINATOR_URL, "http://10.0.0.1:5777"),
            (ENV_MIN_AGENTS_COUNT, "4"),
        ]
        .into_iter()
        .collect();

        let mut settings = ClusterSettings::default();
        settings
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.runner.role, RunnerRole::Agent);
        assert_eq!(settings.runner.agent_group.as_deref(), Some("writers"));
        assert_eq!(settings.coordinator_url, "http://10.0.0.1:5777");
        assert_eq!(settings.min_agents_count, 4);
    }

    #[test]
    fn test_override_rejects_bad_values() {
        let mut settings = ClusterSettings::default();
        assert!(settings.apply_overrides(|name| (name == ENV_ROLE).then(|| "observer".to_string())).is_err());
        assert!(
            settings
                .apply_overrides(|name| (name == ENV_MIN_AGENTS_COUNT).then(|| "-1".to_string()))
                .is_err()
        );
    }

    #[test]
    fn test_load_from_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        fs::write(&path, sample_yaml()).unwrap();

        let settings = ClusterSettings::load_from_file(&path).unwrap();
        assert_eq!(settings.min_agents_count, 2);
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(ClusterSettings::load_file_chain(Some(&path)).is_err());
        assert_eq!(ClusterSettings::load_log_level(Some(&path)), None);
    }

    #[test]
    fn test_load_log_level() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SETTINGS_FILE);
        fs::write(&path, "log-level: debug\n").unwrap();
        assert_eq!(ClusterSettings::load_log_level(Some(&path)).as_deref(), Some("debug"));
    }
}
