use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::task::DEFAULT_RESULT_LIMIT;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".deeppentest";

/// Environment variable consulted for the ssh password.
pub const PASSWORD_ENV: &str = "DEEPPENTEST_SSH_PASSWORD";

/// How tasks are carried out.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Every action goes through the command orchestrator.
    #[default]
    Auto,
    /// The operator reports every result.
    Manual,
    /// Shell actions run automatically; anything else goes to the operator.
    Semi,
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Ssh,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_max_interactions")]
    pub max_interactions: u32,
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
}

fn default_max_interactions() -> u32 {
    5
}

fn default_result_limit() -> usize {
    DEFAULT_RESULT_LIMIT
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            max_interactions: default_max_interactions(),
            result_limit: default_result_limit(),
        }
    }
}

/// Where the shell lives and how the session automaton paces itself.
///
/// ```toml
/// [session]
/// host = "10.10.0.5"
/// username = "kali"
/// command_timeout_secs = 300
/// forbidden_commands = ["apt", "apt-get", "dpkg"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_local_shell")]
    pub local_shell: String,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    #[serde(default = "default_settle_delay_millis")]
    pub settle_delay_millis: u64,
    #[serde(default = "default_max_ambiguous_polls")]
    pub max_ambiguous_polls: u32,
    #[serde(default = "default_forbidden_commands")]
    pub forbidden_commands: Vec<String>,
    #[serde(default = "default_setup_commands")]
    pub setup_commands: Vec<String>,
}

fn default_host() -> String {
    "10.10.0.5".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".to_string()
}

fn default_local_shell() -> String {
    "bash".to_string()
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_millis() -> u64 {
    100
}

fn default_settle_delay_millis() -> u64 {
    500
}

fn default_max_ambiguous_polls() -> u32 {
    3
}

fn default_forbidden_commands() -> Vec<String> {
    vec!["apt".to_string(), "apt-get".to_string()]
}

fn default_setup_commands() -> Vec<String> {
    [
        "touch ~/.hushlogin",
        "sudo touch /etc/legal",
        "sudo chmod 644 /etc/legal",
        "sudo rm -f /etc/motd",
        "sudo rm -f /etc/update-motd.d/*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: None,
            local_shell: default_local_shell(),
            command_timeout_secs: default_command_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            poll_interval_millis: default_poll_interval_millis(),
            settle_delay_millis: default_settle_delay_millis(),
            max_ambiguous_polls: default_max_ambiguous_polls(),
            forbidden_commands: default_forbidden_commands(),
            setup_commands: default_setup_commands(),
        }
    }
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_millis)
    }

    /// Password from the environment wins over the config file.
    pub fn resolved_password(&self) -> Option<String> {
        std::env::var(PASSWORD_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| self.password.clone())
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub session: SessionConfig,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.deeppentest/config.toml` file and
    /// load it. Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
