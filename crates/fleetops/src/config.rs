//! CLI settings (`fleetops.toml`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use fleetops_client::http::DEFAULT_BASE_URL;
use fleetops_core::RetryPolicy;
use fleetops_exec::KeySource;
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit settings file
pub const CONFIG_ENV: &str = "FLEETOPS_CONFIG";

/// Environment variable overriding `api.token`
pub const TOKEN_ENV: &str = "OPS_TOKEN";

/// Top-level CLI settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub deploy: DeploySettings,
    #[serde(default)]
    pub log: LogSettings,
}

/// Directory service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token; `OPS_TOKEN` wins when set
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
        }
    }
}

/// How nodes are reached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSettings {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Private key file; the agent is used when neither key option is set
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Variable holding a base64 private key, for CI runners
    #[serde(default)]
    pub key_env: Option<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            key_path: None,
            key_env: None,
        }
    }
}

impl SshSettings {
    /// `key_env` wins over `key_path`, agent otherwise
    #[must_use]
    pub fn key_source(&self) -> KeySource {
        if let Some(var) = &self.key_env {
            return KeySource::Env(var.clone());
        }
        match &self.key_path {
            Some(path) => KeySource::Path(expand_home(path)),
            None => KeySource::Agent,
        }
    }
}

/// Deploy engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploySettings {
    /// Directory for cross-process lock files
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_health_attempts")]
    pub health_attempts: u32,
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            lock_dir: None,
            command_timeout_secs: default_command_timeout(),
            health_attempts: default_health_attempts(),
            health_interval_secs: default_health_interval(),
        }
    }
}

impl DeploySettings {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub fn health_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.health_attempts,
            Duration::from_secs(self.health_interval_secs),
        )
    }

    /// Lock directory with `~` expanded
    #[must_use]
    pub fn lock_dir(&self) -> Option<PathBuf> {
        self.lock_dir.as_deref().map(expand_home)
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_command_timeout() -> u64 {
    600
}

fn default_health_attempts() -> u32 {
    10
}

fn default_health_interval() -> u64 {
    2
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Settings {
    /// Load settings from a file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("cannot read {}: {e}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("invalid settings in {}: {e}", path.display()))?;
        Ok(settings)
    }

    /// Load `explicit`, else the first of `$FLEETOPS_CONFIG`,
    /// `./fleetops.toml` and the user config directory, else defaults;
    /// then apply `OPS_TOKEN`
    ///
    /// # Errors
    /// Returns error if a settings file exists but is invalid
    pub fn load_default(explicit: Option<&Path>) -> eyre::Result<Self> {
        let path = explicit.map(Path::to_path_buf).or_else(Self::locate);
        let mut settings = match path {
            Some(path) => Self::load(&path)?,
            None => Settings::default(),
        };

        if let Ok(token) = std::env::var(TOKEN_ENV)
            && !token.is_empty()
        {
            settings.api.token = Some(token);
        }
        Ok(settings)
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let candidates = [
            Some(PathBuf::from("fleetops.toml")),
            dirs::config_dir().map(|p| p.join("fleetops/config.toml")),
        ];
        candidates.into_iter().flatten().find(|path| path.exists())
    }
}

/// Expand a leading `~/`
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
