//! Compose command rendering

use std::fmt;
use std::str::FromStr;

use fleetops_exec::transfer::shell_quote;
use serde::{Deserialize, Serialize};

use crate::error::ComposeError;

/// A `KEY=VALUE` override prefixed to compose commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl FromStr for EnvVar {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| ComposeError::ConfigError(format!("expected KEY=VALUE, got '{s}'")))?;

        let mut chars = key.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ComposeError::ConfigError(format!(
                "invalid variable name '{key}'"
            )));
        }

        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, shell_quote(&self.value))
    }
}

/// Which compose services a command applies to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceScope {
    /// Every service in the compose files
    #[default]
    All,
    /// Only the named services
    Services(Vec<String>),
}

impl ServiceScope {
    /// Scope from a service list, treating an empty list as all services
    #[must_use]
    pub fn from_services(services: Vec<String>) -> Self {
        if services.is_empty() {
            ServiceScope::All
        } else {
            ServiceScope::Services(services)
        }
    }

    /// Trailing command arguments for this scope (with leading space)
    fn args(&self) -> String {
        match self {
            ServiceScope::All => String::new(),
            ServiceScope::Services(names) => format!(" {}", names.join(" ")),
        }
    }
}

/// Compose project rooted at a deploy directory on the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    /// Directory the compose commands run in
    deploy_path: String,
    /// Explicit compose files (`-f`), empty for the compose default
    files: Vec<String>,
    /// Variables prefixed to every invocation
    env: Vec<EnvVar>,
}

impl ComposeProject {
    /// Create a project for `deploy_path`
    pub fn new(deploy_path: impl Into<String>) -> Self {
        Self {
            deploy_path: deploy_path.into(),
            files: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Use these compose files instead of the default
    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// Prefix these variables to every command
    #[must_use]
    pub fn with_env(mut self, env: Vec<EnvVar>) -> Self {
        self.env = env;
        self
    }

    /// Deploy directory
    #[must_use]
    pub fn deploy_path(&self) -> &str {
        &self.deploy_path
    }

    /// Build docker compose command
    fn compose_cmd(&self, args: &str, scope: &ServiceScope) -> String {
        let env: String = self.env.iter().map(|v| format!("{v} ")).collect();
        let files: String = self.files.iter().map(|f| format!(" -f {f}")).collect();
        format!(
            "cd {} && {env}docker compose{files} {args}{}",
            self.deploy_path,
            scope.args()
        )
    }

    /// `docker compose build`
    #[must_use]
    pub fn build_cmd(&self, scope: &ServiceScope) -> String {
        self.compose_cmd("build", scope)
    }

    /// `docker compose up -d --remove-orphans`
    #[must_use]
    pub fn up_cmd(&self, scope: &ServiceScope) -> String {
        self.compose_cmd("up -d --remove-orphans", scope)
    }

    /// `docker compose restart`
    #[must_use]
    pub fn restart_cmd(&self, scope: &ServiceScope) -> String {
        self.compose_cmd("restart", scope)
    }

    /// `docker compose pull`
    #[must_use]
    pub fn pull_cmd(&self, scope: &ServiceScope) -> String {
        self.compose_cmd("pull", scope)
    }

    /// Stop and remove existing containers
    #[must_use]
    pub fn remove_cmd(&self, scope: &ServiceScope) -> String {
        self.compose_cmd("rm -s -f", scope)
    }

    /// `docker compose ps`
    #[must_use]
    pub fn ps_cmd(&self) -> String {
        self.compose_cmd("ps", &ServiceScope::All)
    }

    /// Remove dangling images
    #[must_use]
    pub fn prune_cmd() -> String {
        "docker image prune -f".to_string()
    }

    /// Registry login reading the password from stdin
    #[must_use]
    pub fn login_cmd(registry: &str, username: &str) -> String {
        format!(
            "docker login {registry} -u {} --password-stdin",
            shell_quote(username)
        )
    }
}
