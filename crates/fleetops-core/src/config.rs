//! Deploy descriptor (`ops.toml`) decoding and validation
//!
//! The file is decoded into raw structs that reject unknown keys, then
//! validated once into [`DeployConfig`]. Nothing downstream re-checks shape.

use std::collections::HashSet;
use std::path::Path;

use fleetops_compose::ServiceScope;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::Target;

/// Validated deploy descriptor, immutable for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub target: Target,
    pub deploy_path: String,
    pub source: Source,
    pub branch: String,
    pub compose_files: Vec<String>,
    pub apps: Vec<AppGroup>,
    pub env_files: Vec<FileMapping>,
    pub sync: Vec<FileMapping>,
    pub routes: Vec<Route>,
    pub healthchecks: Vec<Healthcheck>,
    pub build: Option<BuildSection>,
}

/// Where code comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Clone or pull on the node
    Git {
        repo: String,
        /// Local deploy key uploaded before the first clone
        ssh_key: Option<String>,
    },
    /// Transfer the local working tree
    Push,
    /// Pull prebuilt images
    Image { registry: Option<Registry> },
}

impl Source {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Git { .. } => "git",
            Self::Push => "push",
            Self::Image { .. } => "image",
        }
    }
}

/// Container registry credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    pub url: String,
    pub username: SecretRef,
    pub token: SecretRef,
}

/// A literal value or a `$NAME` environment reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretRef {
    Literal(String),
    Env(String),
}

impl SecretRef {
    /// Interpret `$NAME` as an environment reference
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('$') {
            Some(name) => Self::Env(name.to_string()),
            None => Self::Literal(raw.to_string()),
        }
    }

    /// Resolve against the process environment
    ///
    /// # Errors
    /// Returns `ConfigError::EnvNotSet` if the referenced variable is unset
    pub fn resolve(&self) -> Result<String, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve with a custom variable lookup
    ///
    /// # Errors
    /// Returns `ConfigError::EnvNotSet` if `lookup` yields nothing
    pub fn resolve_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<String, ConfigError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Env(name) => lookup(name).ok_or_else(|| ConfigError::EnvNotSet(name.clone())),
        }
    }
}

/// Registry login with secrets resolved
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryLogin {
    pub url: String,
    pub username: String,
    pub token: String,
}

impl std::fmt::Debug for RegistryLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryLogin")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Named set of compose services (`--app`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppGroup {
    pub name: String,
    pub services: Vec<String>,
}

/// Local path copied to a path relative to the deploy directory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileMapping {
    pub local: String,
    pub remote: String,
}

/// Reverse-proxy route
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    pub domain: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
}

/// Post-deploy probe
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Healthcheck {
    pub name: String,
    pub url: String,
}

/// `[build]` section, consumed by the remote build command
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildSection {
    pub node: Option<u64>,
    pub path: Option<String>,
    pub command: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    project: Option<String>,
    app: Option<String>,
    target: Option<String>,
    deploy_path: Option<String>,
    deploy: Option<RawDeploy>,
    #[serde(default)]
    apps: Vec<AppGroup>,
    #[serde(default)]
    env_files: Vec<FileMapping>,
    #[serde(default)]
    sync: Vec<FileMapping>,
    #[serde(default)]
    routes: Vec<Route>,
    #[serde(default)]
    healthchecks: Vec<Healthcheck>,
    build: Option<BuildSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SourceKind {
    Git,
    Push,
    Image,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDeploy {
    source: SourceKind,
    branch: Option<String>,
    #[serde(default)]
    compose_files: Vec<String>,
    git: Option<RawGit>,
    registry: Option<RawRegistry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGit {
    repo: String,
    ssh_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistry {
    url: String,
    username: String,
    token: String,
}

impl DeployConfig {
    /// Load and validate a descriptor file
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file cannot be read, parsed or validated
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        content.parse()
    }

    /// Resolve registry secrets; called before any remote action
    ///
    /// # Errors
    /// Returns `ConfigError::EnvNotSet` for an unset `$NAME` reference
    pub fn registry_login(&self) -> Result<Option<RegistryLogin>, ConfigError> {
        let Source::Image {
            registry: Some(registry),
        } = &self.source
        else {
            return Ok(None);
        };

        Ok(Some(RegistryLogin {
            url: registry.url.clone(),
            username: registry.username.resolve()?,
            token: registry.token.resolve()?,
        }))
    }

    /// Compose services targeted by `--service` / `--app`
    ///
    /// `--service` wins over `--app`; neither means every service.
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownAppGroup` if `app` is not declared
    pub fn service_scope(
        &self,
        service: Option<&str>,
        app: Option<&str>,
    ) -> Result<ServiceScope, ConfigError> {
        if let Some(service) = service {
            let names = service
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(ServiceScope::from_services(names));
        }

        if let Some(app) = app {
            let group = self
                .apps
                .iter()
                .find(|group| group.name == app)
                .ok_or_else(|| ConfigError::UnknownAppGroup(app.to_string()))?;
            return Ok(ServiceScope::from_services(group.services.clone()));
        }

        Ok(ServiceScope::All)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let target = resolve_target(raw.project, raw.app, raw.target)?;

        let deploy_path = raw
            .deploy_path
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigError::Missing("deploy_path".to_string()))?;
        // every remote command single-quotes the path, so `~` would stay literal
        if !deploy_path.starts_with('/') {
            return Err(invalid("deploy_path", "must be an absolute path, `~` is not expanded"));
        }
        if deploy_path
            .chars()
            .any(|c| c.is_whitespace() || "'\"`$;&|<>()*?\\".contains(c))
        {
            return Err(invalid("deploy_path", "must not contain whitespace or shell metacharacters"));
        }

        let deploy = raw
            .deploy
            .ok_or_else(|| ConfigError::Missing("deploy.source".to_string()))?;
        let source = match deploy.source {
            SourceKind::Git => {
                if deploy.registry.is_some() {
                    return Err(invalid("deploy.registry", "only valid with source = \"image\""));
                }
                let git = deploy
                    .git
                    .ok_or_else(|| ConfigError::Missing("deploy.git.repo".to_string()))?;
                if git.repo.trim().is_empty() {
                    return Err(ConfigError::Missing("deploy.git.repo".to_string()));
                }
                Source::Git {
                    repo: git.repo,
                    ssh_key: git.ssh_key,
                }
            }
            SourceKind::Push => {
                if deploy.git.is_some() || deploy.registry.is_some() {
                    return Err(invalid("deploy", "source = \"push\" takes no git or registry section"));
                }
                Source::Push
            }
            SourceKind::Image => {
                if deploy.git.is_some() {
                    return Err(invalid("deploy.git", "only valid with source = \"git\""));
                }
                Source::Image {
                    registry: deploy.registry.map(|r| Registry {
                        url: r.url,
                        username: SecretRef::parse(&r.username),
                        token: SecretRef::parse(&r.token),
                    }),
                }
            }
        };

        let mut seen = HashSet::new();
        for group in &raw.apps {
            if !seen.insert(group.name.as_str()) {
                return Err(invalid("apps", &format!("duplicate app group `{}`", group.name)));
            }
            if group.services.is_empty() {
                return Err(invalid("apps", &format!("app group `{}` has no services", group.name)));
            }
        }

        for route in &raw.routes {
            if route.domain.trim().is_empty() {
                return Err(ConfigError::Missing("routes.domain".to_string()));
            }
            if !is_hostname(&route.domain) {
                return Err(invalid("routes.domain", &format!("`{}` is not a hostname", route.domain)));
            }
            if route.port == 0 {
                return Err(invalid("routes.port", &format!("port 0 for {}", route.domain)));
            }
        }

        for mapping in raw.env_files.iter().chain(&raw.sync) {
            if mapping.local.is_empty() || mapping.remote.is_empty() {
                return Err(invalid("env_files/sync", "local and remote must be non-empty"));
            }
        }

        for check in &raw.healthchecks {
            if check.url.trim().is_empty() {
                return Err(ConfigError::Missing(format!("healthchecks.{}.url", check.name)));
            }
        }

        Ok(Self {
            target,
            deploy_path: deploy_path.trim_end_matches('/').to_string(),
            source,
            branch: deploy.branch.unwrap_or_else(|| "main".to_string()),
            compose_files: deploy.compose_files,
            apps: raw.apps,
            env_files: raw.env_files,
            sync: raw.sync,
            routes: raw.routes,
            healthchecks: raw.healthchecks,
            build: raw.build,
        })
    }
}

impl std::str::FromStr for DeployConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawConfig = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(raw)
    }
}

/// `project` + `app` is the primary surface; `target = "app.project"` is
/// accepted when `app` is absent and must agree with `project` if both exist.
fn resolve_target(
    project: Option<String>,
    app: Option<String>,
    legacy: Option<String>,
) -> Result<Target, ConfigError> {
    match (app, legacy) {
        (Some(app), legacy) => {
            let target = match project {
                Some(project) => Target::new(app, project),
                None => Target::app_only(app),
            };
            if let Some(legacy) = legacy {
                let parsed: Target = legacy.parse()?;
                if parsed != target {
                    return Err(invalid(
                        "target",
                        &format!("`{parsed}` disagrees with app/project `{target}`"),
                    ));
                }
            }
            Ok(target)
        }
        (None, Some(legacy)) => {
            let parsed: Target = legacy.parse()?;
            if let Some(project) = project
                && parsed.project.as_deref() != Some(project.as_str())
            {
                return Err(invalid(
                    "target",
                    &format!("`{parsed}` disagrees with project `{project}`"),
                ));
            }
            Ok(parsed)
        }
        (None, None) => Err(ConfigError::Missing("app".to_string())),
    }
}

/// DNS name with an optional leading `*.` wildcard label
fn is_hostname(domain: &str) -> bool {
    let name = domain.strip_prefix("*.").unwrap_or(domain);
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
