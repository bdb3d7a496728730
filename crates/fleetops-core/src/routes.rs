//! Route configurator: nginx server blocks and certificate issuance

use std::fmt::Write as _;

use fleetops_exec::RemoteExecutor;
use fleetops_exec::transfer::shell_quote;
use tracing::{info, instrument, warn};

use crate::config::Route;
use crate::error::NodeError;

const SITES_AVAILABLE: &str = "/etc/nginx/sites-available";
const SITES_ENABLED: &str = "/etc/nginx/sites-enabled";

/// Marker printed by the certbot command when certbot is missing
const CERTBOT_MISSING: &str = "certbot not installed, skipping SSL";

/// Renders and installs reverse-proxy config on a node
#[derive(Debug, Clone, Default)]
pub struct RouteConfigurator;

impl RouteConfigurator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Per-app config file name
    #[must_use]
    pub fn conf_name(app: &str) -> String {
        format!("ops-{app}.conf")
    }

    /// One server block per route, proxying to `127.0.0.1:<port>`
    #[must_use]
    pub fn render(routes: &[Route]) -> String {
        let mut out = String::new();
        for route in routes {
            let _ = write!(
                out,
                r#"server {{
    listen 80;
    server_name {domain};

    location / {{
        proxy_pass http://127.0.0.1:{port};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection "upgrade";
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_read_timeout 86400;
        proxy_buffering off;
        proxy_cache off;
        chunked_transfer_encoding on;
    }}
}}

"#,
                domain = route.domain,
                port = route.port,
            );
        }
        out
    }

    /// Single certbot invocation covering every SSL route, if any
    #[must_use]
    pub fn certbot_cmd(routes: &[Route]) -> Option<String> {
        let domains: Vec<&str> = routes
            .iter()
            .filter(|r| r.ssl)
            .map(|r| r.domain.as_str())
            .collect();
        let first = domains.first()?;

        let args = domains
            .iter()
            .map(|d| format!("-d {d}"))
            .collect::<Vec<_>>()
            .join(" ");
        Some(format!(
            "if command -v certbot > /dev/null 2>&1; then certbot --nginx {args} --non-interactive --agree-tos --email admin@{first}; else echo '{CERTBOT_MISSING}'; fi"
        ))
    }

    /// Write, enable and reload the config, then request certificates
    ///
    /// No-op when `routes` is empty.
    ///
    /// # Errors
    /// Returns `NodeError::Route` if any step exits non-zero, or a transport
    /// error if the node cannot be reached
    #[instrument(skip(self, executor, routes), fields(routes = routes.len()))]
    pub async fn configure(
        &self,
        executor: &dyn RemoteExecutor,
        app: &str,
        routes: &[Route],
    ) -> Result<(), NodeError> {
        if routes.is_empty() {
            return Ok(());
        }

        let conf = Self::conf_name(app);
        let available = format!("{SITES_AVAILABLE}/{conf}");
        let body = Self::render(routes);

        let written = executor
            .run_with_input(&format!("cat > {}", shell_quote(&available)), body.as_bytes())
            .await?;
        if !written.success() {
            return Err(NodeError::Route(format!(
                "writing {available}: {}",
                written.combined_output()
            )));
        }

        let enable = format!(
            "ln -sf {} {SITES_ENABLED}/ && nginx -t && systemctl reload nginx",
            shell_quote(&available)
        );
        let enabled = executor.run(&enable).await?;
        if !enabled.success() {
            return Err(NodeError::Route(format!(
                "nginx rejected {conf}: {}",
                enabled.combined_output()
            )));
        }
        info!(conf = %conf, "nginx config enabled");

        if let Some(cmd) = Self::certbot_cmd(routes) {
            let issued = executor.run(&cmd).await?;
            if !issued.success() {
                return Err(NodeError::Route(format!(
                    "certbot failed: {}",
                    issued.combined_output()
                )));
            }
            if issued.stdout.contains(CERTBOT_MISSING) {
                warn!("certbot not installed on node, SSL routes served over http");
            }
        }

        Ok(())
    }
}
