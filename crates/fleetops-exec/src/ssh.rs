//! SSH command execution using russh crate

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::error::ExecError;
use crate::keys::{KeySource, ResolvedKey};
use crate::result::{CommandResult, ConnectionInfo};
use crate::traits::RemoteExecutor;
use crate::transfer::{TransferOptions, TransferPlan, shell_quote};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Nodes are addressed by freshly issued domains, same as
        // StrictHostKeyChecking=no
        Ok(true)
    }
}

/// SSH command executor
///
/// Holds one SSH session per node. The connection is established on first
/// use and reused for every stage of a deploy.
pub struct SshExecutor {
    /// Connection configuration
    conn_info: ConnectionInfo,
    /// Resolved SSH key
    key: ResolvedKey,
    /// SSH session (initialized on first use)
    session: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("conn_info", &self.conn_info)
            .field("key", &self.key)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create a new SSH executor
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn new(conn_info: ConnectionInfo, key_source: &KeySource) -> Result<Self, ExecError> {
        let key = key_source
            .resolve()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        Ok(Self {
            conn_info,
            key,
            session: Mutex::new(None),
        })
    }

    /// Get connection info
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.conn_info
    }

    /// Connect to the remote host
    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn connect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if session_lock.is_some() {
            return Ok(());
        }

        info!(
            host = %self.conn_info.host,
            port = self.conn_info.port,
            user = %self.conn_info.user,
            "connecting to SSH"
        );

        let config = Arc::new(client::Config::default());

        let mut session = client::connect(
            config,
            (&self.conn_info.host[..], self.conn_info.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

        let Some(key_path) = self.key.path() else {
            return Err(ExecError::AuthenticationFailed(
                "SSH agent authentication is not supported, configure a key".to_string(),
            ));
        };

        let key_pair =
            load_secret_key(key_path, None).map_err(|e| ExecError::SshKeyError(e.to_string()))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth_res = session
            .authenticate_publickey(
                &self.conn_info.user,
                PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
            )
            .await
            .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(
                "public key authentication failed".to_string(),
            ));
        }

        info!(host = %self.conn_info.host, "SSH connected and authenticated");

        *session_lock = Some(session);
        Ok(())
    }

    /// Execute command on remote host, optionally feeding stdin
    #[instrument(skip(self, cmd, input), fields(host = %self.conn_info.host))]
    async fn execute_remote(
        &self,
        cmd: &str,
        input: Option<&[u8]>,
    ) -> Result<CommandResult, ExecError> {
        let mut session_lock = self.session.lock().await;

        let session = session_lock.as_mut().ok_or(ExecError::NotConnected)?;

        debug!(command = %cmd, "executing remote command");

        let start = Instant::now();

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        channel
            .exec(true, cmd)
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        if let Some(data) = input {
            channel
                .data(data)
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            channel
                .eof()
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
        }

        let mut output = ChannelOutput::default();
        while let Some(msg) = channel.wait().await {
            if !output.apply(&msg) {
                break;
            }
        }
        let status = output.status();

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        debug!(
            command = %cmd,
            status = status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandResult {
            status,
            stdout,
            stderr,
            duration,
        })
    }

    /// Delete remote entries a mirrored transfer no longer contains
    async fn remove_stale(
        &self,
        plan: &TransferPlan,
        options: &TransferOptions,
    ) -> Result<usize, ExecError> {
        let Some(listing) = plan.listing_command() else {
            return Ok(0);
        };
        let root = plan.root.clone().unwrap_or_default();
        let listed = self.execute_remote(&listing, None).await?;
        if !listed.success() {
            return Err(ExecError::TransferFailed {
                path: root,
                reason: listed.stderr,
            });
        }

        let stale = plan.stale_entries(&listed.stdout, options);
        let Some(cmd) = stale.removal_command() else {
            return Ok(0);
        };
        let result = self.execute_remote(&cmd, None).await?;
        if !result.success() {
            return Err(ExecError::TransferFailed {
                path: root,
                reason: result.stderr,
            });
        }
        debug!(removed = stale.len(), "stale entries removed");
        Ok(stale.len())
    }

    /// Disconnect from remote host
    ///
    /// # Errors
    /// Returns `ExecError::IoError` if disconnection fails
    pub async fn disconnect(&self) -> Result<(), ExecError> {
        let mut session_lock = self.session.lock().await;

        if let Some(session) = session_lock.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::IoError(e.to_string()))?;
            info!(host = %self.conn_info.host, "SSH disconnected");
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.connect().await?;
        self.execute_remote(cmd, None).await
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout_duration: Duration,
    ) -> Result<CommandResult, ExecError> {
        let start = Instant::now();

        debug!(command = %cmd, timeout = ?timeout_duration, "executing with timeout");

        // Connect outside of the timeout
        self.connect().await?;

        match timeout(timeout_duration, self.execute_remote(cmd, None)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    command = %cmd,
                    timeout = ?timeout_duration,
                    elapsed = ?start.elapsed(),
                    "command timed out"
                );
                Err(ExecError::Timeout {
                    timeout: timeout_duration,
                })
            }
        }
    }

    async fn run_with_input(&self, cmd: &str, input: &[u8]) -> Result<CommandResult, ExecError> {
        self.connect().await?;
        self.execute_remote(cmd, Some(input)).await
    }

    #[instrument(skip(self, options), fields(host = %self.conn_info.host))]
    async fn transfer(
        &self,
        local: &Path,
        remote: &str,
        options: &TransferOptions,
    ) -> Result<(), ExecError> {
        let plan = TransferPlan::build(local, remote, options)?;
        self.connect().await?;

        if !plan.dirs.is_empty() {
            let dirs: Vec<String> = plan.dirs.iter().map(|d| shell_quote(d)).collect();
            let result = self
                .execute_remote(&format!("mkdir -p {}", dirs.join(" ")), None)
                .await?;
            if !result.success() {
                return Err(ExecError::TransferFailed {
                    path: remote.to_string(),
                    reason: result.stderr,
                });
            }
        }

        for file in &plan.files {
            let contents = tokio::fs::read(&file.local)
                .await
                .map_err(|e| ExecError::TransferFailed {
                    path: file.local.display().to_string(),
                    reason: e.to_string(),
                })?;
            let result = self
                .execute_remote(&file.upload_command(), Some(&contents))
                .await?;
            if !result.success() {
                return Err(ExecError::TransferFailed {
                    path: file.remote.clone(),
                    reason: result.stderr,
                });
            }
        }

        let removed = if options.delete {
            self.remove_stale(&plan, options).await?
        } else {
            0
        };

        info!(files = plan.files.len(), removed, remote = %remote, "transfer completed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        // Best effort: a held lock means a command is in flight on a live session
        self.session
            .try_lock()
            .map(|s| s.is_some())
            .unwrap_or(true)
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

/// Output collected from one exec channel
///
/// The exit status may arrive after EOF, so reading stops only at `Close`.
#[derive(Debug, Default)]
struct ChannelOutput {
    exit_status: Option<u32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ChannelOutput {
    /// Fold in one message; `false` once the channel is closed
    fn apply(&mut self, msg: &ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(data),
            // ext 1 is stderr
            ChannelMsg::ExtendedData { data, ext: 1 } => self.stderr.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(*exit_status),
            ChannelMsg::Close => return false,
            _ => {}
        }
        true
    }

    /// Exit status, -1 when the server never sent one
    fn status(&self) -> i32 {
        self.exit_status.map_or(-1, u32::cast_signed)
    }
}

/// Builder for `SshExecutor`
pub struct SshExecutorBuilder {
    conn_info: ConnectionInfo,
    key_source: KeySource,
}

impl SshExecutorBuilder {
    /// Create builder with required fields
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            conn_info: ConnectionInfo::new(host, user),
            key_source: KeySource::Agent,
        }
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.key_source = KeySource::Path(path.into());
        self
    }

    /// Set key from environment variable (base64)
    #[must_use]
    pub fn with_env_key(mut self, var_name: impl Into<String>) -> Self {
        self.key_source = KeySource::Env(var_name.into());
        self
    }

    /// Use an already chosen key source
    #[must_use]
    pub fn with_key_source(mut self, source: KeySource) -> Self {
        self.key_source = source;
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.conn_info.port = port;
        self
    }

    /// Build the executor
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails
    pub fn build(self) -> Result<SshExecutor, ExecError> {
        SshExecutor::new(self.conn_info, &self.key_source)
    }
}
