//! fleetops CLI
//!
//! Deploys docker compose applications to the nodes bound to a target and
//! manages their resource pool

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use fleetops_api::events::DeployEvent;
use fleetops_client::HttpClient;
use fleetops_core::{
    CandidateFilter, DeployConfig, DeployLocks, DeployMode, DeployRequest, DeployScheduler,
    DirectoryService, NewNodeGroup, NodeBinding, NodeId, PoolActorArgs, PoolHandle, Strategy,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod directory;
mod factory;
mod output;
mod prompt;
mod update;

use config::{LogSettings, Settings};
use directory::HttpDirectory;
use factory::SshExecutorFactory;
use prompt::DialoguerPicker;
use update::ReleaseCheck;

#[derive(Parser)]
#[command(name = "fleetops", version)]
#[command(about = "Deploy docker compose apps across a fleet of nodes", long_about = None)]
struct Cli {
    /// Deploy descriptor
    #[arg(short = 'f', long = "file", global = true, default_value = "ops.toml")]
    file: PathBuf,

    /// CLI settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Look for a newer release before running
    #[arg(long, global = true)]
    check_update: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy to every node bound to the target
    Deploy(DeployArgs),

    /// Show `docker compose ps` on every bound node
    Status,

    /// Inspect and manage the target's node pool
    Pool {
        #[command(subcommand)]
        command: PoolCommand,
    },

    /// Create and list node groups
    #[command(name = "node-group")]
    NodeGroup {
        #[command(subcommand)]
        command: NodeGroupCommand,
    },

    /// Bind a node to the target
    Set {
        #[arg(long)]
        node: NodeId,
        /// Make it the primary node
        #[arg(long)]
        primary: bool,
        /// Weight for weighted selection (1-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
        weight: Option<u8>,
    },
}

#[derive(Args)]
struct DeployArgs {
    /// Compose services to deploy, comma separated
    #[arg(long, conflicts_with = "app")]
    service: Option<String>,

    /// App group from the descriptor
    #[arg(long)]
    app: Option<String>,

    /// Deploy only this node, even if drained
    #[arg(long)]
    node: Option<NodeId>,

    /// Deploy only nodes in this region
    #[arg(long)]
    region: Option<String>,

    /// One node at a time, stopping at the first failure
    #[arg(long)]
    rolling: bool,

    /// Restart services without syncing or building
    #[arg(long)]
    restart_only: bool,

    /// Remove existing containers before starting
    #[arg(long)]
    force: bool,

    /// Extra environment for compose, `KEY=VALUE` (repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Fail instead of prompting for a node when none is bound
    #[arg(long, short = 'y')]
    non_interactive: bool,
}

#[derive(Subcommand)]
enum PoolCommand {
    /// Membership, strategy and node health
    Status,
    /// Change the load-balancing strategy
    Strategy { strategy: Strategy },
    /// Take a node out of rotation
    Drain { node: NodeId },
    /// Put a drained node back into rotation
    Undrain { node: NodeId },
}

#[derive(Subcommand)]
enum NodeGroupCommand {
    /// Create a node group for a project environment
    Create {
        #[arg(long)]
        project: String,
        #[arg(long)]
        environment: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "round-robin")]
        strategy: Strategy,
    },
    /// List node groups
    List {
        #[arg(long)]
        project: Option<String>,
    },
}

/// Shared wiring for every command
struct App {
    settings: Settings,
    directory: Arc<dyn DirectoryService>,
    pool: PoolHandle,
    events: broadcast::Sender<DeployEvent>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let settings = Settings::load_default(cli.config.as_deref())?;
    init_tracing(&settings.log);

    if cli.check_update {
        check_update().await;
    }

    let app = App::new(settings)?;
    let code = app.run(&cli).await;
    app.pool.shutdown().await;

    match code? {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

/// `RUST_LOG` wins over `log.level`
fn init_tracing(log: &LogSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn check_update() {
    let result = match ReleaseCheck::new() {
        Ok(check) => check.check().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(Some(update)) => eprintln!(
            "fleetops {} is available (you have {}): {}",
            update.latest, update.current, update.url
        ),
        Ok(None) => debug!("fleetops is up to date"),
        Err(e) => warn!(error = %e, "update check failed"),
    }
}

impl App {
    fn new(settings: Settings) -> Result<Self> {
        let mut client = HttpClient::new(&settings.api.base_url)?;
        if let Some(token) = &settings.api.token {
            client = client.with_token(token.clone());
        }
        let directory: Arc<dyn DirectoryService> = Arc::new(HttpDirectory::new(client));

        let (events, _) = broadcast::channel(256);
        let pool = PoolHandle::spawn(PoolActorArgs::new(directory.clone(), events.clone()));

        Ok(Self {
            settings,
            directory,
            pool,
            events,
        })
    }

    /// Exit code of the command
    async fn run(&self, cli: &Cli) -> Result<i32> {
        match &cli.command {
            Commands::Deploy(args) => self.deploy(&cli.file, args).await,
            Commands::Status => {
                let config = DeployConfig::load(&cli.file)?;
                let reports = self.scheduler(&cli.file).status(&config).await?;
                output::print_status(&reports);
                Ok(if reports.iter().all(|r| r.output.is_ok()) { 0 } else { 1 })
            }
            Commands::Pool { command } => {
                let config = DeployConfig::load(&cli.file)?;
                self.pool_command(&config, command).await?;
                Ok(0)
            }
            Commands::NodeGroup { command } => {
                self.node_group_command(command).await?;
                Ok(0)
            }
            Commands::Set {
                node,
                primary,
                weight,
            } => {
                let config = DeployConfig::load(&cli.file)?;
                let binding = NodeBinding {
                    node_id: *node,
                    primary: *primary,
                    weight: *weight,
                };
                self.pool.bind_node(&config.target, binding).await?;
                println!("node {node} bound to {}", config.target);
                Ok(0)
            }
        }
    }

    fn scheduler(&self, descriptor: &Path) -> DeployScheduler {
        let deploy = &self.settings.deploy;
        let mut locks = DeployLocks::new();
        if let Some(dir) = deploy.lock_dir() {
            locks = locks.with_lock_dir(dir);
        }
        let workdir = descriptor
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        DeployScheduler::new(
            self.pool.clone(),
            self.directory.clone(),
            Arc::new(SshExecutorFactory::new(self.settings.ssh.clone())),
            self.events.clone(),
        )
        .with_locks(locks)
        .with_picker(Arc::new(DialoguerPicker))
        .with_health_policy(deploy.health_policy())
        .with_command_timeout(deploy.command_timeout())
        .with_workdir(workdir)
    }

    async fn deploy(&self, descriptor: &Path, args: &DeployArgs) -> Result<i32> {
        let config = Arc::new(DeployConfig::load(descriptor)?);
        let request = DeployRequest {
            service: args.service.clone(),
            app_group: args.app.clone(),
            filter: CandidateFilter {
                node: args.node,
                region: args.region.clone(),
            },
            mode: if args.rolling {
                DeployMode::Rolling
            } else {
                DeployMode::Parallel
            },
            restart_only: args.restart_only,
            force: args.force,
            set_vars: args.env.clone(),
            non_interactive: args.non_interactive,
            ..DeployRequest::default()
        };

        let scheduler = self.scheduler(descriptor);
        let cancel = scheduler.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; nodes already started will finish");
                cancel.cancel();
            }
        });

        let printer = output::spawn_event_printer(self.events.subscribe());
        let result = scheduler.deploy(config, request).await;
        interrupt.abort();

        match result {
            Ok(summary) => {
                // the printer stops after DeployFinished
                if tokio::time::timeout(Duration::from_secs(1), printer)
                    .await
                    .is_err()
                {
                    debug!("event printer did not drain");
                }
                output::print_summary(&summary);
                Ok(summary.exit_code())
            }
            Err(e) => {
                printer.abort();
                Err(e.into())
            }
        }
    }

    async fn pool_command(&self, config: &DeployConfig, command: &PoolCommand) -> Result<()> {
        let target = &config.target;
        match command {
            PoolCommand::Status => {
                let report = self.pool.status(target).await?;
                output::print_pool_status(&report);
            }
            PoolCommand::Strategy { strategy } => {
                let group = self.pool.set_strategy(target, *strategy).await?;
                println!("group {} ({}) now uses {}", group.id, group.name, group.strategy);
            }
            PoolCommand::Drain { node } => {
                self.pool.drain(target, *node).await?;
                println!("node {node} drained from {target}");
            }
            PoolCommand::Undrain { node } => {
                self.pool.undrain(target, *node).await?;
                println!("node {node} back in rotation for {target}");
            }
        }
        Ok(())
    }

    async fn node_group_command(&self, command: &NodeGroupCommand) -> Result<()> {
        match command {
            NodeGroupCommand::Create {
                project,
                environment,
                name,
                strategy,
            } => {
                let group = self
                    .pool
                    .create_group(NewNodeGroup {
                        project: project.clone(),
                        environment: environment.clone(),
                        name: name.clone(),
                        strategy: *strategy,
                    })
                    .await?;
                println!("created node group {} ({})", group.id, group.name);
            }
            NodeGroupCommand::List { project } => {
                let groups = self.pool.list_groups(project.as_deref()).await?;
                output::print_groups(&groups);
            }
        }
        Ok(())
    }
}
