//! FEMS gateway tools
//!
//! `fems init` runs the boot-time self-test; `fems tunnel` inspects and
//! switches the remote access tunnel by hand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fems_init::{
    reconcile_blocking, InitDeps, InitWorkflow, Settings, SystemdTunnel, TunnelManager,
    DEFAULT_CONFIG_PATH,
};
use fems_yaler::{
    FileLock, Reconciled, RelayDomain, ServiceIdentity, SystemCommandRunner, TunnelState,
};

/// FEMS gateway self-test and remote access tools
#[derive(Parser, Debug)]
#[command(name = "fems")]
#[command(about = "FEMS gateway self-test and remote access tunnel", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Gateway properties file
    #[arg(long, global = true, env = "FEMS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FEMS_LOG", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the boot-time self-test and report to the online monitoring
    Init,

    /// Manage the remote access tunnel
    Tunnel {
        #[command(subcommand)]
        command: TunnelCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum TunnelCommands {
    /// Show whether the tunnel service is running
    Status,

    /// Install and start the tunnel through a relay domain
    Enable {
        /// Relay domain (fenecon-xxxx-xxxx)
        domain: String,
    },

    /// Stop the tunnel and remove its unit
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Init) => {
            let code = run_init(&cli.config).await?;
            std::process::exit(code);
        }
        Some(Commands::Tunnel { command }) => handle_tunnel_command(&cli.config, command).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn run_init(config: &Path) -> Result<i32> {
    let (settings, config_error) = Settings::load(config);
    let deps = InitDeps::system(settings, config_error)
        .context("Failed to set up the self-test")?;

    let report = InitWorkflow::new(deps).run().await;
    Ok(report.exit_code())
}

async fn handle_tunnel_command(config: &Path, command: TunnelCommands) -> Result<()> {
    let (settings, config_error) = Settings::load(config);
    if let Some(e) = config_error {
        warn!("{}", e);
    }

    let tunnel: Arc<dyn TunnelManager> = Arc::new(SystemdTunnel::new(
        ServiceIdentity::default(),
        Arc::new(SystemCommandRunner),
        Arc::new(FileLock::new(settings.control_lock)),
    ));

    let desired = match command {
        TunnelCommands::Status => {
            let status = tokio::task::spawn_blocking(move || tunnel.status())
                .await
                .context("Tunnel status task failed")?;
            println!("{}", status);
            return Ok(());
        }
        TunnelCommands::Enable { domain } => {
            let domain = RelayDomain::parse(&domain)?;
            TunnelState::Enabled(domain.as_str().to_string())
        }
        TunnelCommands::Disable => TunnelState::Disabled,
    };

    match reconcile_blocking(tunnel, desired).await? {
        Reconciled::Unchanged => info!("Tunnel already in the requested state"),
        Reconciled::Activated => info!("Tunnel activated"),
        Reconciled::Deactivated => info!("Tunnel deactivated"),
    }

    Ok(())
}
