//! Command-line entry point for the Melt Stake 881A sonar.
//!
//! ```bash
//! meltstake-sonar run -c config.toml -d 04
//! meltstake-sonar convert data/deployment_04
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use meltstake_sonar::instrument::SystemPorts;
use meltstake_sonar::logging;
use meltstake_sonar::scan::CancelFlag;
use meltstake_sonar::session::{announce, cancel_on, Deployment, DeploymentOptions};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "meltstake-sonar")]
#[command(about = "Drive the Melt Stake 881A scanning sonar and convert its archives")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Scan continuously until interrupted (the default)
    Run(RunArgs),
    /// Convert a deployment directory's archived frames into RunData.csv
    Convert {
        /// Deployment directory containing RunIndex.csv
        dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Deployment identifier
    #[arg(short, long, default_value = "01")]
    deployment: String,

    /// Root directory for scan data
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory for the deployment log
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run(args)) => run(args).await,
        Some(Command::Convert { dir }) => convert(dir),
        None => run(cli.run).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let options = DeploymentOptions {
        deployment: args.deployment,
        config_path: args.config,
        data_dir: args.data_dir,
    };
    let log_file = logging::init_deployment(&args.log_dir, &options.deployment, args.verbose)
        .context("Failed to initialize logging")?;
    announce(&options.deployment);
    info!("Logging to {}", log_file.display());

    let deployment = Deployment::load(&options)
        .with_context(|| format!("Failed to load config from {}", options.config_path.display()))?;
    let link = deployment
        .connect(&SystemPorts)
        .context("Failed to connect to the sonar head")?;

    let cancel = CancelFlag::new();
    tokio::spawn(cancel_on(tokio::signal::ctrl_c(), cancel.clone()));

    let terminal = tokio::task::spawn_blocking(move || deployment.run(link, cancel))
        .await
        .context("Scan task panicked")?
        .context("Scanning stopped on error")?;

    info!("Scanning stopped ({:?})", terminal);
    Ok(())
}

#[cfg(feature = "storage_csv")]
fn convert(dir: PathBuf) -> Result<()> {
    logging::init(None, false).context("Failed to initialize logging")?;
    let summary = meltstake_sonar::archive::convert_run(&dir)
        .with_context(|| format!("Failed to convert {}", dir.display()))?;
    if let Some(params) = summary.params {
        info!(
            "Deployment parameters: sector_width={}, step_size={}, num_sweeps={}",
            params.sector_width, params.step_size, params.num_sweeps
        );
    }
    println!(
        "Wrote {} rows from {} files to {}",
        summary.rows,
        summary.files,
        summary.output.display()
    );
    Ok(())
}

#[cfg(not(feature = "storage_csv"))]
fn convert(_dir: PathBuf) -> Result<()> {
    anyhow::bail!("conversion requires the storage_csv feature")
}
