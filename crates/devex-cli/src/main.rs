//! devex CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "devex")]
#[command(about = "Deploy applications through resource plugins", long_about = None)]
struct Cli {
    /// Worker configuration file (KDL)
    #[arg(long, global = true, env = "DEVEX_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding one sub-directory per plugin kind
    #[arg(long, global = true)]
    plugin_dir: Option<PathBuf>,

    /// Root for per-deployment scratch directories
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an application locally
    Deploy {
        /// Application definition (YAML)
        application: PathBuf,
        /// Configuration values (YAML)
        configuration: PathBuf,
        /// Only run the plan stage of every resource
        #[arg(long)]
        plan_only: bool,
    },
    /// Poll the deployment API and run pending deployments
    RunAsDaemon,
    /// Check an application definition without running any plugin
    Validate {
        /// Application definition (YAML)
        application: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let overrides = commands::Overrides {
        config: cli.config,
        plugin_dir: cli.plugin_dir,
        work_dir: cli.work_dir,
    };

    match cli.command {
        Commands::Deploy {
            application,
            configuration,
            plan_only,
        } => {
            let config = commands::load_config(&overrides)?;
            commands::deploy::run(config, &application, &configuration, plan_only).await?;
        }
        Commands::RunAsDaemon => {
            let config = commands::load_config(&overrides)?;
            commands::daemon::run(config).await?;
        }
        Commands::Validate { application } => {
            commands::validate::run(&application)?;
        }
    }

    Ok(())
}
