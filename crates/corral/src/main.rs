mod commands;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "corral")]
#[command(about = "Bootstrap and manage cloud environments", long_about = None)]
struct Cli {
    /// Environment to operate on (defaults to the file's default)
    #[arg(short = 'e', long = "environment", env = "CORRAL_ENV", global = true)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the environment's first controller machine
    Bootstrap {
        /// Constraints kept for the whole environment, e.g. "mem=4G arch=amd64"
        #[arg(long, default_value = "")]
        constraints: String,
        /// Constraints for the bootstrap machine only
        #[arg(long, default_value = "")]
        bootstrap_constraints: String,
        /// Series of the bootstrap machine
        #[arg(long)]
        bootstrap_series: Option<String>,
        /// Image id to start the bootstrap machine from
        #[arg(long)]
        bootstrap_image: Option<String>,
        /// Placement directive for the bootstrap machine
        #[arg(long = "to")]
        placement: Option<String>,
        /// Build tools from the local agent binary and upload them
        #[arg(long)]
        upload_tools: bool,
        /// Local directory holding tools/ and images/ metadata
        #[arg(long)]
        metadata_source: Option<PathBuf>,
        /// Exact tools version to start agents with
        #[arg(long)]
        agent_version: Option<String>,
    },
    /// Terminate every machine and remove the environment's storage
    #[command(name = "destroy-environment")]
    DestroyEnvironment {
        /// Run without confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show machines, units and instances
    Status,
    /// Generate a sample environments.yaml
    Init {
        /// Print the sample instead of writing it
        #[arg(long)]
        show: bool,
        /// Overwrite an existing environments.yaml
        #[arg(short, long)]
        force: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Version => {
            println!("corral {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Init { show, force } => {
            commands::init::handle(show, force)?;
        }
        Commands::Bootstrap {
            constraints,
            bootstrap_constraints,
            bootstrap_series,
            bootstrap_image,
            placement,
            upload_tools,
            metadata_source,
            agent_version,
        } => {
            let args = commands::bootstrap::BootstrapArgs {
                constraints,
                bootstrap_constraints,
                bootstrap_series,
                bootstrap_image,
                placement,
                upload_tools,
                metadata_source,
                agent_version,
            };
            commands::bootstrap::handle(cli.environment.as_deref(), args).await?;
        }
        Commands::DestroyEnvironment { yes } => {
            commands::destroy::handle(cli.environment.as_deref(), yes).await?;
        }
        Commands::Status => {
            commands::status::handle(cli.environment.as_deref()).await?;
        }
    }

    Ok(())
}
