mod commands;
mod config;
mod error;
mod hooks;
mod proxy;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "assh", about = "Advanced SSH config", version)]
struct Cli {
    /// Path to the assh config file (default: ~/.ssh/assh.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a host, used by ProxyCommand
    Proxy {
        /// Destination, possibly user@target/gateway
        target: String,

        /// Override the resolved SSH destination port
        #[arg(long, short)]
        port: Option<u16>,

        /// Describe the connection instead of dialing
        #[arg(long)]
        dry_run: bool,

        /// Do not regenerate an outdated generated ssh config
        #[arg(long)]
        no_rewrite: bool,
    },

    /// Build and print the generated ssh config
    Build,

    /// TCP "ping" a host from the configuration
    Ping {
        target: String,

        /// Override the resolved SSH destination port
        #[arg(long, short)]
        port: Option<u16>,

        /// Number of probes, 0 means until interrupted
        #[arg(long, short, default_value_t = 3)]
        count: u64,

        /// Seconds to wait between probes
        #[arg(long, default_value_t = 1.0)]
        wait: f64,

        /// Seconds to wait for each reply
        #[arg(long, default_value_t = 10.0)]
        waittime: f64,

        /// Exit after the first successful probe
        #[arg(short = 'o')]
        exit_on_success: bool,
    },

    /// Display system-wide information
    Info,

    /// Print the gateway graph in dot format
    Graphviz,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Diagnostics go to stderr: stdout is the SSH byte pipe.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Proxy {
            target,
            port,
            dry_run,
            no_rewrite,
        } => commands::proxy(cli.config, &target, port, dry_run, no_rewrite).await,
        Commands::Build => commands::build(cli.config),
        Commands::Ping {
            target,
            port,
            count,
            wait,
            waittime,
            exit_on_success,
        } => {
            commands::ping(
                cli.config,
                &target,
                port,
                count,
                wait,
                waittime,
                exit_on_success,
            )
            .await
        }
        Commands::Info => commands::info(cli.config),
        Commands::Graphviz => commands::graphviz(cli.config),
    }
}
