//! otsync CLI
//!
//! Command-line tools for exercising the otsync engine.
//!
//! # Commands
//!
//! - `simulate` - Race several replicas against one in-memory repository
//! - `graph` - Print the diamond merge scenario as Graphviz

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// otsync command-line tools.
#[derive(Parser)]
#[command(name = "otsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Race replicas against one repository and check convergence
    Simulate {
        /// Number of replicas
        #[arg(short, long, default_value = "3")]
        replicas: usize,

        /// Number of edit rounds
        #[arg(short = 'n', long, default_value = "10")]
        rounds: usize,

        /// Accept branching pushes and merge on fetch
        #[arg(long)]
        relaxed: bool,

        /// Seed for the generated edits
        #[arg(short, long, default_value = "7")]
        seed: u64,

        /// Artificial repository latency in milliseconds
        #[arg(short, long, default_value = "1")]
        latency_ms: u64,

        /// Compact the history at the final head
        #[arg(short, long)]
        compact: bool,
    },

    /// Print the diamond scenario as Graphviz
    Graph {
        /// Merge the heads and print the result as well
        #[arg(short, long)]
        merge: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Simulate {
            replicas,
            rounds,
            relaxed,
            seed,
            latency_ms,
            compact,
        } => {
            let options = commands::simulate::Options {
                replicas,
                rounds,
                relaxed,
                seed,
                latency_ms,
                compact,
            };
            runtime.block_on(commands::simulate::run(options))?;
        }
        Commands::Graph { merge } => {
            runtime.block_on(commands::graph::run(merge))?;
        }
        Commands::Version => {
            println!("otsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
