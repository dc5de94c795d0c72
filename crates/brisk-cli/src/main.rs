//! Brisk CLI
//!
//! Command-line interface for the Brisk native-compilation toolchain:
//! call-site rewriting of compiled module images and compilation-cache
//! maintenance.

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "brisk")]
#[command(about = "Brisk native-compilation toolchain", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite call sites in a compiled module image
    Rewrite {
        /// Module image to process (.brm)
        image: PathBuf,
        /// Folder containing referenced modules (repeatable)
        #[arg(short, long = "refs")]
        refs: Vec<PathBuf>,
        /// JSON file mapping encoded signatures to native entry addresses
        #[arg(long)]
        entry_points: Option<PathBuf>,
        /// The module is built for the interactive-host configuration
        #[arg(long)]
        interactive_host: bool,
        /// Output path (defaults to rewriting in place)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compilation-cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Mark the cache for deletion on the compiler's next cold start
    Purge {
        /// Cache root (defaults to the user cache directory)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Show the cache location and marker state
    Info {
        /// Cache root (defaults to the user cache directory)
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    // The environment diagnostics toggle takes precedence over -v
    let config = brisk_engine::EnvConfig::from_env();
    let default = if config.diagnostics {
        config.log_directive()
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Rewrite {
            image,
            refs,
            entry_points,
            interactive_host,
            output,
        } => commands::rewrite::run(image, refs, entry_points, interactive_host, output),
        Commands::Cache { command } => match command {
            CacheCommands::Purge { root } => commands::cache::purge(root),
            CacheCommands::Info { root } => commands::cache::info(root),
        },
    }
}
