//! Harbor CLI - run and check a local LLM inference deployment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// Harbor - a reverse proxy and frontend for a local llama.cpp server
#[derive(Parser)]
#[command(name = "harbor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the model if needed, start the inference server and proxy
    Serve,

    /// Download the model file (no-op when it already exists)
    Pull {
        /// Hugging Face repository id
        #[arg(long)]
        repo: Option<String>,
        /// File within the repository
        #[arg(long)]
        file: Option<String>,
        /// Download from this URL instead of the model hub
        #[arg(long, conflicts_with_all = ["repo", "file"])]
        url: Option<String>,
        /// Destination path (default: the configured model path)
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Expected SHA256 of the file
        #[arg(long)]
        sha256: Option<String>,
    },

    /// Smoke-test a running deployment
    Smoke {
        /// Base URL of the deployment
        #[arg(default_value = "http://localhost:8000")]
        base_url: String,
        /// Bearer token (default: the configured API key)
        #[arg(long)]
        api_key: Option<String>,
        /// Seconds to wait for the health endpoint
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },

    /// Show the effective configuration
    Info,
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| miette::miette!("Failed to start async runtime: {}", e))?;

    match cli.command {
        Commands::Serve => runtime.block_on(commands::serve::run()),
        Commands::Pull {
            repo,
            file,
            url,
            dest,
            sha256,
        } => runtime.block_on(commands::pull::run(commands::pull::PullArgs {
            repo,
            file,
            url,
            dest,
            sha256,
        })),
        Commands::Smoke {
            base_url,
            api_key,
            wait_secs,
        } => runtime.block_on(commands::smoke::run(&base_url, api_key, wait_secs)),
        Commands::Info => commands::info::run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_smoke_defaults() {
        let cli = Cli::try_parse_from(["harbor", "smoke"]).unwrap();
        match cli.command {
            Commands::Smoke {
                base_url,
                api_key,
                wait_secs,
            } => {
                assert_eq!(base_url, "http://localhost:8000");
                assert!(api_key.is_none());
                assert_eq!(wait_secs, 30);
            }
            _ => panic!("expected smoke"),
        }
    }

    #[test]
    fn test_pull_url_conflicts_with_repo() {
        assert!(Cli::try_parse_from(["harbor", "pull", "--url", "http://x/m.gguf", "--repo", "a/b"]).is_err());
    }
}
