//! RepoLens CLI: the main entry point.
//!
//! Commands:
//! - `ask`: Ask a question, optionally about a repository document
//! - `config`: Print the default configuration (or its path)

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "repolens",
    about = "RepoLens: ask questions about documents in Git repositories",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask(commands::ask::AskArgs),

    /// Print the default configuration
    Config {
        /// Print the config file location instead
        #[arg(long)]
        path: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    // Logs go to stderr so answers on stdout stay pipeable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Ask(args) => commands::ask::run(args).await?,
        Commands::Config { path } => commands::config_cmd::run(path)?,
    }

    Ok(())
}
