//! ragprobe CLI: evaluation harness for conversational RAG applications.
//!
//! Serves the HTTP gateway or runs a single pipeline and prints its result.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// ragprobe: grade a RAG chat application against generated golden data
#[derive(Parser, Debug)]
#[command(name = "ragprobe", version, about, long_about = None)]
pub struct Cli {
    /// Workspace directory (searched for ragprobe.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP gateway and job workers
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
    },
    /// Build a golden dataset and grade the chat endpoint against it
    Golden {
        /// Directory with source documents
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Question/answer pairs per document
        #[arg(long)]
        pairs: Option<usize>,
        /// Do not write the generated dataset to disk
        #[arg(long)]
        no_write: bool,
    },
    /// Check whether the retriever returns the chunk a query was written from
    Retrieval {
        /// Results requested per query
        #[arg(long)]
        top_k: Option<usize>,
        /// Number of sample chunks
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Simulate a persona-driven conversation and score every turn
    Satisfaction {
        /// Persona key (see `ragprobe personas`)
        #[arg(long)]
        persona: Option<String>,
        /// Goal key (see `ragprobe goals`)
        #[arg(long)]
        goal: Option<String>,
        /// Maximum number of turns
        #[arg(long)]
        turns: Option<i64>,
    },
    /// List built-in personas
    Personas,
    /// List built-in conversation goals
    Goals,
    /// Print the effective configuration as TOML
    Config,
}

fn log_filter(verbose: u8, quiet: bool) -> String {
    match verbose {
        0 if quiet => "error".to_string(),
        0 => std::env::var("EVAL_LOG_LEVEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.to_lowercase())
            .unwrap_or_else(|| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(log_filter(cli.verbose, cli.quiet)));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "ragprobe", "ragprobe")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ragprobe.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
