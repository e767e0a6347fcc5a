//! Command-line interface for evalpool-rs.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Evaluate models through a pool of replicas.
#[derive(Parser, Debug)]
#[command(name = "evalpool-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that loads a model.
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Path to the model artifact (overrides the config file).
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Device to run on (cpu, gpu:0, cuda:1, or a numeric id; -1 is cpu).
    #[arg(short, long)]
    pub device: Option<String>,

    /// Engine used to load the model (dense, native).
    #[arg(short, long)]
    pub engine: Option<String>,

    /// Path to an optional YAML config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate one input file and print the outputs.
    Eval {
        #[command(flatten)]
        model: ModelArgs,

        /// Path to the input tensor map (JSON).
        #[arg(short, long)]
        input: PathBuf,

        /// Number of model replicas.
        #[arg(short, long)]
        pool_size: Option<usize>,

        /// Output format (json, pretty).
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Evaluate an input file repeatedly and report pool statistics.
    Run {
        #[command(flatten)]
        model: ModelArgs,

        /// Path to the input tensor map (JSON).
        #[arg(short, long)]
        input: PathBuf,

        /// Number of model replicas.
        #[arg(short, long)]
        pool_size: Option<usize>,

        /// Number of evaluations.
        #[arg(short = 'n', long)]
        iterations: Option<usize>,

        /// Worker threads feeding the pool.
        #[arg(short, long)]
        threads: Option<usize>,

        /// Output format (text, json).
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Load a model and print its input and output nodes.
    Info {
        #[command(flatten)]
        model: ModelArgs,
    },
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
