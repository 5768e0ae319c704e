use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::logging::LogFormat;

#[derive(Parser)]
#[command(
    name = "designcheck",
    version,
    about = "Rubric-based assessment of system-design submissions by an external LLM"
)]
pub struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, env = "DESIGNCHECK_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Rubric YAML file; overrides DESIGNCHECK_RUBRIC
    #[arg(long, global = true)]
    pub rubric: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP assessment service
    Serve(ServeArgs),
    /// Assess one submission and print the result as JSON
    Assess(AssessArgs),
    /// Print the active rubric, or the prompt it renders for a submission
    Rubric(RubricArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "DESIGNCHECK_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,

    /// Maximum assessments in flight; further requests wait
    #[arg(long, env = "DESIGNCHECK_MAX_CONCURRENT", default_value_t = 64)]
    pub max_concurrent: usize,

    /// Assessment requests allowed per client per minute (0 disables)
    #[arg(long, env = "DESIGNCHECK_RATE_LIMIT_PER_MINUTE", default_value_t = 30)]
    pub rate_limit_per_minute: u32,

    /// Identify clients by X-Forwarded-For / X-Real-IP (only behind a trusted proxy)
    #[arg(long, env = "DESIGNCHECK_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,
}

#[derive(Parser, Debug)]
pub struct AssessArgs {
    /// Submission text file ("-" for stdin)
    #[arg(default_value = "-")]
    pub input: PathBuf,

    /// JSON file with submission metadata (components, connections, problem, ...)
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// Use this file as the model's reply instead of calling the API
    #[arg(long)]
    pub offline_response: Option<PathBuf>,

    #[arg(long)]
    pub pretty: bool,
}

#[derive(Parser, Debug)]
pub struct RubricArgs {
    /// Render the prompt for this submission file instead of printing the rubric
    #[arg(long)]
    pub prompt: Option<PathBuf>,

    /// Metadata JSON used with --prompt
    #[arg(long, requires = "prompt")]
    pub metadata: Option<PathBuf>,
}
