use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use designcheck_core::{AssessorConfig, RubricTemplate, SubmissionMetadata};

use super::args::*;

pub mod assess;
pub mod rubric;
pub mod serve;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(cli.rubric)?;
    match cli.cmd {
        Command::Serve(args) => serve::run(args, config).await,
        Command::Assess(args) => assess::run(args, config).await,
        Command::Rubric(args) => rubric::run(args, &config),
    }
}

/// Environment configuration with the `--rubric` override applied.
fn load_config(rubric: Option<PathBuf>) -> anyhow::Result<AssessorConfig> {
    let mut config = AssessorConfig::from_env();
    if let Some(path) = rubric {
        config = config.with_rubric_path(path);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_rubric(config: &AssessorConfig) -> anyhow::Result<RubricTemplate> {
    RubricTemplate::load_or_builtin(config.rubric_path.as_deref()).context("failed to load rubric")
}

/// Raw bytes of a file, or of stdin for `-`. Encoding is checked by the validator.
fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read submission from stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("failed to read submission {}", path.display()))
}

fn read_metadata(path: Option<&Path>) -> anyhow::Result<Option<SubmissionMetadata>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read metadata {}", path.display()))?;
    let metadata = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse metadata {}", path.display()))?;
    Ok(Some(metadata))
}
