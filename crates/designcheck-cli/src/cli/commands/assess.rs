use std::sync::Arc;

use anyhow::Context;
use designcheck_core::{
    AssessmentError, Assessor, AssessorConfig, ErrorKind, RawSubmission, ScriptedClient,
    ScriptedReply,
};

use super::{load_rubric, read_input, read_metadata};
use crate::cli::args::AssessArgs;
use crate::exit_codes;

pub async fn run(args: AssessArgs, config: AssessorConfig) -> anyhow::Result<i32> {
    let assessor = match &args.offline_response {
        Some(path) => {
            let reply = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read offline response {}", path.display()))?;
            let client = Arc::new(ScriptedClient::repeating(ScriptedReply::text(reply)));
            Assessor::new(&config, Arc::new(load_rubric(&config)?), client)
                .context("invalid assessor configuration")?
        }
        None => Assessor::from_config(&config)?,
    };

    let mut raw = RawSubmission::new(read_input(&args.input)?);
    if let Some(metadata) = read_metadata(args.metadata.as_deref())? {
        raw = raw.with_metadata(metadata);
    }

    match assessor.assess(&raw).await {
        Ok(assessment) => {
            let out = if args.pretty {
                serde_json::to_string_pretty(&assessment)?
            } else {
                serde_json::to_string(&assessment)?
            };
            println!("{out}");
            Ok(exit_codes::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&e)?);
            Ok(exit_code(&e))
        }
    }
}

fn exit_code(err: &AssessmentError) -> i32 {
    match err.kind {
        ErrorKind::InvalidInput => exit_codes::INVALID_INPUT,
        ErrorKind::UpstreamUnavailable
        | ErrorKind::UpstreamRejected
        | ErrorKind::MalformedResponse
        | ErrorKind::InvalidScore => exit_codes::ASSESSMENT_FAILED,
    }
}
