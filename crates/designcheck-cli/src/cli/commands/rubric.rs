use std::sync::Arc;

use designcheck_core::{AssessorConfig, PromptBuilder, RawSubmission, SubmissionValidator};

use super::{load_rubric, read_input, read_metadata};
use crate::cli::args::RubricArgs;
use crate::exit_codes;

pub fn run(args: RubricArgs, config: &AssessorConfig) -> anyhow::Result<i32> {
    let rubric = load_rubric(config)?;

    let Some(prompt_input) = args.prompt else {
        print!("{}", rubric.to_yaml()?);
        return Ok(exit_codes::SUCCESS);
    };

    let mut raw = RawSubmission::new(read_input(&prompt_input)?);
    if let Some(metadata) = read_metadata(args.metadata.as_deref())? {
        raw = raw.with_metadata(metadata);
    }

    let submission = match SubmissionValidator::from_config(config).validate(&raw) {
        Ok(submission) => submission,
        Err(e) => {
            eprintln!("invalid-input: {e}");
            return Ok(exit_codes::INVALID_INPUT);
        }
    };

    let prompt = PromptBuilder::new(Arc::new(rubric)).build(&submission);
    println!("# rubric {}\n", prompt.rubric_version);
    println!("## system\n{}\n", prompt.system);
    println!("## user\n{}", prompt.user);
    Ok(exit_codes::SUCCESS)
}
