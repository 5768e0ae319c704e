//! Process exit codes. Part of the CLI contract; scripts may branch on them.

pub const SUCCESS: i32 = 0;
pub const ASSESSMENT_FAILED: i32 = 1; // Model unavailable, rejected, or returned unusable output
pub const CONFIG_ERROR: i32 = 2; // Bad configuration, unreadable input, rubric errors
pub const INVALID_INPUT: i32 = 3; // Submission failed validation
