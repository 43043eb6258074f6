//! Job data model and output naming.
//!
//! A job is one source file. Its identity is the source path; the
//! orchestrator owns every `Job` and hands out `JobSnapshot`s.

mod output_path;
mod types;

pub use output_path::output_path_for;
pub use types::{display_name, Job, JobSnapshot, JobStatus};
