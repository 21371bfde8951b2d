//! wrk2-fleet: distributed wrk2 load testing on AWS Lambda.
//!
//! This library resolves a deployed worker stack, configures and fans out
//! Lambda workers running wrk2, waits for their results in S3 and
//! downloads them locally.

pub mod cli;
pub mod error;
pub mod pipeline;
pub mod remote;

pub use error::{PipelineError, RemoteError};
pub use pipeline::{Pipeline, RunConfig, RunOutcome};
