//! Load-test orchestration pipeline.
//!
//! A run pushes wrk2 settings to a deployed worker function, uploads the
//! request script, fans out asynchronous invocations, waits for every
//! worker to drop a result object and downloads the results.
//!
//! # Architecture
//!
//! - **Config**: validated run configuration and duration parsing
//! - **State**: execution identifier and the per-run state record
//! - **Stages**: one async function per step of a run
//! - **Poll**: bounded "poll until predicate" utility used by the completion wait
//! - **Progress**: stage event observers (log lines or a console spinner)
//! - **Orchestrator**: the [`Pipeline`] driver sequencing the stages
//!
//! # Pipeline Flow
//!
//! 1. **Resolve outputs**: find the bucket and function published by the stack
//! 2. **Configure workers**: overwrite the function environment
//! 3. **Upload script**: store the wrk2 script under `{exec_id}/{name}`
//! 4. **Invoke workers**: N sequential asynchronous invocations
//! 5. **Await completion**: poll `{exec_id}/result` until N objects exist
//! 6. **Collect results**: download each object under the output directory
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wrk2_fleet::pipeline::{Pipeline, TracingProgress};
//! use wrk2_fleet::remote::{aws::AwsControlPlane, ControlPlane};
//!
//! let backend = AwsControlPlane::connect(&config.identity, &config.region).await;
//! let pipeline = Pipeline::new(
//!     config,
//!     ControlPlane::from_shared(Arc::new(backend)),
//!     Arc::new(TracingProgress),
//! )?;
//!
//! let outcome = pipeline.run().await?;
//! println!("results in {}", outcome.output_dir.display());
//! ```

pub mod config;
pub mod orchestrator;
pub mod poll;
pub mod progress;
pub mod stages;
pub mod state;

pub use config::{parse_duration_secs, AwsIdentity, ConfigError, RunConfig, WorkerTuning};
pub use orchestrator::{Pipeline, RunOutcome};
pub use poll::{poll_until, PollOutcome, PollSchedule};
pub use progress::{ProgressSink, SpinnerProgress, Stage, TracingProgress};
pub use state::{ExecId, ResolvedOutputs, RunState};
