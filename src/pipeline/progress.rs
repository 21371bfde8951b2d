//! Human-readable progress reporting for a run.
//!
//! The driver emits stage-started, stage-succeeded and stage-failed events
//! to a [`ProgressSink`]. Sinks are write-only: nothing they do feeds back
//! into control flow.

use std::fmt;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::PipelineError;

/// Stages of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ResolveOutputs,
    ConfigureWorkers,
    UploadScript,
    InvokeWorkers,
    AwaitCompletion,
    CollectResults,
}

impl Stage {
    /// Every stage in the order the driver runs them.
    pub const ALL: [Stage; 6] = [
        Stage::ResolveOutputs,
        Stage::ConfigureWorkers,
        Stage::UploadScript,
        Stage::InvokeWorkers,
        Stage::AwaitCompletion,
        Stage::CollectResults,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::ResolveOutputs => "getting stack props",
            Stage::ConfigureWorkers => "update Lambda environment variables",
            Stage::UploadScript => "upload wrk2 script file",
            Stage::InvokeWorkers => "invoked each Lambda",
            Stage::AwaitCompletion => "waiting for each Lambda to end",
            Stage::CollectResults => "download results",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Observer of stage transitions.
pub trait ProgressSink: Send + Sync {
    /// A stage is about to run. `detail` may be empty.
    fn stage_started(&self, stage: Stage, detail: &str);

    fn stage_succeeded(&self, stage: Stage);

    fn stage_failed(&self, stage: Stage, error: &PipelineError);
}

/// Reports progress as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn stage_started(&self, stage: Stage, detail: &str) {
        if detail.is_empty() {
            tracing::info!(stage = %stage, "Stage started");
        } else {
            tracing::info!(stage = %stage, detail, "Stage started");
        }
    }

    fn stage_succeeded(&self, stage: Stage) {
        tracing::info!(stage = %stage, "Stage succeeded");
    }

    fn stage_failed(&self, stage: Stage, error: &PipelineError) {
        tracing::error!(stage = %stage, error = %error, "Stage failed");
    }
}

/// Console spinner that leaves one line per finished stage.
pub struct SpinnerProgress {
    bar: ProgressBar,
}

impl Default for SpinnerProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinnerProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
        }
        Self { bar }
    }

    /// Removes the spinner, keeping the per-stage lines already printed.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for SpinnerProgress {
    fn stage_started(&self, stage: Stage, detail: &str) {
        let message = if detail.is_empty() {
            stage.label().to_string()
        } else {
            format!("{}, {}", stage.label(), detail)
        };
        self.bar.set_message(message);
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn stage_succeeded(&self, stage: Stage) {
        self.bar.println(format!("✔ {}", stage.label()));
    }

    fn stage_failed(&self, stage: Stage, error: &PipelineError) {
        self.bar.println(format!("✖ {}: {}", stage.label(), error));
        self.bar.disable_steady_tick();
    }
}
