//! Pipeline driver.
//!
//! Runs the stages in their fixed order against one [`RunState`]. Once a
//! stage fails, every later stage is a no-op and the first error becomes
//! the run's outcome.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, info_span, Instrument};

use super::config::RunConfig;
use super::poll::PollSchedule;
use super::progress::{ProgressSink, Stage};
use super::stages;
use super::state::{ExecId, ResolvedOutputs, RunState};
use crate::error::PipelineError;
use crate::remote::ControlPlane;

/// Successful result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub exec_id: String,
    /// `{output_dir}/{exec_id}/result`.
    pub output_dir: PathBuf,
    /// Local files written, in download order.
    pub downloaded: Vec<PathBuf>,
}

/// One configured load-test run.
pub struct Pipeline {
    config: RunConfig,
    script_name: String,
    schedule: PollSchedule,
    plane: ControlPlane,
    progress: Arc<dyn ProgressSink>,
}

impl Pipeline {
    /// Validates `config` and prepares a run.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` for the first invalid field; no
    /// remote call is made in that case.
    pub fn new(
        config: RunConfig,
        plane: ControlPlane,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let duration_secs = config.worker.duration_secs()?;
        let script_name = config
            .worker
            .script_name()
            .ok_or(super::config::ConfigError::Invalid {
                field: "wrk2_script_path",
            })?;

        Ok(Self {
            config,
            script_name,
            schedule: PollSchedule::for_worker_duration(duration_secs),
            plane,
            progress,
        })
    }

    /// Overrides the completion-wait timing.
    pub fn with_poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn poll_schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    /// Runs every stage under a fresh execution identifier.
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        self.run_with_exec_id(ExecId::now()).await
    }

    /// Runs every stage under `exec_id`.
    pub async fn run_with_exec_id(&self, exec_id: ExecId) -> Result<RunOutcome, PipelineError> {
        let span = info_span!("run", exec_id = %exec_id, stack = %self.config.stack_name);
        self.drive(RunState::new(exec_id)).instrument(span).await
    }

    async fn drive(&self, mut state: RunState) -> Result<RunOutcome, PipelineError> {
        info!(parallel = self.config.parallel, "Starting run");
        let mut downloaded = Vec::new();

        for stage in Stage::ALL {
            if state.is_failed() {
                continue;
            }

            self.progress.stage_started(stage, &self.detail(stage, &state));
            match self.run_stage(stage, &mut state).await {
                Ok(written) => {
                    downloaded.extend(written);
                    self.progress.stage_succeeded(stage);
                }
                Err(err) => {
                    self.progress.stage_failed(stage, &err);
                    state.fail(err);
                }
            }
        }

        let (exec_id, _) = state.into_result()?;
        let output_dir = self
            .config
            .output_dir
            .join(exec_id.as_str())
            .join("result");
        info!(files = downloaded.len(), output_dir = %output_dir.display(), "Run finished");

        Ok(RunOutcome {
            exec_id: exec_id.to_string(),
            output_dir,
            downloaded,
        })
    }

    fn detail(&self, stage: Stage, state: &RunState) -> String {
        match (stage, state.outputs()) {
            (Stage::AwaitCompletion, Some(outputs)) => {
                format!("they will output results in {} bucket", outputs.bucket)
            }
            (Stage::InvokeWorkers, _) => format!("{} workers", self.config.parallel),
            _ => String::new(),
        }
    }

    fn resolved<'a>(&self, state: &'a RunState) -> Result<&'a ResolvedOutputs, PipelineError> {
        state.outputs().ok_or_else(|| PipelineError::MissingOutputs {
            stack: self.config.stack_name.clone(),
        })
    }

    /// Runs one stage, returning any files it wrote locally.
    async fn run_stage(
        &self,
        stage: Stage,
        state: &mut RunState,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        match stage {
            Stage::ResolveOutputs => {
                let outputs =
                    stages::resolve_outputs(self.plane.deployments.as_ref(), &self.config.stack_name)
                        .await?;
                state.set_outputs(outputs);
            }
            Stage::ConfigureWorkers => {
                let outputs = self.resolved(state)?;
                let vars = stages::worker_environment(
                    &self.config,
                    &outputs.bucket,
                    state.exec_id(),
                    &self.script_name,
                );
                stages::push_worker_config(self.plane.functions.as_ref(), &outputs.function, &vars)
                    .await?;
            }
            Stage::UploadScript => {
                let outputs = self.resolved(state)?;
                let key = state.exec_id().script_key(&self.script_name);
                stages::upload_script(
                    self.plane.store.as_ref(),
                    &outputs.bucket,
                    &key,
                    &self.config.worker.script_path,
                )
                .await?;
            }
            Stage::InvokeWorkers => {
                let outputs = self.resolved(state)?;
                stages::invoke_workers(
                    self.plane.functions.as_ref(),
                    &outputs.function,
                    self.config.parallel,
                )
                .await?;
            }
            Stage::AwaitCompletion => {
                let outputs = self.resolved(state)?;
                let keys = stages::await_results(
                    self.plane.store.as_ref(),
                    &outputs.bucket,
                    &state.exec_id().result_prefix(),
                    self.config.parallel,
                    &self.schedule,
                )
                .await?;
                state.set_result_keys(keys);
            }
            Stage::CollectResults => {
                let outputs = self.resolved(state)?;
                let result_dir = self
                    .config
                    .output_dir
                    .join(state.exec_id().as_str())
                    .join("result");
                return stages::collect_results(
                    self.plane.store.as_ref(),
                    &outputs.bucket,
                    state.result_keys(),
                    &self.config.output_dir,
                    &result_dir,
                )
                .await;
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::tests::sample_config;
    use crate::pipeline::progress::TracingProgress;
    use crate::remote::memory::InMemoryControlPlane;
    use std::time::Duration;

    fn plane() -> ControlPlane {
        ControlPlane::from_shared(Arc::new(InMemoryControlPlane::new()))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = sample_config().with_parallel(0);
        let err = Pipeline::new(config, plane(), Arc::new(TracingProgress)).err();
        assert!(matches!(
            err,
            Some(PipelineError::Config(
                crate::pipeline::config::ConfigError::Invalid { field: "parallel" }
            ))
        ));
    }

    #[test]
    fn test_schedule_follows_duration() {
        let pipeline = Pipeline::new(
            sample_config().with_duration("2m"),
            plane(),
            Arc::new(TracingProgress),
        )
        .unwrap();
        assert_eq!(
            pipeline.poll_schedule().initial_delay,
            Duration::from_millis(156_000)
        );
        assert_eq!(pipeline.poll_schedule().max_polls(), 11);
    }

    #[test]
    fn test_poll_schedule_override() {
        let schedule = PollSchedule::new(Duration::ZERO, Duration::from_millis(1), 2);
        let pipeline = Pipeline::new(sample_config(), plane(), Arc::new(TracingProgress))
            .unwrap()
            .with_poll_schedule(schedule);
        assert_eq!(pipeline.poll_schedule(), &schedule);
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = RunOutcome {
            exec_id: "20240101000000".to_string(),
            output_dir: PathBuf::from("out/20240101000000/result"),
            downloaded: vec![PathBuf::from("out/20240101000000/result/w1")],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["exec_id"], "20240101000000");
        assert_eq!(json["output_dir"], "out/20240101000000/result");
        assert_eq!(json["downloaded"][0], "out/20240101000000/result/w1");
    }
}
