//! The individual operations a run is made of.
//!
//! Each stage is a free function over the capability it needs so it can be
//! exercised on its own; [`super::orchestrator::Pipeline`] sequences them
//! and owns the short-circuit discipline.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::config::RunConfig;
use super::poll::{poll_until, PollOutcome, PollSchedule};
use super::state::{ExecId, ResolvedOutputs};
use crate::error::{PipelineError, RemoteError};
use crate::remote::{list_all_keys, Deployment, DeploymentCatalog, FunctionControl, ObjectStore};

/// Stack output carrying the shared bucket name.
pub const STACK_OUTPUT_BUCKET: &str = "BucketName";
/// Stack output carrying the worker function identifier.
pub const STACK_OUTPUT_FUNCTION: &str = "LambdaArn";

/// Picks the most recently updated deployment and extracts its outputs.
///
/// Deployments without an update time sort after every dated one; ties
/// keep their listing order.
pub fn select_outputs(
    stack: &str,
    mut deployments: Vec<Deployment>,
) -> Result<ResolvedOutputs, PipelineError> {
    deployments.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
    let latest = deployments
        .first()
        .ok_or_else(|| PipelineError::StackNotFound(stack.to_string()))?;

    let bucket = latest.output(STACK_OUTPUT_BUCKET).filter(|v| !v.is_empty());
    let function = latest.output(STACK_OUTPUT_FUNCTION).filter(|v| !v.is_empty());
    match (bucket, function) {
        (Some(bucket), Some(function)) => Ok(ResolvedOutputs {
            bucket: bucket.to_string(),
            function: function.to_string(),
        }),
        _ => Err(PipelineError::MissingOutputs {
            stack: stack.to_string(),
        }),
    }
}

/// Looks up `stack` and resolves its bucket and function identifiers.
pub async fn resolve_outputs(
    catalog: &dyn DeploymentCatalog,
    stack: &str,
) -> Result<ResolvedOutputs, PipelineError> {
    let deployments = catalog
        .describe_deployments(stack)
        .await
        .map_err(|source| PipelineError::StackQuery {
            stack: stack.to_string(),
            source,
        })?;
    debug!(stack, candidates = deployments.len(), "Described stacks");

    let outputs = select_outputs(stack, deployments)?;
    info!(
        stack,
        bucket = %outputs.bucket,
        function = %outputs.function,
        "Resolved stack outputs"
    );
    Ok(outputs)
}

/// Builds the complete environment every worker runs with.
pub fn worker_environment(
    config: &RunConfig,
    bucket: &str,
    exec_id: &ExecId,
    script_name: &str,
) -> BTreeMap<String, String> {
    let worker = &config.worker;
    [
        ("PARALLEL_COUNT", config.parallel.to_string()),
        ("S3_BUCKET", bucket.to_string()),
        ("S3_RESULT_BASE_KEY", exec_id.result_prefix()),
        ("WRK_THREAD", worker.threads.to_string()),
        ("WRK_CONNECTION", worker.connections.to_string()),
        ("WRK_DURATION", worker.duration.clone()),
        ("WRK_REQUEST_PER_SEC", worker.requests_per_sec.to_string()),
        ("WRK_SCRIPT_NAME", script_name.to_string()),
        ("WRK_TIMEOUT_SEC", worker.timeout_secs.to_string()),
        ("WRK_URL", worker.url.clone()),
        ("EXEC_ID", exec_id.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Overwrites the function's environment with `vars`.
pub async fn push_worker_config(
    functions: &dyn FunctionControl,
    function: &str,
    vars: &BTreeMap<String, String>,
) -> Result<(), PipelineError> {
    functions
        .replace_environment(function, vars)
        .await
        .map_err(|source| PipelineError::ConfigurePush {
            function: function.to_string(),
            source,
        })?;
    debug!(function, variables = vars.len(), "Replaced function environment");
    Ok(())
}

/// Reads the local script and stores it under `key`.
pub async fn upload_script(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    path: &Path,
) -> Result<(), PipelineError> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|source| PipelineError::ScriptRead {
            path: path.to_path_buf(),
            source,
        })?;
    let size = body.len();

    store
        .put_object(bucket, key, body)
        .await
        .map_err(|source| PipelineError::ScriptUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        })?;
    debug!(bucket, key, bytes = size, "Uploaded script");
    Ok(())
}

/// Invokes `function` asynchronously `count` times, one request at a time.
///
/// Stops at the first call that errors or is not accepted. Invocations
/// already accepted keep running.
pub async fn invoke_workers(
    functions: &dyn FunctionControl,
    function: &str,
    count: u32,
) -> Result<u32, PipelineError> {
    for index in 1..=count {
        let ack = match functions.invoke_async(function).await {
            Ok(ack) => ack,
            Err(source) => {
                error!(index, total = count, error = %source, "Invocation failed");
                return Err(PipelineError::InvokeFailed {
                    function: function.to_string(),
                    index,
                    total: count,
                    source,
                });
            }
        };

        if !ack.is_accepted() {
            error!(
                index,
                total = count,
                status_code = ack.status_code,
                "Invocation not accepted"
            );
            return Err(PipelineError::InvokeRejected {
                function: function.to_string(),
                index,
                total: count,
                status_code: ack.status_code,
            });
        }
        debug!(index, total = count, "Invoked worker");
    }
    Ok(count)
}

/// Polls `prefix` until at least `expected` result keys exist.
///
/// Only the key count is checked; keys are not matched to workers.
pub async fn await_results(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    expected: u32,
    schedule: &PollSchedule,
) -> Result<Vec<String>, PipelineError> {
    let threshold = expected as usize;
    let outcome = poll_until(
        schedule,
        move || async move {
            let keys = list_all_keys(store, bucket, prefix).await?;
            debug!(found = keys.len(), expected, "Listed result objects");
            Ok::<_, RemoteError>(keys)
        },
        |keys: &Vec<String>| keys.len() >= threshold,
    )
    .await
    .map_err(|source| PipelineError::ResultListing {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
        source,
    })?;

    match outcome {
        PollOutcome::Ready { value, polls } => {
            info!(found = value.len(), polls, "All workers reported results");
            Ok(value)
        }
        PollOutcome::Exhausted { last, polls } => {
            warn!(found = last.len(), expected, polls, "Gave up waiting for workers");
            Err(PipelineError::CompletionTimeout {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                found: last.len(),
                expected,
                polls,
            })
        }
    }
}

/// Maps an object key onto a path under `root`, mirroring its segments.
///
/// Returns `None` for keys that would escape `root`.
pub fn local_path_for_key(root: &Path, key: &str) -> Option<PathBuf> {
    let relative = Path::new(key);
    let mut path = root.to_path_buf();
    let mut segments = 0;
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                path.push(segment);
                segments += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (segments > 0).then_some(path)
}

/// Downloads every key in order into `output_dir`, stopping at the first failure.
///
/// `result_dir` is created up front; each object lands at
/// `output_dir/<key>`.
pub async fn collect_results(
    store: &dyn ObjectStore,
    bucket: &str,
    keys: &[String],
    output_dir: &Path,
    result_dir: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    tokio::fs::create_dir_all(result_dir)
        .await
        .map_err(|source| PipelineError::OutputDir {
            path: result_dir.to_path_buf(),
            source,
        })?;

    let total = keys.len();
    let mut written = Vec::with_capacity(total);
    for (i, key) in keys.iter().enumerate() {
        let index = i + 1;
        let write_error = |path: PathBuf, source: std::io::Error| PipelineError::WriteResult {
            index,
            total,
            key: key.clone(),
            bucket: bucket.to_string(),
            path,
            source,
        };

        let body = store
            .get_object(bucket, key)
            .await
            .map_err(|source| PipelineError::Download {
                index,
                total,
                key: key.clone(),
                bucket: bucket.to_string(),
                source,
            })?;

        let path = local_path_for_key(output_dir, key).ok_or_else(|| {
            write_error(
                output_dir.join(key),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "key does not map to a path inside the output directory",
                ),
            )
        })?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| write_error(parent.to_path_buf(), source))?;
        }
        tokio::fs::write(&path, &body)
            .await
            .map_err(|source| write_error(path.clone(), source))?;

        debug!(index, total, key = %key, path = %path.display(), "Downloaded result");
        written.push(path);
    }
    Ok(written)
}
