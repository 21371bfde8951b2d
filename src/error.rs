//! Error types for wrk2-fleet operations.
//!
//! Defines the error taxonomy shared across the crate:
//! - Control-plane and object-store call failures
//! - Pipeline stage failures, one variant per failure class

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::config::ConfigError;

/// Errors returned by a remote control-plane or object-store call.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{operation} failed: {message}")]
    Call {
        operation: &'static str,
        message: String,
    },

    #[error("reading body of '{key}' failed: {message}")]
    Body { key: String, message: String },
}

impl RemoteError {
    /// Builds a call failure from an already rendered error message.
    pub fn call(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Call {
            operation,
            message: message.into(),
        }
    }
}

/// Errors that terminate a run. Exactly one of these survives to the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("error describing stack '{stack}': {source}")]
    StackQuery {
        stack: String,
        #[source]
        source: RemoteError,
    },

    #[error("error no AWS stack named '{0}'")]
    StackNotFound(String),

    #[error("error BucketName or LambdaArn does not exist in stack '{stack}'")]
    MissingOutputs { stack: String },

    #[error("error updating environment of function {function}: {source}")]
    ConfigurePush {
        function: String,
        #[source]
        source: RemoteError,
    },

    #[error("error reading script file {path}: {source}")]
    ScriptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error uploading script to {bucket}/{key}: {source}")]
    ScriptUpload {
        bucket: String,
        key: String,
        #[source]
        source: RemoteError,
    },

    #[error("{index}/{total} invocation of {function} failed: {source}")]
    InvokeFailed {
        function: String,
        index: u32,
        total: u32,
        #[source]
        source: RemoteError,
    },

    #[error("{index}/{total} invocation of {function} was not accepted (status code {status_code})")]
    InvokeRejected {
        function: String,
        index: u32,
        total: u32,
        status_code: i32,
    },

    #[error("error listing results under {bucket}/{prefix}: {source}")]
    ResultListing {
        bucket: String,
        prefix: String,
        #[source]
        source: RemoteError,
    },

    #[error(
        "error could not observe completion of workers: found {found}/{expected} results \
         in {bucket}/{prefix} after {polls} polls, workers may still be running"
    )]
    CompletionTimeout {
        bucket: String,
        prefix: String,
        found: usize,
        expected: u32,
        polls: u32,
    },

    #[error("error create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{index}/{total}: download error key={key}, download from {bucket} manually, or retry: {source}")]
    Download {
        index: usize,
        total: usize,
        key: String,
        bucket: String,
        #[source]
        source: RemoteError,
    },

    #[error("{index}/{total}: write error key={key} path={path}, download from {bucket} manually, or retry: {source}")]
    WriteResult {
        index: usize,
        total: usize,
        key: String,
        bucket: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// True when the run gave up waiting for results rather than failing a call.
    pub fn is_completion_timeout(&self) -> bool {
        matches!(self, PipelineError::CompletionTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::call("Invoke", "throttled");
        assert_eq!(err.to_string(), "Invoke failed: throttled");
    }

    #[test]
    fn test_body_error_display() {
        let err = RemoteError::Body {
            key: "20240101120000/result/worker-001.txt".to_string(),
            message: "connection reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "reading body of '20240101120000/result/worker-001.txt' failed: connection reset"
        );
    }

    #[test]
    fn test_download_error_names_key_and_bucket() {
        let err = PipelineError::Download {
            index: 2,
            total: 3,
            key: "20240101120000/result-1".to_string(),
            bucket: "work-bucket".to_string(),
            source: RemoteError::call("GetObject", "NoSuchKey"),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2/3: "));
        assert!(msg.contains("key=20240101120000/result-1"));
        assert!(msg.contains("download from work-bucket manually, or retry"));
    }

    #[test]
    fn test_completion_timeout_is_distinguishable() {
        let timeout = PipelineError::CompletionTimeout {
            bucket: "b".to_string(),
            prefix: "p".to_string(),
            found: 1,
            expected: 2,
            polls: 11,
        };
        assert!(timeout.is_completion_timeout());
        assert!(timeout.to_string().contains("may still be running"));

        let other = PipelineError::StackNotFound("stack".to_string());
        assert!(!other.is_completion_timeout());
    }
}
