//! Run configuration for a distributed wrk2 load test.
//!
//! This module provides the validated description of one run: the AWS
//! identity and region, the target stack, the fan-out width, the local
//! output directory and the wrk2 tuning every worker receives.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Errors that can occur while validating a run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed its constraint. Only the first violation is reported.
    #[error("error {field} is invalid")]
    Invalid { field: &'static str },

    /// A duration string did not match `<digits><s|m|h>`.
    #[error("invalid WRK_DURATION '{0}', expected e.g. 30s, 2m or 1h")]
    InvalidDuration(String),
}

/// How the control-plane client authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwsIdentity {
    /// An explicit access key pair.
    StaticKeys { access_key: String, secret: String },
    /// A named profile from the shared credentials file.
    Profile(String),
}

impl AwsIdentity {
    /// Picks the identity from optional CLI inputs.
    ///
    /// Exactly one of a complete key pair or a profile must be given.
    pub fn from_parts(
        access_key: Option<&str>,
        secret: Option<&str>,
        profile: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let non_empty = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);
        let access_key = non_empty(access_key);
        let secret = non_empty(secret);
        let profile = non_empty(profile);

        match (access_key, secret, profile) {
            (Some(access_key), Some(secret), None) => {
                Ok(AwsIdentity::StaticKeys { access_key, secret })
            }
            (None, None, Some(profile)) => Ok(AwsIdentity::Profile(profile)),
            _ => Err(ConfigError::Invalid {
                field: "aws_credentials",
            }),
        }
    }

    fn is_complete(&self) -> bool {
        match self {
            AwsIdentity::StaticKeys { access_key, secret } => {
                !access_key.is_empty() && !secret.is_empty()
            }
            AwsIdentity::Profile(name) => !name.is_empty(),
        }
    }
}

/// wrk2 options passed unchanged to every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTuning {
    /// wrk2 `--threads`.
    pub threads: u32,
    /// wrk2 `--connections`.
    pub connections: u32,
    /// wrk2 `--duration`, e.g. `30s`.
    pub duration: String,
    /// wrk2 `--rate`.
    pub requests_per_sec: u32,
    /// wrk2 `--timeout`, in seconds.
    pub timeout_secs: u32,
    /// Target URL.
    pub url: String,
    /// Local path of the wrk2 Lua script.
    pub script_path: PathBuf,
}

impl WorkerTuning {
    /// Resolves the configured duration to seconds.
    pub fn duration_secs(&self) -> Result<u64, ConfigError> {
        parse_duration_secs(&self.duration)
    }

    /// File name the script is uploaded and referenced under.
    pub fn script_name(&self) -> Option<String> {
        script_basename(&self.script_path)
    }
}

/// Configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Credentials selector.
    pub identity: AwsIdentity,
    /// Region the stack lives in.
    pub region: String,
    /// CloudFormation stack publishing the bucket and function outputs.
    pub stack_name: String,
    /// Number of workers to invoke.
    pub parallel: u32,
    /// Directory results are downloaded into.
    pub output_dir: PathBuf,
    /// wrk2 tuning.
    pub worker: WorkerTuning,
}

impl RunConfig {
    /// Creates a configuration; call [`RunConfig::validate`] before use.
    pub fn new(
        identity: AwsIdentity,
        region: impl Into<String>,
        stack_name: impl Into<String>,
        parallel: u32,
        output_dir: impl Into<PathBuf>,
        worker: WorkerTuning,
    ) -> Self {
        Self {
            identity,
            region: region.into(),
            stack_name: stack_name.into(),
            parallel,
            output_dir: output_dir.into(),
            worker,
        }
    }

    /// Validates every field in declaration order, failing on the first violation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field| Err(ConfigError::Invalid { field });

        if !self.identity.is_complete() {
            return invalid("aws_credentials");
        }
        if self.region.is_empty() {
            return invalid("aws_region");
        }
        if self.stack_name.is_empty() {
            return invalid("aws_stackname");
        }
        if self.parallel == 0 {
            return invalid("parallel");
        }
        if self.output_dir.as_os_str().is_empty() {
            return invalid("output_dir_path");
        }
        if self.worker.threads == 0 {
            return invalid("wrk2_thread");
        }
        if self.worker.connections == 0 {
            return invalid("wrk2_connection");
        }
        if !matches!(self.worker.duration_secs(), Ok(secs) if secs > 0) {
            return invalid("wrk2_duration");
        }
        if self.worker.requests_per_sec == 0 {
            return invalid("wrk2_request_per_sec");
        }
        if self.worker.timeout_secs == 0 {
            return invalid("wrk2_timeout");
        }
        if self.worker.url.is_empty() {
            return invalid("wrk2_url");
        }
        if self.worker.script_name().is_none() {
            return invalid("wrk2_script_path");
        }

        Ok(())
    }

    /// Builder method to set the fan-out width.
    pub fn with_parallel(mut self, parallel: u32) -> Self {
        self.parallel = parallel;
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method to set the wrk2 duration string.
    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.worker.duration = duration.into();
        self
    }

    /// Builder method to set the script path.
    pub fn with_script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker.script_path = path.into();
        self
    }

    /// Builder method to set the stack name.
    pub fn with_stack_name(mut self, name: impl Into<String>) -> Self {
        self.stack_name = name.into();
        self
    }
}

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)([smh])$").expect("duration pattern is valid"))
}

/// Parses a wrk2 duration such as `45s`, `2m` or `3h` into seconds.
///
/// # Errors
///
/// Returns `ConfigError::InvalidDuration` when the string does not match
/// `^\d+[smh]$` or the value overflows.
pub fn parse_duration_secs(raw: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(raw.to_string());

    let caps = duration_pattern().captures(raw).ok_or_else(invalid)?;
    let value: u64 = caps[1].parse().map_err(|_| invalid())?;
    let unit = match &caps[2] {
        "m" => 60,
        "h" => 60 * 60,
        _ => 1,
    };

    value.checked_mul(unit).ok_or_else(invalid)
}

fn script_basename(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
}
