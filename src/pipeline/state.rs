//! Run-scoped state threaded through the pipeline stages.

use std::fmt;

use chrono::{DateTime, Local, TimeZone};

use crate::error::PipelineError;

/// Time-derived identifier scoping every artifact of a run.
///
/// Formatted `YYYYMMDDHHMMSS` in local time, so identifiers sort
/// chronologically. Two runs started within the same second collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecId(String);

impl ExecId {
    /// Generates an identifier from the current local time.
    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    /// Generates an identifier from a given instant.
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(at.format("%Y%m%d%H%M%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key prefix workers write their result objects under.
    pub fn result_prefix(&self) -> String {
        format!("{}/result", self.0)
    }

    /// Object key the wrk2 script is uploaded to.
    pub fn script_key(&self, script_name: &str) -> String {
        format!("{}/{}", self.0, script_name)
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bucket and function identifiers resolved from the stack outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutputs {
    pub bucket: String,
    pub function: String,
}

/// Mutable record accumulated across the stages of one run.
///
/// Owned by the driver and passed by reference to each stage. Once
/// `terminal_error` is set it is never replaced.
#[derive(Debug)]
pub struct RunState {
    exec_id: ExecId,
    outputs: Option<ResolvedOutputs>,
    result_keys: Vec<String>,
    terminal_error: Option<PipelineError>,
}

impl RunState {
    pub fn new(exec_id: ExecId) -> Self {
        Self {
            exec_id,
            outputs: None,
            result_keys: Vec::new(),
            terminal_error: None,
        }
    }

    pub fn exec_id(&self) -> &ExecId {
        &self.exec_id
    }

    pub fn outputs(&self) -> Option<&ResolvedOutputs> {
        self.outputs.as_ref()
    }

    /// Records the resolved identifiers. The first resolution wins.
    pub fn set_outputs(&mut self, outputs: ResolvedOutputs) {
        if self.outputs.is_none() {
            self.outputs = Some(outputs);
        }
    }

    pub fn result_keys(&self) -> &[String] {
        &self.result_keys
    }

    pub fn set_result_keys(&mut self, keys: Vec<String>) {
        self.result_keys = keys;
    }

    pub fn is_failed(&self) -> bool {
        self.terminal_error.is_some()
    }

    /// Sets the terminal error unless one is already recorded.
    pub fn fail(&mut self, err: PipelineError) {
        if self.terminal_error.is_none() {
            self.terminal_error = Some(err);
        }
    }

    /// Consumes the state, yielding the terminal error if any.
    pub fn into_result(self) -> Result<(ExecId, Vec<String>), PipelineError> {
        match self.terminal_error {
            Some(err) => Err(err),
            None => Ok((self.exec_id, self.result_keys)),
        }
    }
}
