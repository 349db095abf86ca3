//! Public output types for task runs.
//!
//! A run produces one `ExecutionRecord` per scope, in scope order, whatever
//! the outcome. `RunReport` carries the records plus a summary and is what
//! the CLI prints.

use crate::error::{Error, ErrorCode, Result, RunFailedDetails};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Outcome of one task on one scope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub task: String,
    /// `None` for the host-less scope of an unbound or empty environment.
    pub host: Option<String>,
    pub exit_status: i32,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub code: String,
    pub message: String,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub(crate) fn success(
        task: &str,
        host: Option<String>,
        output: String,
        result: Value,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task: task.to_string(),
            host,
            exit_status: 0,
            output,
            result: Some(result),
            error: None,
            started_at,
            duration_ms,
        }
    }

    /// Failure record. The exit status comes from the command that failed,
    /// or 1 when the error carries none.
    pub(crate) fn failure(
        task: &str,
        host: Option<String>,
        output: String,
        error: &Error,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        let exit_status = error.exit_code().filter(|c| *c != 0).unwrap_or(1);
        Self {
            task: task.to_string(),
            host,
            exit_status,
            output,
            result: None,
            error: Some(RecordError {
                code: error.code.as_str().to_string(),
                message: error.message.clone(),
            }),
            started_at,
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub task: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub dry_run: bool,
    pub records: Vec<ExecutionRecord>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn new(task: &str, environment: Option<String>, dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            task: task.to_string(),
            environment,
            dry_run,
            records: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn record(&mut self, record: ExecutionRecord) {
        self.summary.total += 1;
        if record.succeeded() {
            self.summary.succeeded += 1;
        } else {
            self.summary.failed += 1;
        }
        self.records.push(record);
    }

    pub fn succeeded(&self) -> bool {
        self.summary.failed == 0
    }

    pub fn failed_hosts(&self) -> Vec<Option<String>> {
        self.records
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.host.clone())
            .collect()
    }

    /// The report itself when every scope succeeded, else `RunFailed`.
    pub fn into_result(self) -> Result<Self> {
        if self.succeeded() {
            return Ok(self);
        }

        let failed_hosts = self.failed_hosts();
        let labels: Vec<String> = failed_hosts
            .iter()
            .map(|h| h.clone().unwrap_or_else(|| "local".to_string()))
            .collect();
        Err(Error::run_failed(RunFailedDetails {
            run_id: self.run_id.clone(),
            task: self.task.clone(),
            total: self.summary.total,
            failed: self.summary.failed,
            failed_hosts,
        })
        .with_hint(format!("Failed on: {}", labels.join(", "))))
    }
}

impl RecordError {
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}
