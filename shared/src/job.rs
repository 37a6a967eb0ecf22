//! Job execution documents
//!
//! A job is a backend-queued, ordered list of commands. The device observes
//! it through job descriptions and drives its execution status.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::task::Command;
use crate::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
    TimedOut,
    Rejected,
    Removed,
}

impl JobStatus {
    /// Statuses for which the device should (continue to) run the job
    pub fn is_runnable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
            JobStatus::TimedOut => "TIMED_OUT",
            JobStatus::Rejected => "REJECTED",
            JobStatus::Removed => "REMOVED",
        };
        f.write_str(s)
    }
}

/// Decoded job document
///
/// Entries are kept as `Option` so that validation can tell a `null` task
/// apart from a missing list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub tasks: Option<Vec<Option<Command>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thing_name: Option<String>,
    /// Raw job document; decoded separately into [`JobPayload`]
    #[serde(default)]
    pub job_document: Option<serde_json::Value>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_number: Option<u64>,
}

/// Job description message, as delivered on `get/accepted` and `notify-next`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescription {
    #[serde(default)]
    pub execution: Option<JobExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl JobDescription {
    pub fn parse(payload: &[u8]) -> Result<Self, ModelError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Request for the next pending job execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeJobRequest {
    pub client_token: String,
}

/// Job execution status update
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobRequest {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_details: Option<BTreeMap<String, String>>,
    pub client_token: String,
}
