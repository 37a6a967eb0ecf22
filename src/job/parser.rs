//! Job description parsing

use edge_shared::{JobDescription, JobPayload, JobStatus};
use tracing::{debug, warn};

/// A job as seen by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    /// `None` when the job document is absent or malformed
    pub payload: Option<JobPayload>,
}

/// Parse a raw job description message
///
/// Returns `None` when the message can't be decoded or names no job.
pub fn parse(payload: &[u8]) -> Option<Job> {
    match JobDescription::parse(payload) {
        Ok(description) => from_description(description),
        Err(e) => {
            warn!("Failed to parse job description: {}", e);
            None
        }
    }
}

pub fn from_description(description: JobDescription) -> Option<Job> {
    let Some(execution) = description.execution else {
        debug!("Job description carries no execution");
        return None;
    };

    let job_id = match execution.job_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            warn!("Job description without job id");
            return None;
        }
    };

    let payload = execution.job_document.and_then(|document| {
        serde_json::from_value::<JobPayload>(document)
            .map_err(|e| warn!(%job_id, "Malformed job document: {}", e))
            .ok()
    });

    Some(Job {
        job_id,
        status: execution.status,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_description() {
        let payload = json!({
            "timestamp": 1700000000,
            "execution": {
                "jobId": "job-1",
                "status": "QUEUED",
                "jobDocument": {"tasks": [
                    {"id": "a", "type": "module-action", "action": "LIST", "apiVersion": "1.0"}
                ]},
                "versionNumber": 1
            }
        });
        let job = parse(payload.to_string().as_bytes()).unwrap();

        assert_eq!(job.job_id, "job-1");
        assert_eq!(job.status, JobStatus::Queued);
        let tasks = job.payload.unwrap().tasks.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].as_ref().unwrap().id, "a");
    }

    #[test]
    fn test_missing_or_empty_job_id_is_dropped() {
        let no_id = json!({"execution": {"status": "QUEUED"}});
        let empty_id = json!({"execution": {"jobId": "", "status": "QUEUED"}});
        let no_execution = json!({"timestamp": 1});

        for payload in [no_id, empty_id, no_execution] {
            assert!(parse(payload.to_string().as_bytes()).is_none());
        }
        assert!(parse(b"{not json").is_none());
    }

    #[test]
    fn test_malformed_document_yields_no_payload() {
        let payload = json!({
            "execution": {"jobId": "job-2", "status": "IN_PROGRESS", "jobDocument": {"tasks": 5}}
        });
        let job = parse(payload.to_string().as_bytes()).unwrap();
        assert_eq!(job.payload, None);
    }
}
