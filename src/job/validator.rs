//! Structural and version checks applied before a job runs

use super::parser::Job;
use edge_shared::version::{self, VersionError};
use edge_shared::Command;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Job has no task list")]
    MissingTasks,

    #[error("Job task list is empty")]
    EmptyTasks,

    #[error("Task at position {0} is null")]
    NullTask(usize),

    #[error("Task {task_id}: {source}")]
    Version {
        task_id: String,
        #[source]
        source: VersionError,
    },

    #[error("Task {0} is not valid")]
    InvalidTask(String),
}

/// Validate a job and return its tasks in order
pub fn validate(
    job: &Job,
    supported_version: &str,
    is_valid: impl Fn(&Command) -> bool,
) -> Result<Vec<Command>, ValidationError> {
    let tasks = job
        .payload
        .as_ref()
        .and_then(|p| p.tasks.as_ref())
        .ok_or(ValidationError::MissingTasks)?;

    if tasks.is_empty() {
        return Err(ValidationError::EmptyTasks);
    }

    let mut commands = Vec::with_capacity(tasks.len());
    for (index, task) in tasks.iter().enumerate() {
        let command = task.as_ref().ok_or(ValidationError::NullTask(index))?;

        version::check(command, supported_version).map_err(|source| ValidationError::Version {
            task_id: command.id.clone(),
            source,
        })?;

        if !is_valid(command) {
            return Err(ValidationError::InvalidTask(command.id.clone()));
        }
        commands.push(command.clone());
    }

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::list_command;
    use edge_shared::{JobPayload, JobStatus};

    fn job(tasks: Option<Vec<Option<Command>>>) -> Job {
        Job {
            job_id: "job-1".into(),
            status: JobStatus::Queued,
            payload: Some(JobPayload { tasks }),
        }
    }

    fn versioned(id: &str, version: &str) -> Option<Command> {
        Some(list_command(id).with_api_version(version))
    }

    #[test]
    fn test_valid_job_returns_tasks_in_order() {
        let job = job(Some(vec![versioned("a", "1.0"), versioned("b", "1.9")]));
        let tasks = validate(&job, "1.3", |_| true).unwrap();
        assert_eq!(tasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_structural_failures() {
        assert_eq!(validate(&job(None), "1.0", |_| true), Err(ValidationError::MissingTasks));
        assert_eq!(validate(&job(Some(vec![])), "1.0", |_| true), Err(ValidationError::EmptyTasks));
        assert_eq!(
            validate(&job(Some(vec![versioned("a", "1.0"), None])), "1.0", |_| true),
            Err(ValidationError::NullTask(1))
        );

        let no_payload = Job {
            payload: None,
            ..job(None)
        };
        assert_eq!(validate(&no_payload, "1.0", |_| true), Err(ValidationError::MissingTasks));
    }

    #[test]
    fn test_every_task_is_version_checked() {
        let job = job(Some(vec![versioned("a", "1.0"), versioned("b", "2.0")]));
        let err = validate(&job, "1.3", |_| true).unwrap_err();
        assert!(matches!(err, ValidationError::Version { ref task_id, .. } if task_id == "b"));

        let unversioned = job_with_unversioned();
        assert!(matches!(
            validate(&unversioned, "1.3", |_| true),
            Err(ValidationError::Version { source: VersionError::Missing { .. }, .. })
        ));
    }

    fn job_with_unversioned() -> Job {
        job(Some(vec![Some(list_command("a"))]))
    }

    #[test]
    fn test_handler_validity_is_checked() {
        let job = job(Some(vec![versioned("a", "1.0"), versioned("b", "1.0")]));
        assert_eq!(
            validate(&job, "1.0", |c| c.id != "b"),
            Err(ValidationError::InvalidTask("b".into()))
        );
    }
}
