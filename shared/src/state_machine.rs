//! Job lifecycle state machine
//!
//! Tracks the phase of the single job the device works on at a time and
//! defines which transitions are valid.

use std::fmt;

/// Phase of job processing on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    /// Nothing in flight
    Idle,
    /// Next-job request published, waiting for a description
    Fetching,
    /// Description received, checking it
    Validating,
    /// Task list running on the execution engine
    Executing,
    /// Publishing the terminal status
    Reporting,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Idle => "IDLE",
            JobPhase::Fetching => "FETCHING",
            JobPhase::Validating => "VALIDATING",
            JobPhase::Executing => "EXECUTING",
            JobPhase::Reporting => "REPORTING",
        };
        f.write_str(s)
    }
}

/// Events that can trigger phase transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Next-job request published
    NextJobRequested,
    /// A job description arrived for the given job
    DescriptionReceived { job_id: String },
    /// Description is not actionable (terminal status, stale, ...)
    DescriptionIgnored,
    /// Validation passed
    Accepted,
    /// Validation failed, the job will be rejected
    Rejected,
    /// All tasks finished running
    ExecutionFinished,
    /// Unexpected failure while validating or executing
    Failed,
    /// Terminal status published
    StatusReported,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and the phase changed (or stayed)
    Success(JobPhase),
    /// Transition was invalid from the current phase
    Invalid { from: JobPhase, event: JobEvent },
}

/// State machine for the job in flight
#[derive(Debug)]
pub struct JobStateMachine {
    phase: JobPhase,
    current_job: Option<String>,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateMachine {
    pub fn new() -> Self {
        Self {
            phase: JobPhase::Idle,
            current_job: None,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Id of the job currently being validated, executed or reported
    pub fn current_job(&self) -> Option<&str> {
        self.current_job.as_deref()
    }

    /// Whether a job is being processed end-to-end
    pub fn is_busy(&self) -> bool {
        matches!(
            self.phase,
            JobPhase::Validating | JobPhase::Executing | JobPhase::Reporting
        )
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: JobEvent) -> TransitionResult {
        let next = match self.next_phase(&event) {
            Some(phase) => phase,
            None => {
                return TransitionResult::Invalid {
                    from: self.phase,
                    event,
                }
            }
        };

        match &event {
            JobEvent::DescriptionReceived { job_id } => {
                self.current_job = Some(job_id.clone());
            }
            JobEvent::DescriptionIgnored | JobEvent::StatusReported => {
                self.current_job = None;
            }
            _ => {}
        }

        self.phase = next;
        TransitionResult::Success(next)
    }

    fn next_phase(&self, event: &JobEvent) -> Option<JobPhase> {
        use JobEvent::*;
        use JobPhase::*;

        match (self.phase, event) {
            (Idle | Fetching, NextJobRequested) => Some(Fetching),

            // Descriptions also arrive unsolicited through notify-next
            (Idle | Fetching, DescriptionReceived { .. }) => Some(Validating),

            (Validating, DescriptionIgnored) => Some(Idle),
            (Validating, Accepted) => Some(Executing),
            (Validating, Rejected) => Some(Reporting),
            (Validating | Executing, Failed) => Some(Reporting),

            (Executing, ExecutionFinished) => Some(Reporting),

            (Reporting, StatusReported) => Some(Idle),

            _ => None,
        }
    }
}
