//! Job orchestrator
//!
//! One job is processed end-to-end at a time. Descriptions are parsed as
//! they arrive and the busy guard is taken only for one that names a job;
//! descriptions arriving while it is held are ignored, since finishing the
//! current job always requests the next one.

use super::parser::{self, Job};
use super::validator;
use crate::task::ExecutionEngine;
use crate::transport::{spawn_on_connect, Transport};
use anyhow::Result;
use bytes::Bytes;
use edge_shared::state_machine::JobPhase;
use edge_shared::state_machine::{JobEvent, JobStateMachine, TransitionResult};
use edge_shared::{DescribeJobRequest, JobStatus, UpdateJobRequest};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Jobs topics for a thing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTopics {
    base: String,
    pub next_get: String,
    pub get_accepted: String,
    pub notify_next: String,
    pub rejected: String,
}

impl JobTopics {
    pub fn new(thing_name: &str) -> Self {
        let base = format!("$aws/things/{}/jobs", thing_name);
        Self {
            next_get: format!("{}/$next/get", base),
            get_accepted: format!("{}/+/get/accepted", base),
            notify_next: format!("{}/notify-next", base),
            rejected: format!("{}/+/+/rejected", base),
            base,
        }
    }

    pub fn update(&self, job_id: &str) -> String {
        format!("{}/{}/update", self.base, job_id)
    }
}

pub struct JobOrchestrator {
    engine: Arc<ExecutionEngine>,
    transport: Arc<dyn Transport>,
    topics: JobTopics,
    client_token: String,
    busy: AtomicBool,
    machine: Mutex<JobStateMachine>,
    queue_tx: mpsc::UnboundedSender<Job>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

impl JobOrchestrator {
    pub fn new(engine: Arc<ExecutionEngine>, transport: Arc<dyn Transport>, thing_name: &str) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            transport,
            topics: JobTopics::new(thing_name),
            client_token: thing_name.to_string(),
            busy: AtomicBool::new(false),
            machine: Mutex::new(JobStateMachine::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        }
    }

    #[cfg(test)]
    pub fn topics(&self) -> &JobTopics {
        &self.topics
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn phase(&self) -> JobPhase {
        self.lock_machine().phase()
    }

    fn lock_machine(&self) -> MutexGuard<'_, JobStateMachine> {
        self.machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, event: JobEvent) {
        match self.lock_machine().process_event(event) {
            TransitionResult::Success(phase) => debug!(%phase, "Job phase"),
            TransitionResult::Invalid { from, event } => {
                warn!("Invalid job transition from {} on {:?}", from, event)
            }
        }
    }

    /// Subscribe to the job topics and spawn the worker and listener loops
    ///
    /// The next job is requested on every (re)connection.
    pub async fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        let queue_rx = self
            .queue_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut queue_rx) = queue_rx {
            let worker = self.clone();
            handles.push(tokio::spawn(async move {
                while let Some(job) = queue_rx.recv().await {
                    worker.process(job).await;
                }
                debug!("Job queue closed");
            }));
        }

        for filter in [&self.topics.get_accepted, &self.topics.notify_next] {
            let mut descriptions = self.transport.subscribe(filter).await?;
            let orchestrator = self.clone();
            handles.push(tokio::spawn(async move {
                while let Some(message) = descriptions.recv().await {
                    debug!(topic = %message.topic, "Job description received");
                    orchestrator.on_job_message(message.payload);
                }
            }));
        }

        let mut rejections = self.transport.subscribe(&self.topics.rejected).await?;
        handles.push(tokio::spawn(async move {
            while let Some(message) = rejections.recv().await {
                warn!(
                    topic = %message.topic,
                    "Job request rejected: {}",
                    String::from_utf8_lossy(&message.payload)
                );
            }
        }));

        let requester = self.clone();
        handles.push(spawn_on_connect(self.transport.as_ref(), move || {
            let orchestrator = requester.clone();
            async move { orchestrator.request_next_job().await }
        }));

        Ok(handles)
    }

    /// Accept a job description for processing unless a job is in flight
    ///
    /// Undecodable descriptions and empty `$next` responses are dropped
    /// without touching the busy guard.
    pub fn on_job_message(&self, payload: Bytes) {
        let Some(job) = parser::parse(&payload) else {
            return;
        };

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(job_id = %job.job_id, "Job in progress, ignoring notification");
            return;
        }

        if self.queue_tx.send(job).is_err() {
            error!("Job worker is not running");
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    /// Publish a request for the next pending job
    pub async fn request_next_job(&self) {
        let request = DescribeJobRequest {
            client_token: self.client_token.clone(),
        };
        match serde_json::to_vec(&request) {
            Ok(payload) => {
                debug!("Requesting next job");
                self.transition(JobEvent::NextJobRequested);
                if let Err(e) = self.transport.publish(&self.topics.next_get, Bytes::from(payload)).await {
                    error!("Failed to request next job: {}", e);
                }
            }
            Err(e) => error!("Failed to serialize next job request: {}", e),
        }
    }

    /// Handle one job, then release the guard and request the next one
    async fn process(&self, job: Job) {
        if AssertUnwindSafe(self.handle_job(&job))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(job_id = %job.job_id, "Unexpected failure while processing job");
            self.recover().await;
        }

        self.busy.store(false, Ordering::SeqCst);
        self.request_next_job().await;
    }

    async fn handle_job(&self, job: &Job) {
        self.transition(JobEvent::DescriptionReceived {
            job_id: job.job_id.clone(),
        });

        if !job.status.is_runnable() {
            info!(job_id = %job.job_id, status = %job.status, "Job not runnable, ignoring");
            self.transition(JobEvent::DescriptionIgnored);
            return;
        }

        let (status, details) = self.run(job).await;
        self.update_status(&job.job_id, status, details).await;
        self.transition(JobEvent::StatusReported);
        info!(job_id = %job.job_id, %status, "Job finished");
    }

    /// Validate and execute a job, returning its terminal status
    async fn run(&self, job: &Job) -> (JobStatus, Option<BTreeMap<String, String>>) {
        let engine = &self.engine;
        let tasks = match validator::validate(job, engine.supported_api_version(), |c| {
            engine.is_valid(c)
        }) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(job_id = %job.job_id, "Job rejected: {}", e);
                self.transition(JobEvent::Rejected);
                return (JobStatus::Rejected, Some(reason(e.to_string())));
            }
        };
        self.transition(JobEvent::Accepted);

        if job.status == JobStatus::Queued {
            self.update_status(&job.job_id, JobStatus::InProgress, None).await;
        }

        info!(job_id = %job.job_id, tasks = tasks.len(), "Executing job");
        match engine.execute_all_async(tasks).await {
            Ok(results) => {
                self.transition(JobEvent::ExecutionFinished);
                let failed: Vec<&str> = results
                    .iter()
                    .filter(|r| !r.is_succeeded())
                    .map(|r| r.task_id.as_str())
                    .collect();
                if failed.is_empty() {
                    (JobStatus::Succeeded, None)
                } else {
                    (JobStatus::Failed, Some(reason(format!("Tasks not succeeded: {}", failed.join(", ")))))
                }
            }
            Err(e) => {
                error!(job_id = %job.job_id, "Job execution failed: {}", e);
                self.transition(JobEvent::Failed);
                (JobStatus::Failed, Some(reason(e.to_string())))
            }
        }
    }

    /// Report FAILED for the job that was in flight when processing broke
    async fn recover(&self) {
        let (job_id, phase) = {
            let machine = self.lock_machine();
            (machine.current_job().map(String::from), machine.phase())
        };
        let Some(job_id) = job_id else {
            return;
        };

        if phase != JobPhase::Reporting {
            self.transition(JobEvent::Failed);
        }
        self.update_status(&job_id, JobStatus::Failed, Some(reason("Unexpected failure".into())))
            .await;
        self.transition(JobEvent::StatusReported);
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        status_details: Option<BTreeMap<String, String>>,
    ) {
        let request = UpdateJobRequest {
            status,
            status_details,
            client_token: self.client_token.clone(),
        };
        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%job_id, "Failed to serialize job update: {}", e);
                return;
            }
        };

        debug!(%job_id, %status, "Updating job status");
        if let Err(e) = self
            .transport
            .publish(&self.topics.update(job_id), Bytes::from(payload))
            .await
        {
            error!(%job_id, "Failed to update job status: {}", e);
        }
    }
}

fn reason(text: String) -> BTreeMap<String, String> {
    BTreeMap::from([("reason".to_string(), text)])
}
