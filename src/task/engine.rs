//! Task execution engine
//!
//! Commands are funnelled through one worker so no two commands ever run
//! concurrently on the same engine. Every submission yields a
//! [`CommandResult`]: missing handlers, handler errors and panics all become
//! terminal results instead of escaping to the caller.

use super::handlers::TaskHandler;
use chrono::Utc;
use edge_shared::{Command, CommandResult, ResultDetail, TaskStatus, TaskType};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Execution engine stopped")]
    Stopped,
}

type Registry = HashMap<TaskType, Arc<dyn TaskHandler>>;

enum Submission {
    Single(Command, oneshot::Sender<CommandResult>),
    Batch(Vec<Command>, oneshot::Sender<Vec<CommandResult>>),
}

/// Awaitable result of an asynchronous submission
#[must_use = "results are only observable by awaiting the handle"]
pub struct ExecutionHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for ExecutionHandle<T> {
    type Output = Result<T, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| EngineError::Stopped))
    }
}

/// Dispatches commands to registered handlers on a single worker
pub struct ExecutionEngine {
    handlers: Arc<Registry>,
    queue_tx: mpsc::UnboundedSender<Submission>,
    supported_api_version: String,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionEngine {
    /// Create an engine and start its worker
    pub fn new(
        handlers: Vec<Arc<dyn TaskHandler>>,
        supported_api_version: impl Into<String>,
    ) -> Self {
        let mut registry = Registry::new();
        for handler in handlers {
            let task_type = handler.task_type();
            if registry.insert(task_type, handler).is_some() {
                warn!("Replacing handler registered for {}", task_type);
            }
        }
        let handlers = Arc::new(registry);

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker_loop(handlers.clone(), queue_rx));

        Self {
            handlers,
            queue_tx,
            supported_api_version: supported_api_version.into(),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Api version commands are checked against
    pub fn supported_api_version(&self) -> &str {
        &self.supported_api_version
    }

    /// Whether a handler exists and accepts the command
    pub fn is_valid(&self, command: &Command) -> bool {
        match self.handlers.get(&command.task_type()) {
            Some(handler) => handler.is_valid(command),
            None => {
                warn!(task_id = %command.id, "No handler for task type {}", command.task_type());
                false
            }
        }
    }

    /// Queue a command and return a handle to its result
    pub fn execute_async(&self, command: Command) -> ExecutionHandle<CommandResult> {
        let (tx, rx) = oneshot::channel();
        if self.queue_tx.send(Submission::Single(command, tx)).is_err() {
            error!("Execution engine is not running");
        }
        ExecutionHandle { rx }
    }

    /// Queue a list of commands to run strictly in order
    ///
    /// Every command runs regardless of earlier failures. Results keep input order.
    pub fn execute_all_async(&self, commands: Vec<Command>) -> ExecutionHandle<Vec<CommandResult>> {
        let (tx, rx) = oneshot::channel();
        if self.queue_tx.send(Submission::Batch(commands, tx)).is_err() {
            error!("Execution engine is not running");
        }
        ExecutionHandle { rx }
    }

    /// Execute a command and wait for its result
    pub async fn execute(&self, command: Command) -> CommandResult {
        let id = command.id.clone();
        match self.execute_async(command).await {
            Ok(result) => result,
            Err(e) => CommandResult::basic(
                &id,
                TaskStatus::Failed,
                format!("Unexpected error during execution of task {}: {}", id, e),
            ),
        }
    }

    /// Stop the worker; queued commands are dropped
    pub fn shutdown(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            worker.abort();
            info!("Execution engine stopped");
        }
    }
}

async fn worker_loop(handlers: Arc<Registry>, mut queue_rx: mpsc::UnboundedReceiver<Submission>) {
    while let Some(submission) = queue_rx.recv().await {
        match submission {
            Submission::Single(command, reply) => {
                let result = run_one(&handlers, command).await;
                let _ = reply.send(result);
            }
            Submission::Batch(commands, reply) => {
                let mut results = Vec::with_capacity(commands.len());
                for command in commands {
                    results.push(run_one(&handlers, command).await);
                }
                let _ = reply.send(results);
            }
        }
    }
    debug!("Execution queue closed");
}

async fn run_one(handlers: &Registry, command: Command) -> CommandResult {
    let started = Utc::now();
    let task_type = command.task_type();
    debug!(task_id = %command.id, %task_type, "Executing task");

    let mut result = match handlers.get(&task_type) {
        None => {
            warn!(task_id = %command.id, "Unsupported task type: {}", task_type);
            CommandResult::basic(
                &command.id,
                TaskStatus::Rejected,
                format!("Unsupported task type: {}", task_type),
            )
        }
        Some(handler) => match AssertUnwindSafe(handler.execute(&command))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => unexpected(&command.id, &e.to_string()),
            Err(panic) => unexpected(&command.id, &panic_message(panic.as_ref())),
        },
    };

    if !result.status.is_terminal() {
        warn!(task_id = %command.id, "Handler returned non-terminal status {}", result.status);
        result.status = TaskStatus::Failed;
        result
            .message
            .get_or_insert_with(|| "Task finished without a terminal status".to_string());
    }

    result.task_id = command.id;
    result.started = Some(started);
    result.finished = Some(Utc::now());

    info!(task_id = %result.task_id, %task_type, status = %result.status, "Task finished");
    result
}

fn unexpected(id: &str, cause: &str) -> CommandResult {
    error!(task_id = %id, "Unexpected error during execution: {}", cause);
    CommandResult::new(id, TaskStatus::Failed, ResultDetail::Basic).with_message(format!(
        "Unexpected error during execution of task {}: {}",
        id, cause
    ))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{list_command, launch_command, ScriptedHandler};
    use anyhow::anyhow;

    fn engine_with(handler: ScriptedHandler) -> ExecutionEngine {
        ExecutionEngine::new(vec![Arc::new(handler)], "1.0")
    }

    #[tokio::test]
    async fn test_unregistered_type_is_rejected() {
        let engine = engine_with(ScriptedHandler::succeeding());

        let result = engine.execute(launch_command("l1")).await;

        assert_eq!(result.status, TaskStatus::Rejected);
        assert_eq!(result.message.as_deref(), Some("Unsupported task type: launch"));
        assert_eq!(result.task_id, "l1");
        assert!(result.started.is_some() && result.finished.is_some());
        assert!(!engine.is_valid(&launch_command("l1")));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed() {
        let engine = engine_with(ScriptedHandler::with(|_| Err(anyhow!("boom"))));

        let result = engine.execute(list_command("t1")).await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(
            result.message.as_deref(),
            Some("Unexpected error during execution of task t1: boom")
        );
        assert!(result.started.is_some() && result.finished.is_some());
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failed() {
        let engine = engine_with(ScriptedHandler::with(|_| panic!("kaboom")));

        let result = engine.execute(list_command("t1")).await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.message.unwrap().contains("kaboom"));

        // The worker survives the panic
        let next = engine.execute(list_command("t2")).await;
        assert_eq!(next.task_id, "t2");
    }

    #[tokio::test]
    async fn test_in_progress_is_never_returned() {
        let engine = engine_with(ScriptedHandler::with(|command| {
            Ok(CommandResult::new(&command.id, TaskStatus::InProgress, ResultDetail::Basic))
        }));

        let result = engine.execute(list_command("t1")).await;
        assert_eq!(result.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_batch_runs_all_in_order_without_short_circuit() {
        let handler = ScriptedHandler::with(|command| {
            if command.id == "t2" {
                Err(anyhow!("second fails"))
            } else {
                Ok(CommandResult::succeeded(&command.id, ResultDetail::Basic))
            }
        });
        let calls = handler.calls();
        let engine = engine_with(handler);

        let results = engine
            .execute_all_async(vec![list_command("t1"), list_command("t2"), list_command("t3")])
            .await
            .unwrap();

        let ids: Vec<_> = results.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        assert_eq!(results[1].status, TaskStatus::Failed);
        assert_eq!(results[2].status, TaskStatus::Succeeded);
        assert_eq!(calls.lock().unwrap().clone(), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_submissions_execute_in_order_one_at_a_time() {
        let handler = ScriptedHandler::succeeding().with_delay(std::time::Duration::from_millis(5));
        let calls = handler.calls();
        let peak = handler.peak_concurrency();
        let engine = engine_with(handler);

        let first = engine.execute_async(list_command("a"));
        let second = engine.execute_async(list_command("b"));
        let third = engine.execute_async(list_command("c"));
        let (a, b, c) = tokio::join!(first, second, third);

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(calls.lock().unwrap().clone(), vec!["a", "b", "c"]);
        assert_eq!(peak.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_handles() {
        let engine = engine_with(ScriptedHandler::succeeding());
        engine.shutdown();
        tokio::task::yield_now().await;

        let handle = engine.execute_async(list_command("late"));
        assert_eq!(handle.await, Err(EngineError::Stopped));

        let result = engine.execute(list_command("late")).await;
        assert_eq!(result.status, TaskStatus::Failed);
    }
}
