//! Desired-state reconciliation
//!
//! Each command id in a delta is dispatched at most once: it is skipped when
//! a result for it is already reported or when it is still in flight. The
//! scheduled-task lock is held across that check and the registration, and
//! completions take the same lock before merging their result, so a result
//! is always visible before its id leaves the scheduled set.
//!
//! Lock order is scheduled set, then shadow store.

use super::device::DeviceInfo;
use super::store::ShadowStore;
use super::throttle::UpdateThrottler;
use crate::task::{EngineError, ExecutionEngine};
use edge_shared::{CommandResult, Desired, ModuleInfo, Shadow, TaskStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

pub struct ShadowReconciler {
    store: Arc<ShadowStore>,
    engine: Arc<ExecutionEngine>,
    throttler: Arc<UpdateThrottler>,
    scheduled: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ShadowReconciler {
    pub fn new(
        store: Arc<ShadowStore>,
        engine: Arc<ExecutionEngine>,
        throttler: Arc<UpdateThrottler>,
    ) -> Self {
        Self {
            store,
            engine,
            throttler,
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ShadowStore> {
        &self.store
    }

    fn lock_scheduled(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of commands dispatched and not yet completed
    pub fn scheduled_count(&self) -> usize {
        self.lock_scheduled().len()
    }

    /// Dispatch every command of the delta that is neither reported nor in flight
    pub fn apply_delta(self: &Arc<Self>, desired: &Desired) {
        trace!("Handling delta update");
        let mut scheduled = self.lock_scheduled();

        for (task_id, command) in &desired.tasks {
            if self.store.has_result(task_id) {
                trace!(%task_id, "Task already processed");
                continue;
            }
            if scheduled.contains_key(task_id) {
                trace!(%task_id, "Task already scheduled");
                continue;
            }

            debug!(%task_id, task_type = %command.task_type(), "Dispatching task");
            let handle = self.engine.execute_async(command.clone());
            let reconciler = self.clone();
            let id = task_id.clone();
            let completion = tokio::spawn(async move {
                let outcome = handle.await;
                reconciler.on_command_completed(&id, outcome);
            });
            scheduled.insert(task_id.clone(), completion);
        }
    }

    /// Record a finished command and schedule a report
    pub fn on_command_completed(&self, task_id: &str, outcome: Result<CommandResult, EngineError>) {
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(%task_id, "Unexpected error during task execution: {}", e);
                CommandResult::basic(
                    task_id,
                    TaskStatus::Failed,
                    format!("Unexpected exception: {}", e),
                )
            }
        };

        {
            let mut scheduled = self.lock_scheduled();
            self.store.record_result(task_id, result);
            scheduled.remove(task_id);
        }

        self.housekeeping();
        self.throttler.notify();
    }

    /// Two-phase pruning of results for tasks the backend dropped
    pub fn housekeeping(&self) {
        if self.store.housekeeping() {
            debug!("Stale task results pruned");
        }
    }

    /// Replace the reported module inventory
    pub fn update_module_list(&self, modules: Vec<ModuleInfo>) {
        debug!(count = modules.len(), "Module inventory changed");
        self.store.set_modules(modules);
        self.throttler.notify();
    }

    /// Handle a delta notification from the backend
    ///
    /// The delta becomes the cloud desired state before any task is dispatched.
    pub fn on_delta(self: &Arc<Self>, desired: Desired) {
        let has_tasks = !desired.tasks.is_empty();
        self.store.replace_cloud_desired(desired.clone());
        if has_tasks {
            trace!("There are tasks in desired, applying delta");
            self.apply_delta(&desired);
        }
    }

    /// Handle a full shadow document fetched from the backend
    pub fn on_cloud_document(&self, shadow: Shadow) {
        debug!(version = ?shadow.version, "Cloud shadow replaced");
        self.store.replace_cloud(shadow);
    }

    pub fn populate_device_info(&self, info: &DeviceInfo) {
        self.store.update_local(|reported| info.apply(reported));
        info!("Device info: {} {} {}", info.os_name, info.os_version, info.arch);
    }

    pub fn set_online(&self) {
        self.store.update_local(|reported| reported.online = Some(true));
        self.throttler.notify();
    }

    /// Mark the device offline and publish right away
    pub async fn set_offline(&self) {
        self.store.update_local(|reported| reported.online = Some(false));
        self.throttler.update_immediately().await;
    }
}
