//! Local and cloud shadow copies
//!
//! The local copy is owned by this device and is the source of what gets
//! reported. The cloud copy is the last snapshot seen from the backend and is
//! only used to learn which desired tasks are still live. Both live behind
//! short critical sections; callers never hold a lock across I/O.

use edge_shared::shadow::Reported;
use edge_shared::{CommandResult, Desired, ModuleInfo, Shadow};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct ShadowStore {
    local: Mutex<Reported>,
    cloud: Mutex<Shadow>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ShadowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-modify-write on the local reported state
    pub fn update_local<R>(&self, f: impl FnOnce(&mut Reported) -> R) -> R {
        f(&mut lock(&self.local))
    }

    /// Snapshot of the local reported state
    pub fn reported(&self) -> Reported {
        lock(&self.local).clone()
    }

    /// Whether a result (or tombstone) is recorded for the task
    pub fn has_result(&self, task_id: &str) -> bool {
        lock(&self.local).task_results.contains_key(task_id)
    }

    pub fn record_result(&self, task_id: &str, result: CommandResult) {
        lock(&self.local)
            .task_results
            .insert(task_id.to_string(), Some(result));
    }

    pub fn set_modules(&self, modules: Vec<ModuleInfo>) {
        lock(&self.local).modules = Some(modules);
    }

    /// Snapshot of the cloud copy
    pub fn cloud(&self) -> Shadow {
        lock(&self.cloud).clone()
    }

    /// Replace the cloud copy wholesale
    pub fn replace_cloud(&self, shadow: Shadow) {
        *lock(&self.cloud) = shadow;
    }

    /// Replace only the desired section of the cloud copy
    pub fn replace_cloud_desired(&self, desired: Desired) {
        lock(&self.cloud).state.desired = desired;
    }

    /// Prune results whose task is gone from the cloud desired state
    ///
    /// A live result first becomes a tombstone; a tombstone is removed on
    /// the next pass. Returns whether anything changed.
    pub fn housekeeping(&self) -> bool {
        let live: HashSet<String> = lock(&self.cloud)
            .state
            .desired
            .tasks
            .keys()
            .cloned()
            .collect();

        let mut changed = false;
        lock(&self.local).task_results.retain(|task_id, result| {
            if live.contains(task_id) {
                return true;
            }
            changed = true;
            if result.is_none() {
                false
            } else {
                *result = None;
                true
            }
        });
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::desired_with;
    use edge_shared::{ResultDetail, TaskStatus};

    fn result(id: &str) -> CommandResult {
        CommandResult::succeeded(id, ResultDetail::Basic)
    }

    #[test]
    fn test_tombstone_then_remove_across_two_passes() {
        let store = ShadowStore::new();
        store.replace_cloud_desired(desired_with(&["t1", "t2"]));
        store.record_result("t1", result("t1"));
        store.record_result("t2", result("t2"));

        assert!(!store.housekeeping());

        store.replace_cloud_desired(desired_with(&["t2"]));

        assert!(store.housekeeping());
        let first = store.reported().task_results;
        assert_eq!(first.get("t1"), Some(&None), "first pass tombstones");
        assert!(matches!(first.get("t2"), Some(Some(_))));

        assert!(store.housekeeping());
        let second = store.reported().task_results;
        assert!(!second.contains_key("t1"), "second pass removes");
        assert!(second.contains_key("t2"));

        assert!(!store.housekeeping());
    }

    #[test]
    fn test_result_survives_while_task_is_desired() {
        let store = ShadowStore::new();
        store.replace_cloud_desired(desired_with(&["t1"]));
        store.record_result("t1", result("t1"));

        for _ in 0..3 {
            store.housekeeping();
        }
        assert_eq!(
            store.reported().task_results["t1"].as_ref().map(|r| r.status),
            Some(TaskStatus::Succeeded)
        );
    }
}
