//! Module lifecycle actions (start, stop, uninstall, list)

use super::TaskHandler;
use crate::module::ModuleRuntime;
use anyhow::{bail, Result};
use async_trait::async_trait;
use edge_shared::task::ModuleActionTask;
use edge_shared::{
    Command, CommandKind, CommandResult, ModuleAction, ModuleInfo, ModuleState, ResultDetail,
    TaskType,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct ModuleActionHandler {
    runtime: Arc<dyn ModuleRuntime>,
}

impl ModuleActionHandler {
    pub fn new(runtime: Arc<dyn ModuleRuntime>) -> Self {
        Self { runtime }
    }

    async fn start(&self, id: &str, module: &ModuleInfo) -> CommandResult {
        match module.state {
            ModuleState::Resolved | ModuleState::Installed => {
                if let Err(e) = self.runtime.start(module.id).await {
                    error!(task_id = %id, "Failed to start {}: {}", module.symbolic_name, e);
                    return failed(id, e.to_string());
                }
                match self.state_after(module).await {
                    Ok(ModuleState::Active) => succeeded(id),
                    Ok(state) => failed(
                        id,
                        format!("Module {} is in state {}", module.symbolic_name, state),
                    ),
                    Err(message) => failed(id, message),
                }
            }
            state => rejected(
                id,
                format!("Module {} is in state {}", module.symbolic_name, state),
            ),
        }
    }

    async fn stop(&self, id: &str, module: &ModuleInfo) -> CommandResult {
        match module.state {
            ModuleState::Active => {
                if let Err(e) = self.runtime.stop(module.id).await {
                    error!(task_id = %id, "Failed to stop {}: {}", module.symbolic_name, e);
                    return failed(id, e.to_string());
                }
                match self.state_after(module).await {
                    Ok(ModuleState::Resolved) => succeeded(id),
                    Ok(state) => failed(
                        id,
                        format!("Module {} is in state {}", module.symbolic_name, state),
                    ),
                    Err(message) => failed(id, message),
                }
            }
            ModuleState::Resolved => {
                debug!(task_id = %id, "Module {} already stopped", module.symbolic_name);
                succeeded(id)
            }
            _ => rejected(
                id,
                format!("Module {} is not in ACTIVE state", module.symbolic_name),
            ),
        }
    }

    async fn uninstall(&self, id: &str, module: &ModuleInfo) -> CommandResult {
        match self.runtime.uninstall(module.id).await {
            Ok(()) => succeeded(id),
            Err(e) => {
                error!(task_id = %id, "Failed to uninstall {}: {}", module.symbolic_name, e);
                failed(id, e.to_string())
            }
        }
    }

    /// Re-read a module's state after acting on it
    async fn state_after(&self, module: &ModuleInfo) -> Result<ModuleState, String> {
        let modules = self.runtime.list_modules().await.map_err(|e| e.to_string())?;
        Ok(modules
            .iter()
            .find(|m| m.id == module.id)
            .map(|m| m.state)
            .unwrap_or(ModuleState::Uninstalled))
    }
}

#[async_trait]
impl TaskHandler for ModuleActionHandler {
    fn task_type(&self) -> TaskType {
        TaskType::ModuleAction
    }

    fn is_valid(&self, command: &Command) -> bool {
        let CommandKind::ModuleAction(task) = &command.kind else {
            return false;
        };
        is_valid_task(task)
    }

    async fn execute(&self, command: &Command) -> Result<CommandResult> {
        let CommandKind::ModuleAction(task) = &command.kind else {
            bail!("module-action handler received a {} task", command.task_type());
        };
        let id = command.id.as_str();

        let modules = match self.runtime.list_modules().await {
            Ok(modules) => modules,
            Err(e) => return Ok(failed(id, e.to_string())),
        };

        let result = match task.action {
            ModuleAction::List => {
                let names = modules
                    .iter()
                    .filter(|m| m.state != ModuleState::Uninstalled)
                    .map(|m| m.symbolic_name.clone())
                    .collect();
                CommandResult::succeeded(
                    id,
                    ResultDetail::ModuleAction {
                        modules: Some(names),
                    },
                )
            }
            action => {
                let target = task.target().and_then(|target| {
                    modules
                        .into_iter()
                        .find(|m| m.matches(&target) && m.state != ModuleState::Uninstalled)
                });
                let Some(module) = target else {
                    warn!(task_id = %id, "Module not found for {} action", action);
                    return Ok(rejected(id, "Module not found"));
                };

                debug!(task_id = %id, "{} {}", action, module);
                match action {
                    ModuleAction::Start => self.start(id, &module).await,
                    ModuleAction::Stop => self.stop(id, &module).await,
                    _ => self.uninstall(id, &module).await,
                }
            }
        };
        Ok(result)
    }
}

fn is_valid_task(task: &ModuleActionTask) -> bool {
    if let Some(name) = &task.symbolic_name {
        if name.chars().count() <= 1 {
            warn!("Validation failed: symbolic name '{}' is too short", name);
            return false;
        }
    }
    if task.action != ModuleAction::List && task.target().is_none() {
        warn!("Validation failed: {} requires symbolic name and version", task.action);
        return false;
    }
    true
}

fn detail() -> ResultDetail {
    ResultDetail::ModuleAction { modules: None }
}

fn succeeded(id: &str) -> CommandResult {
    CommandResult::succeeded(id, detail())
}

fn failed(id: &str, message: impl Into<String>) -> CommandResult {
    CommandResult::failed(id, detail(), message)
}

fn rejected(id: &str, message: impl Into<String>) -> CommandResult {
    CommandResult::rejected(id, detail(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::InMemoryRuntime;
    use edge_shared::task::ModuleActionTask;
    use edge_shared::{ModuleRef, TaskStatus};

    fn action(id: &str, action: ModuleAction, name: Option<&str>, version: Option<&str>) -> Command {
        Command::new(
            id,
            CommandKind::ModuleAction(ModuleActionTask {
                symbolic_name: name.map(String::from),
                version: version.map(String::from),
                action,
            }),
        )
    }

    fn handler_with(modules: &[(&str, ModuleState)]) -> (ModuleActionHandler, Arc<InMemoryRuntime>) {
        let runtime = Arc::new(InMemoryRuntime::new());
        for (name, state) in modules {
            runtime.register(ModuleRef::new(*name, "1.0.0"), *state);
        }
        (ModuleActionHandler::new(runtime.clone()), runtime)
    }

    #[test]
    fn test_validation_rules() {
        let (handler, _) = handler_with(&[]);

        assert!(handler.is_valid(&action("t", ModuleAction::List, None, None)));
        assert!(handler.is_valid(&action("t", ModuleAction::Start, Some("m1"), Some("1.0.0"))));
        assert!(!handler.is_valid(&action("t", ModuleAction::Start, Some("m1"), None)));
        assert!(!handler.is_valid(&action("t", ModuleAction::Stop, None, None)));
        assert!(!handler.is_valid(&action("t", ModuleAction::List, Some("m"), None)));
    }

    #[tokio::test]
    async fn test_start_resolved_module_succeeds() {
        let (handler, runtime) = handler_with(&[("m", ModuleState::Resolved)]);

        let result = handler
            .execute(&action("t1", ModuleAction::Start, Some("m"), Some("1.0.0")))
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Succeeded);
        let modules = runtime.list_modules().await.unwrap();
        assert_eq!(modules[0].state, ModuleState::Active);
    }

    #[tokio::test]
    async fn test_start_active_module_is_rejected() {
        let (handler, _) = handler_with(&[("m", ModuleState::Active)]);

        let result = handler
            .execute(&action("t1", ModuleAction::Start, Some("m"), Some("1.0.0")))
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Rejected);
        assert_eq!(result.message.as_deref(), Some("Module m is in state ACTIVE"));
    }

    #[tokio::test]
    async fn test_missing_module_is_rejected() {
        let (handler, _) = handler_with(&[("other", ModuleState::Resolved)]);

        let result = handler
            .execute(&action("t1", ModuleAction::Start, Some("m"), Some("1.0.0")))
            .await
            .unwrap();

        assert_eq!(result.status, TaskStatus::Rejected);
        assert!(result.message.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_stop_paths() {
        let (handler, _) = handler_with(&[
            ("running", ModuleState::Active),
            ("idle", ModuleState::Resolved),
            ("fresh", ModuleState::Installed),
        ]);

        let stop = |name: &str| action("t", ModuleAction::Stop, Some(name), Some("1.0.0"));
        assert_eq!(handler.execute(&stop("running")).await.unwrap().status, TaskStatus::Succeeded);
        assert_eq!(handler.execute(&stop("idle")).await.unwrap().status, TaskStatus::Succeeded);

        let fresh = handler.execute(&stop("fresh")).await.unwrap();
        assert_eq!(fresh.status, TaskStatus::Rejected);
        assert_eq!(fresh.message.as_deref(), Some("Module fresh is not in ACTIVE state"));
    }

    #[tokio::test]
    async fn test_list_skips_uninstalled_modules() {
        let (handler, runtime) = handler_with(&[("a", ModuleState::Active), ("b", ModuleState::Resolved)]);
        let uninstall = handler
            .execute(&action("t0", ModuleAction::Uninstall, Some("b"), Some("1.0.0")))
            .await
            .unwrap();
        assert_eq!(uninstall.status, TaskStatus::Succeeded);
        assert_eq!(runtime.list_modules().await.unwrap().len(), 2);

        let result = handler
            .execute(&action("t1", ModuleAction::List, None, None))
            .await
            .unwrap();

        assert_eq!(
            result.detail,
            ResultDetail::ModuleAction {
                modules: Some(vec!["a".to_string()])
            }
        );
    }
}
