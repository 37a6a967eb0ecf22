//! Configuration handler

use super::TaskHandler;
use crate::module::{ModuleRuntime, RuntimeError};
use anyhow::{bail, Result};
use async_trait::async_trait;
use edge_shared::{Command, CommandKind, CommandResult, ResultDetail, TaskType};
use std::sync::Arc;
use tracing::{info, warn};

/// Applies configuration properties through the module runtime
pub struct ConfigHandler {
    runtime: Arc<dyn ModuleRuntime>,
}

impl ConfigHandler {
    pub fn new(runtime: Arc<dyn ModuleRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl TaskHandler for ConfigHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Config
    }

    fn is_valid(&self, command: &Command) -> bool {
        match &command.kind {
            CommandKind::Config(task) => !task.pid.is_empty() && !task.location.is_empty(),
            _ => false,
        }
    }

    async fn execute(&self, command: &Command) -> Result<CommandResult> {
        let CommandKind::Config(task) = &command.kind else {
            bail!("config handler received a {} task", command.task_type());
        };

        let result = match self
            .runtime
            .update_configuration(&task.pid, &task.location, &task.properties)
            .await
        {
            Ok(effective) => {
                info!(task_id = %command.id, pid = %task.pid, "Configuration updated");
                CommandResult::succeeded(
                    &command.id,
                    ResultDetail::Config {
                        properties: Some(effective),
                    },
                )
            }
            Err(RuntimeError::ConfigurationUnsupported) => {
                warn!(task_id = %command.id, "Configuration not supported by runtime");
                CommandResult::rejected(
                    &command.id,
                    ResultDetail::Config { properties: None },
                    RuntimeError::ConfigurationUnsupported.to_string(),
                )
            }
            Err(e) => CommandResult::failed(
                &command.id,
                ResultDetail::Config { properties: None },
                e.to_string(),
            ),
        };
        Ok(result)
    }
}
