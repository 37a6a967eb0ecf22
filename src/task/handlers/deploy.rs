//! New-deploy handler: sign, download and install each module in order

use super::{HandlerContext, TaskHandler};
use crate::artifact::{FetchError, SignerError};
use crate::module::RuntimeError;
use anyhow::{bail, Result};
use async_trait::async_trait;
use edge_shared::{Command, CommandKind, CommandResult, ModuleRef, ResultDetail, TaskType};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
enum DeployError {
    #[error("{0}")]
    Sign(#[from] SignerError),

    #[error("timed out waiting for signed url")]
    SignTimeout,

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Install(RuntimeError),
}

pub struct DeployHandler {
    ctx: HandlerContext,
}

impl DeployHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    async fn install(&self, module: &ModuleRef) -> Result<(), DeployError> {
        let signed = timeout(
            self.ctx.sign_timeout,
            self.ctx
                .signer
                .request_signed_url(module, self.ctx.acceleration.as_ref()),
        )
        .await
        .map_err(|_| DeployError::SignTimeout)??;

        let artifact = self.ctx.fetcher.fetch(&signed).await?;
        debug!(%module, size = artifact.len(), "Artifact fetched");

        match self
            .ctx
            .runtime
            .install_from_stream(&signed, module, artifact)
            .await
        {
            Ok(info) => {
                info!(%module, id = info.id, "Successfully installed");
                Ok(())
            }
            Err(RuntimeError::AlreadyInstalled(_)) => {
                info!(%module, "Module already installed");
                Ok(())
            }
            Err(e) => Err(DeployError::Install(e)),
        }
    }
}

#[async_trait]
impl TaskHandler for DeployHandler {
    fn task_type(&self) -> TaskType {
        TaskType::NewDeploy
    }

    fn is_valid(&self, command: &Command) -> bool {
        let CommandKind::NewDeploy(task) = &command.kind else {
            return false;
        };
        if task.installs.is_empty() {
            warn!("Validation failed: install list is empty");
            return false;
        }
        let complete = task
            .installs
            .iter()
            .all(|m| !m.symbolic_name.is_empty() && !m.version.is_empty());
        if !complete {
            warn!("Validation failed: symbolicName and/or version is empty");
        }
        complete
    }

    async fn execute(&self, command: &Command) -> Result<CommandResult> {
        let CommandKind::NewDeploy(task) = &command.kind else {
            bail!("new-deploy handler received a {} task", command.task_type());
        };

        for (index, module) in task.installs.iter().enumerate() {
            if let Err(e) = self.install(module).await {
                error!(task_id = %command.id, %module, "Deploy failed: {}", e);
                let unsatisfied = task.installs[index..]
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                return Ok(CommandResult::failed(
                    &command.id,
                    ResultDetail::NewDeploy {
                        unsatisfied: Some(unsatisfied),
                    },
                    format!("exception while deploying task {}", e),
                ));
            }
        }

        Ok(CommandResult::succeeded(
            &command.id,
            ResultDetail::NewDeploy { unsatisfied: None },
        ))
    }
}
