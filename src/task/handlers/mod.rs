//! Task handlers for the different command types

mod config;
mod deploy;
mod module;

pub use config::ConfigHandler;
pub use deploy::DeployHandler;
pub use module::ModuleActionHandler;

use crate::artifact::{ArtifactFetcher, UrlSigner};
use crate::module::ModuleRuntime;
use anyhow::Result;
use async_trait::async_trait;
use edge_shared::{AccelerationInfo, Command, CommandResult, TaskType};
use std::sync::Arc;
use std::time::Duration;

/// Executes one command variant
///
/// `execute` may return an error; the engine turns it into a FAILED result.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Variant this handler is registered for
    fn task_type(&self) -> TaskType;

    /// Structural check used to pre-reject commands
    fn is_valid(&self, command: &Command) -> bool;

    async fn execute(&self, command: &Command) -> Result<CommandResult>;
}

/// Collaborators shared by the built-in handlers
#[derive(Clone)]
pub struct HandlerContext {
    pub runtime: Arc<dyn ModuleRuntime>,
    pub signer: Arc<dyn UrlSigner>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub acceleration: Option<AccelerationInfo>,
    pub sign_timeout: Duration,
}

/// Handlers for module-action, new-deploy and config tasks
///
/// launch and sensor tasks have no handler and are rejected as unsupported.
pub fn default_handlers(ctx: &HandlerContext) -> Vec<Arc<dyn TaskHandler>> {
    vec![
        Arc::new(ModuleActionHandler::new(ctx.runtime.clone())),
        Arc::new(DeployHandler::new(ctx.clone())),
        Arc::new(ConfigHandler::new(ctx.runtime.clone())),
    ]
}
