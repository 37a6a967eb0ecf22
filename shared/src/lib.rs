//! Edge Agent Shared Model
//!
//! Wire types (tasks, results, shadow and job documents), the api version
//! gate, the job lifecycle state machine and the frame codec shared by the
//! agent and its transport adapters.

pub mod codec;
pub mod job;
pub mod module;
pub mod shadow;
pub mod state_machine;
pub mod task;
pub mod version;

use thiserror::Error;

// Re-export commonly used types at crate root
pub use job::{DescribeJobRequest, JobDescription, JobExecution, JobPayload, JobStatus, UpdateJobRequest};
pub use module::{AccelerationInfo, ModuleEventKind, ModuleInfo, ModuleRef, ModuleState};
pub use shadow::{Desired, Reported, ReportedUpdate, Shadow};
pub use task::{
    Command, CommandKind, CommandResult, ModuleAction, ResultDetail, TaskStatus, TaskType,
};

/// Errors raised while decoding wire documents
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid module info '{0}'")]
    InvalidModuleInfo(String),
}

/// Default operating parameters
pub mod defaults {
    /// Minimum spacing between two reported-state publishes
    pub const SHADOW_UPDATE_INTERVAL_MS: u64 = 1000;

    /// How long a deploy waits for a signed artifact URL
    pub const SIGN_URL_TIMEOUT_MS: u64 = 60_000;

    /// Api version the execution engine understands
    pub const SUPPORTED_API_VERSION: &str = "1.0";
}
