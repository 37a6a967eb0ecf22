pub mod orchestrator;
pub mod parser;
pub mod validator;

pub use orchestrator::JobOrchestrator;
