pub mod engine;
pub mod handlers;

pub use engine::{EngineError, ExecutionEngine};
pub use handlers::{default_handlers, HandlerContext};
