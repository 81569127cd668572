pub mod engine;
pub mod reducer;
pub mod validate;
pub mod vars;

pub use engine::{Notifier, WorkflowEngine, WorkflowEngineConfig};
pub use reducer::{DefaultWorkflowReducer, WorkflowCommand, WorkflowEvent};
pub use validate::validate;
