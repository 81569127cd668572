pub mod agents;
pub mod config;
pub mod supervisor;
pub mod workflows;

pub use agents::AgentRegistry;
pub use config::{AppConfig, ConfigStore};
pub use supervisor::ReloadSupervisor;
pub use workflows::WorkflowRegistry;
