pub mod config;
pub mod sweeper;

pub use config::{RetentionConfig, RetentionDays};
pub use sweeper::{RetentionSweeper, SweepReport};
