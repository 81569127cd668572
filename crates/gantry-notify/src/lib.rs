pub mod config;
pub mod discord;
pub mod router;
pub mod telegram;
pub mod traits;

pub use config::{DiscordConfig, NotifyConfig, QuietHours, TelegramConfig};
pub use router::NotificationRouter;
pub use traits::{Channel, SendMessage};
