pub mod bridge;

pub use bridge::{ChannelBridge, ChannelMessage};
