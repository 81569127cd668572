use async_trait::async_trait;

/// A single outbound delivery: rendered text bound for a specific
/// recipient on one channel (chat id, channel id, webhook URL — whatever
/// the adapter's own addressing scheme expects).
#[derive(Debug, Clone)]
pub struct SendMessage {
    pub content: String,
    pub recipient: String,
}

/// An external messaging surface the Notification Router can deliver
/// through. Mirrors the teacher's `Channel` trait but drops the inbound
/// `listen`/typing-indicator side — that belongs to the chat adapters
/// that turn inbound messages into trigger firings, not here.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &SendMessage) -> anyhow::Result<()>;
    async fn health_check(&self) -> bool;
}
