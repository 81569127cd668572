//! Telegram delivery adapter — outbound only, via the Bot API's
//! `sendMessage`. Messages are split into 4096-character chunks.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::TelegramConfig;
use crate::traits::{Channel, SendMessage};

const MAX_MESSAGE_LEN: usize = 4096;
const TELEGRAM_API: &str = "https://api.telegram.org/bot";

pub fn split_message(text: &str) -> Vec<String> {
    if text.len() <= MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let end = (start + MAX_MESSAGE_LEN).min(text.len());
        let chunk = &text[start..end];
        let split_at = if end < text.len() {
            chunk.rfind('\n').map(|p| p + 1).unwrap_or(chunk.len())
        } else {
            chunk.len()
        };
        chunks.push(text[start..start + split_at].to_string());
        start += split_at;
    }
    chunks
}

pub struct TelegramChannel {
    bot_token: String,
    client: Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token,
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to create reqwest client"),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{TELEGRAM_API}{}/{method}", self.bot_token)
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
        for chunk in split_message(&message.content) {
            let body = serde_json::json!({
                "chat_id": message.recipient,
                "text": chunk,
                "parse_mode": "Markdown",
            });
            let resp = self.client.post(self.api_url("sendMessage")).json(&body).send().await?;
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                tracing::error!("telegram sendMessage failed: {text}");
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_short_message() {
        let msg = "Hello, world!";
        assert_eq!(split_message(msg), vec![msg.to_string()]);
    }

    #[test]
    fn split_long_message() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_MESSAGE_LEN);
        }
        assert_eq!(chunks.join(""), msg);
    }
}
