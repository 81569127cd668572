//! Discord delivery adapter — outbound only. The Notification Router
//! never listens for inbound Discord messages; that belongs to the chat
//! adapters.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::DiscordConfig;
use crate::traits::{Channel, SendMessage};

const DISCORD_MAX_MESSAGE_LENGTH: usize = 2000;
const DISCORD_API: &str = "https://discord.com/api/v10";

/// Split a message into chunks that respect Discord's 2000-character
/// limit, preferring a newline or space boundary over a hard cut.
pub fn split_message(message: &str) -> Vec<String> {
    if message.chars().count() <= DISCORD_MAX_MESSAGE_LENGTH {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = message;

    while !remaining.is_empty() {
        let hard_split = remaining
            .char_indices()
            .nth(DISCORD_MAX_MESSAGE_LENGTH)
            .map_or(remaining.len(), |(idx, _)| idx);

        let chunk_end = if hard_split == remaining.len() {
            hard_split
        } else {
            let search_area = &remaining[..hard_split];
            if let Some(pos) = search_area.rfind('\n') {
                pos + 1
            } else if let Some(pos) = search_area.rfind(' ') {
                pos + 1
            } else {
                hard_split
            }
        };

        chunks.push(remaining[..chunk_end].to_string());
        remaining = &remaining[chunk_end..];
    }

    chunks
}

pub struct DiscordChannel {
    bot_token: String,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig) -> Self {
        Self { bot_token: config.bot_token }
    }

    fn http_client(&self) -> Client {
        Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build reqwest client")
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
        let client = self.http_client();
        let chunks = split_message(&message.content);

        for (i, chunk) in chunks.iter().enumerate() {
            let url = format!("{DISCORD_API}/channels/{}/messages", message.recipient);
            let resp = client
                .post(&url)
                .header("Authorization", format!("Bot {}", self.bot_token))
                .json(&json!({ "content": chunk }))
                .send()
                .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let err = resp.text().await.unwrap_or_default();
                anyhow::bail!("Discord send failed ({status}): {err}");
            }

            if i < chunks.len() - 1 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.http_client()
            .get(format!("{DISCORD_API}/users/@me"))
            .header("Authorization", format!("Bot {}", self.bot_token))
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
        assert_eq!(split_message("Hello!"), vec!["Hello!".to_string()]);
    }

    #[test]
    fn split_just_over_limit() {
        let msg = "a".repeat(DISCORD_MAX_MESSAGE_LENGTH + 1);
        let chunks = split_message(&msg);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn split_preserves_content() {
        let orig = "word ".repeat(2000);
        let chunks = split_message(&orig);
        assert_eq!(chunks.concat(), orig);
    }
}
