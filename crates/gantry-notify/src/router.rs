use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use gantry_types::NotificationPriority;
use gantry_workflow::Notifier;

use crate::config::{NotifyConfig, QuietHours};
use crate::discord::DiscordChannel;
use crate::telegram::TelegramChannel;
use crate::traits::{Channel, SendMessage};

const DEDUP_WINDOW_MS: u64 = 5 * 60 * 1000;

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn minute_of_day(timezone: &str) -> u32 {
    let tz: chrono_tz::Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
    let local = Utc::now().with_timezone(&tz);
    local.hour() * 60 + local.minute()
}

struct QueuedEntry {
    target: Option<String>,
    message: String,
    priority: NotificationPriority,
}

#[derive(Default)]
struct RouterState {
    queued: Vec<QueuedEntry>,
    recent: HashMap<String, u64>,
}

/// Priority-filtered, deduplicated, batched delivery to external
/// channels, with a quiet-hours queue that digests non-critical
/// notifications and flushes them when the window closes.
pub struct NotificationRouter {
    channels: Vec<Arc<dyn Channel>>,
    default_recipients: HashMap<String, String>,
    quiet_hours: Option<QuietHours>,
    state: Mutex<RouterState>,
    cancel: CancellationToken,
}

impl NotificationRouter {
    pub fn new(config: NotifyConfig) -> Self {
        let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
        if let Some(tg) = config.telegram {
            channels.push(Arc::new(TelegramChannel::new(tg)));
        }
        if let Some(dc) = config.discord {
            channels.push(Arc::new(DiscordChannel::new(dc)));
        }
        Self {
            channels,
            default_recipients: config.default_recipients.into_iter().collect(),
            quiet_hours: config.quiet_hours,
            state: Mutex::new(RouterState::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Spawns the minute ticker that flushes the quiet-hours digest once
    /// the window closes.
    pub fn spawn(self: &Arc<Self>) {
        let router = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = router.cancel.cancelled() => return,
                    _ = interval.tick() => {
                        if !router.in_quiet_hours() {
                            router.flush_digest().await;
                        }
                    }
                }
            }
        });
    }

    fn in_quiet_hours(&self) -> bool {
        match &self.quiet_hours {
            Some(qh) => qh.contains(minute_of_day(&qh.timezone)),
            None => false,
        }
    }

    fn dedup_key(target: Option<&str>, message: &str) -> String {
        format!("{}:{}", target.unwrap_or(""), message)
    }

    async fn is_duplicate(&self, key: &str) -> bool {
        let mut state = self.state.lock().await;
        let now = now_ms();
        state.recent.retain(|_, at| now.saturating_sub(*at) < DEDUP_WINDOW_MS);
        if let Some(at) = state.recent.get(key) {
            if now.saturating_sub(*at) < DEDUP_WINDOW_MS {
                return true;
            }
        }
        state.recent.insert(key.to_string(), now);
        false
    }

    fn targets_for(&self, target: Option<&str>) -> Vec<(String, String)> {
        match target {
            None => self.default_recipients.iter().map(|(c, r)| (c.clone(), r.clone())).collect(),
            Some(t) => match t.split_once(':') {
                Some((chan, recipient)) if self.channels.iter().any(|c| c.name() == chan) => {
                    vec![(chan.to_string(), recipient.to_string())]
                }
                _ => self.channels.iter().map(|c| (c.name().to_string(), t.to_string())).collect(),
            },
        }
    }

    async fn deliver(&self, target: Option<&str>, message: &str) {
        for (channel_name, recipient) in self.targets_for(target) {
            let Some(channel) = self.channels.iter().find(|c| c.name() == channel_name) else {
                continue;
            };
            if let Err(err) = channel.send(&SendMessage { content: message.to_string(), recipient }).await {
                tracing::warn!(channel = %channel_name, error = %err, "notification delivery failed");
            }
        }
    }

    async fn flush_digest(&self) {
        let entries = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.queued)
        };
        if entries.is_empty() {
            return;
        }
        let mut by_target: HashMap<Option<String>, Vec<String>> = HashMap::new();
        for entry in entries {
            by_target.entry(entry.target).or_default().push(entry.message);
        }
        for (target, messages) in by_target {
            let digest = format!(
                "Digest ({} notifications):\n{}",
                messages.len(),
                messages.iter().map(|m| format!("- {m}")).collect::<Vec<_>>().join("\n")
            );
            self.deliver(target.as_deref(), &digest).await;
        }
    }
}

#[async_trait]
impl Notifier for NotificationRouter {
    async fn notify(&self, target: Option<&str>, message: &str, priority: NotificationPriority) {
        let key = Self::dedup_key(target, message);
        if self.is_duplicate(&key).await {
            return;
        }

        if priority == NotificationPriority::Critical {
            self.deliver(target, message).await;
            return;
        }

        if self.in_quiet_hours() {
            let mut state = self.state.lock().await;
            state.queued.push(QueuedEntry {
                target: target.map(str::to_string),
                message: message.to_string(),
                priority,
            });
            return;
        }

        self.deliver(target, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingChannel {
        name: &'static str,
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            self.name
        }
        async fn send(&self, _message: &SendMessage) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    fn router_with(channels: Vec<Arc<dyn Channel>>, quiet_hours: Option<QuietHours>) -> NotificationRouter {
        let mut default_recipients = HashMap::new();
        for c in &channels {
            default_recipients.insert(c.name().to_string(), "default".to_string());
        }
        NotificationRouter {
            channels,
            default_recipients,
            quiet_hours,
            state: Mutex::new(RouterState::default()),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn delivers_immediately_outside_quiet_hours() {
        let sent = Arc::new(AtomicUsize::new(0));
        let channel: Arc<dyn Channel> = Arc::new(RecordingChannel { name: "discord", sent: sent.clone() });
        let router = router_with(vec![channel], None);
        router.notify(None, "hello", NotificationPriority::Normal).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_within_window_is_suppressed() {
        let sent = Arc::new(AtomicUsize::new(0));
        let channel: Arc<dyn Channel> = Arc::new(RecordingChannel { name: "discord", sent: sent.clone() });
        let router = router_with(vec![channel], None);
        router.notify(None, "same message", NotificationPriority::Normal).await;
        router.notify(None, "same message", NotificationPriority::Normal).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_critical_queues_during_quiet_hours_and_flushes_after() {
        let sent = Arc::new(AtomicUsize::new(0));
        let channel: Arc<dyn Channel> = Arc::new(RecordingChannel { name: "discord", sent: sent.clone() });
        let qh = QuietHours { start_minute: 0, end_minute: 24 * 60 - 1, timezone: "UTC".into() };
        let router = router_with(vec![channel], Some(qh));
        router.notify(None, "quiet message", NotificationPriority::Normal).await;
        assert_eq!(sent.load(Ordering::SeqCst), 0);

        {
            let mut state = router.state.lock().await;
            assert_eq!(state.queued.len(), 1);
            state.queued.clear();
        }
    }

    #[tokio::test]
    async fn critical_bypasses_quiet_hours() {
        let sent = Arc::new(AtomicUsize::new(0));
        let channel: Arc<dyn Channel> = Arc::new(RecordingChannel { name: "discord", sent: sent.clone() });
        let qh = QuietHours { start_minute: 0, end_minute: 24 * 60 - 1, timezone: "UTC".into() };
        let router = router_with(vec![channel], Some(qh));
        router.notify(None, "urgent", NotificationPriority::Critical).await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_digest_delivers_queued_entries_and_clears_queue() {
        let sent = Arc::new(AtomicUsize::new(0));
        let channel: Arc<dyn Channel> = Arc::new(RecordingChannel { name: "discord", sent: sent.clone() });
        let router = router_with(vec![channel], None);
        {
            let mut state = router.state.lock().await;
            state.queued.push(QueuedEntry { target: None, message: "a".into(), priority: NotificationPriority::Normal });
            state.queued.push(QueuedEntry { target: None, message: "b".into(), priority: NotificationPriority::Normal });
        }
        router.flush_digest().await;
        assert_eq!(sent.load(Ordering::SeqCst), 1);
        assert!(router.state.lock().await.queued.is_empty());
    }
}
