use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use gantry_notify::NotificationRouter;
use gantry_scheduler::SchedulerEngine;
use gantry_types::NotificationPriority;

/// An inbound message received on an external collaborator surface
/// (Discord, Telegram, Slack, a generic webhook relay — whatever the
/// caller's own ingestion loop or HTTP handler produced). Shaped after
/// the teacher's `ChannelMessage`, minus the fields only its own
/// session-routing needed (attachments, typing state).
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: String,
    pub sender: String,
    pub reply_target: String,
    pub content: String,
    pub channel: String,
}

/// Bridges external collaborators to the engine: inbound messages become
/// webhook-trigger firings (§4.I), outbound text is handed to the
/// Notification Router for delivery. Deliberately thin — the actual
/// gateway/long-poll mechanics for a given chat platform live outside
/// this crate (an HTTP handler, a standalone poller), calling
/// `handle_inbound` once a message has been received.
pub struct ChannelBridge {
    scheduler: Arc<SchedulerEngine>,
    notifier: Option<Arc<NotificationRouter>>,
}

impl ChannelBridge {
    pub fn new(scheduler: Arc<SchedulerEngine>, notifier: Option<Arc<NotificationRouter>>) -> Self {
        Self { scheduler, notifier }
    }

    /// Converts an inbound message into a webhook-trigger firing at
    /// `/channels/{channel}`. Returns whether a trigger matched and
    /// fired.
    pub async fn handle_inbound(&self, message: ChannelMessage) -> bool {
        let path = format!("/channels/{}", message.channel);
        let mut payload = HashMap::new();
        payload.insert("message_id".to_string(), message.id);
        payload.insert("sender".to_string(), message.sender);
        payload.insert("reply_target".to_string(), message.reply_target);
        payload.insert("content".to_string(), message.content);
        payload.insert("received_at".to_string(), Utc::now().timestamp_millis().to_string());

        let fired = self.scheduler.fire_webhook(&path, payload).await;
        if !fired {
            tracing::debug!(channel = %message.channel, "no webhook trigger registered for inbound channel message");
        }
        fired
    }

    /// Relays text outward through the Notification Router, addressed to
    /// `target` (typically `"{channel}:{reply_target}"`).
    pub async fn relay_outbound(&self, target: Option<&str>, text: &str, priority: NotificationPriority) {
        let Some(notifier) = &self.notifier else {
            tracing::warn!("relay_outbound called with no Notification Router configured");
            return;
        };
        use gantry_workflow::Notifier as _;
        notifier.notify(target, text, priority).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_dispatch::{Dispatcher, DispatcherConfig};
    use gantry_events::EventBus;
    use gantry_governor::{BudgetGovernor, BudgetLimits, CircuitBreaker, Governor};
    use gantry_providers::{AppConfig, ProviderRegistry};
    use gantry_sandbox::{ProcessSandboxPlugin, SandboxManager};
    use gantry_session::SessionStore;
    use gantry_storage::Store;
    use gantry_tools::ToolRegistry;
    use gantry_types::{Trigger, TriggerAction, TriggerSpec, Workflow};
    use gantry_workflow::{WorkflowEngine, WorkflowEngineConfig};
    use std::collections::HashMap as Map;
    use tokio::sync::RwLock;

    async fn bridge_with_webhook(path: &str, workflow_name: &str) -> ChannelBridge {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let agents: Arc<RwLock<Map<String, gantry_types::AgentDefinition>>> = Arc::new(RwLock::new(Map::new()));
        let events = EventBus::new();
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            events.clone(),
            Arc::new(ProviderRegistry::new(AppConfig::default())),
            Arc::new(Governor::new(
                Arc::new(CircuitBreaker::with_defaults()),
                Arc::new(BudgetGovernor::new(BudgetLimits::default())),
            )),
            Arc::new(SandboxManager::new(Arc::new(ProcessSandboxPlugin::default()))),
            Arc::new(SessionStore::new(store.clone())),
            agents.clone(),
            DispatcherConfig::default(),
        ));
        let workflows: Arc<RwLock<Map<String, Workflow>>> = Arc::new(RwLock::new(Map::new()));
        workflows.write().await.insert(
            workflow_name.to_string(),
            Workflow { name: workflow_name.to_string(), description: None, variables: Map::new(), steps: vec![] },
        );
        let workflow_engine = Arc::new(WorkflowEngine::new(
            store.clone(),
            events.clone(),
            dispatcher.clone(),
            Arc::new(ToolRegistry::new()),
            None,
            None,
            agents,
            WorkflowEngineConfig::default(),
        ));
        let scheduler = Arc::new(SchedulerEngine::new(store.clone(), events, dispatcher, workflow_engine, workflows));
        store
            .put_trigger(&Trigger {
                id: "t1".to_string(),
                name: "inbound".to_string(),
                enabled: true,
                spec: TriggerSpec::Webhook { path: path.to_string(), secret: None },
                action: TriggerAction::RunWorkflow,
                target: workflow_name.to_string(),
                variables: Map::new(),
                last_fired_at_ms: None,
                misfire_count: 0,
                cooldown_secs: 0,
                approval_required: false,
            })
            .await
            .unwrap();
        ChannelBridge::new(scheduler, None)
    }

    #[tokio::test]
    async fn inbound_message_fires_matching_webhook_trigger() {
        let bridge = bridge_with_webhook("/channels/discord", "greet").await;
        let fired = bridge
            .handle_inbound(ChannelMessage {
                id: "m1".into(),
                sender: "alice".into(),
                reply_target: "chan1".into(),
                content: "hello".into(),
                channel: "discord".into(),
            })
            .await;
        assert!(fired);
    }

    #[tokio::test]
    async fn inbound_message_on_unconfigured_channel_does_not_fire() {
        let bridge = bridge_with_webhook("/channels/discord", "greet").await;
        let fired = bridge
            .handle_inbound(ChannelMessage {
                id: "m2".into(),
                sender: "bob".into(),
                reply_target: "chan2".into(),
                content: "hi".into(),
                channel: "telegram".into(),
            })
            .await;
        assert!(!fired);
    }

    #[tokio::test]
    async fn relay_outbound_without_notifier_does_not_panic() {
        let bridge = bridge_with_webhook("/channels/discord", "greet").await;
        bridge.relay_outbound(None, "hi", NotificationPriority::Normal).await;
    }
}
