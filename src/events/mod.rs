use log::debug;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::PlanTier;

const CHANNEL_CAPACITY: usize = 256;

/// Emitted after a subscription write commits. Listening clients re-fetch
/// their subscription instead of trusting the payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionEvent {
    pub event: String,
    pub user_id: String,
    pub plan: PlanTier,
}

impl SubscriptionEvent {
    pub fn changed(user_id: String, plan: PlanTier) -> Self {
        SubscriptionEvent {
            event: "subscription_changed".to_string(),
            user_id,
            plan,
        }
    }
}

/// In-process replacement for the browser BroadcastChannel: every connected
/// SSE client holds a receiver; slow clients lag and miss events rather than
/// blocking writers.
pub struct EventHub {
    sender: broadcast::Sender<SubscriptionEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventHub { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.sender.subscribe()
    }

    /// Best-effort: a send with no listeners is not an error.
    pub fn publish(&self, event: SubscriptionEvent) {
        match self.sender.send(event) {
            Ok(n) => debug!("subscription event delivered to {} listener(s)", n),
            Err(_) => debug!("subscription event dropped (no listeners)"),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_listeners_does_not_panic() {
        let hub = EventHub::new();
        hub.publish(SubscriptionEvent::changed("abc".into(), PlanTier::Pro));
    }

    #[test]
    fn subscribers_receive_published_events() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        hub.publish(SubscriptionEvent::changed("abc".into(), PlanTier::Pro));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, "subscription_changed");
        assert_eq!(event.user_id, "abc");
        assert_eq!(event.plan, PlanTier::Pro);
    }

    #[test]
    fn event_serializes_with_expected_shape() {
        let event = SubscriptionEvent::changed("42".into(), PlanTier::Enterprise);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "subscription_changed");
        assert_eq!(json["user_id"], "42");
        assert_eq!(json["plan"], "enterprise");
    }
}
