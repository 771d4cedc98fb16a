// Plugin event relay
//
// Plugin commands carry no code of their own. Each one is registered with the same
// bound-data handler, and its static data names the event to publish and the payload
// to publish it with.

use crate::command::handler::CommandHandler;
use crate::errors::EventBusError;
use crate::events::{EventBus, EventType};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RelayPayload {
    event_type: EventType,
    #[serde(default)]
    data: Value,
}

/// Static data for one relayed command
pub fn relay_static_data(event_type: EventType, data: Option<Value>) -> Value {
    json!({
        "event_type": event_type,
        "data": data.unwrap_or(Value::Null),
    })
}

/// Handler publishing the bound event with the call context merged into its data
pub fn plugin_relay(bus: Arc<EventBus>) -> CommandHandler {
    CommandHandler::bound_data(move |payload| {
        let bus = bus.clone();
        async move {
            let relay: RelayPayload =
                serde_json::from_value(payload).map_err(|e| EventBusError::InvalidPayload {
                    event_type: "relay".to_string(),
                    reason: e.to_string(),
                })?;
            debug!(event_type = %relay.event_type, "Relaying plugin command");
            bus.publish(relay.event_type, relay.data);
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::dispatcher::bind_static_data;
    use crate::models::{CommandOrigin, MessageChannel};
    use crate::worker_pool::WorkerPool;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_relay_publishes_bound_event() {
        let bus = Arc::new(EventBus::new(
            8,
            Arc::new(WorkerPool::new(Duration::from_secs(1))),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(EventType::PluginAction, move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.data);
            }
        });
        bus.start_consumer().unwrap();

        let static_data = relay_static_data(
            EventType::PluginAction,
            Some(json!({"plugin_id": "sites", "action": "refresh"})),
        );
        let origin = CommandOrigin::user(MessageChannel::Web, "web", "admin");
        let payload = bind_static_data(static_data, "all", &origin);

        let CommandHandler::BoundData(relay) = plugin_relay(bus.clone()) else {
            panic!("relay must be a bound-data handler");
        };
        relay(payload).await.unwrap();

        let data = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data["action"], "refresh");
        assert_eq!(data["user"], "admin");
        assert_eq!(data["arg_str"], "all");
        bus.stop_consumer().await;
    }

    #[tokio::test]
    async fn test_relay_rejects_unknown_event_type() {
        let bus = Arc::new(EventBus::new(
            8,
            Arc::new(WorkerPool::new(Duration::from_secs(1))),
        ));
        let CommandHandler::BoundData(relay) = plugin_relay(bus) else {
            panic!("relay must be a bound-data handler");
        };
        let result = relay(json!({"event_type": "no.such.event", "data": {}})).await;
        assert!(result.is_err());
    }
}
