//! `EventBus` — per-client fan-out of typed lifecycle events, at-most-once
//! and best-effort. Grounded in the teacher's `NodeRegistry`/`ConnectedNode`
//! (`gateway/runtime/nodes.rs`): an `RwLock<HashMap<String, mpsc::Sender>>`
//! keyed by connection id, generalized here from "node id" to "client id"
//! with a payload shape matching this engine's event table instead of the
//! teacher's node-protocol frames.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Thought {
        content: String,
        turn_id: String,
    },
    Action {
        action_id: String,
        #[serde(rename = "action_type")]
        kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Observation {
        action_id: String,
        ok: bool,
        content_preview: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference: Option<Value>,
    },
    HitlRequest {
        request_id: String,
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
    HitlConfirm {
        request_id: String,
        prompt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
    Screenshot {
        mime: String,
        path: String,
        size: usize,
    },
    Final {
        content: String,
    },
    TokenInfo {
        prompt: u32,
        completion: u32,
        total: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cached: Option<u32>,
    },
    End,
    Error {
        content: String,
    },
}

/// The wire envelope every event is wrapped in before fan-out: `agent_id`
/// is the trace id, `msg_id` a per-envelope unique id, `timestamp` ISO-8601.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub agent_id: String,
    pub msg_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

struct Subscriber {
    sender: mpsc::Sender<EventEnvelope>,
}

/// Fans out `Event`s to every subscriber registered for a `client_id`.
/// Delivery is at-most-once and best-effort: a full or closed channel just
/// drops the envelope rather than blocking the Executor.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `client_id` and return the receiving
    /// half of its channel (e.g. to drive a WebSocket connection).
    pub fn subscribe(&self, client_id: &str) -> mpsc::Receiver<EventEnvelope> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.subscribers
            .write()
            .entry(client_id.to_string())
            .or_default()
            .push(Subscriber { sender: tx });
        rx
    }

    /// Best-effort fan-out of one event to every live subscriber of
    /// `client_id`. Closed senders are pruned lazily on the next send.
    pub fn send(&self, client_id: &str, trace_id: Uuid, event: Event) {
        let envelope = EventEnvelope {
            agent_id: trace_id.to_string(),
            msg_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        };

        let mut subscribers = self.subscribers.write();
        if let Some(subs) = subscribers.get_mut(client_id) {
            subs.retain(|sub| sub.sender.try_send(envelope.clone()).is_ok());
            if subs.is_empty() {
                subscribers.remove(client_id);
            }
        }
    }

    pub fn subscriber_count(&self, client_id: &str) -> usize {
        self.subscribers.read().get(client_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_sent_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("client-1");
        bus.send("client-1", Uuid::new_v4(), Event::End);
        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.event, Event::End));
    }

    #[tokio::test]
    async fn other_clients_do_not_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("client-2");
        bus.send("client-1", Uuid::new_v4(), Event::End);
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv()).await;
        assert!(result.is_err(), "client-2 must not see client-1's events");
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_send() {
        let bus = EventBus::new();
        let rx = bus.subscribe("client-1");
        drop(rx);
        bus.send("client-1", Uuid::new_v4(), Event::End);
        assert_eq!(bus.subscriber_count("client-1"), 0);
    }

    #[tokio::test]
    async fn send_with_no_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.send("nobody", Uuid::new_v4(), Event::Error { content: "x".into() });
    }

    #[test]
    fn event_serializes_with_tagged_type() {
        let json = serde_json::to_value(Event::Final { content: "done".into() }).unwrap();
        assert_eq!(json["type"], "final");
        assert_eq!(json["content"], "done");
    }
}
