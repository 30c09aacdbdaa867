//! Process-local event bus.
//!
//! Fan-out of scheduler lifecycle events to SSE subscribers. Backed by a
//! bounded broadcast channel: slow consumers lose events rather than slowing
//! producers, and late subscribers do not replay history (run logs have
//! their own replay buffer).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobSubmitted,
    JobEnqueued,
    JobScheduled,
    JobDispatched,
    JobPending,
    JobRequeued,
    JobUpdated,
    JobManualRun,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobSubmitted => "job_submitted",
            EventKind::JobEnqueued => "job_enqueued",
            EventKind::JobScheduled => "job_scheduled",
            EventKind::JobDispatched => "job_dispatched",
            EventKind::JobPending => "job_pending",
            EventKind::JobRequeued => "job_requeued",
            EventKind::JobUpdated => "job_updated",
            EventKind::JobManualRun => "job_manual_run",
        }
    }
}

/// Event envelope published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub ts: DateTime<Utc>,
}

impl SchedulerEvent {
    /// Domain carried in the payload, used for tenant-scoped filtering.
    pub fn domain(&self) -> Option<&str> {
        self.payload.get("domain").and_then(|d| d.as_str())
    }
}

/// Thread-safe, cloneable bus keyed by nothing: every subscriber sees every
/// event and filters on its own side.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    /// Create a bus with the default per-subscriber backlog (256 events).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        let event = SchedulerEvent {
            kind,
            payload,
            ts: Utc::now(),
        };
        // Ignore send errors (no active receivers)
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(
            EventKind::JobDispatched,
            json!({"job_id": "j1", "worker_id": "w1", "domain": "prod"}),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::JobDispatched);
        assert_eq!(event.domain(), Some("prod"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish(EventKind::JobEnqueued, json!({"domain": "prod"}));
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_events() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish(EventKind::JobEnqueued, json!({"n": i}));
        }

        // The first receive reports the lag, subsequent ones drain what fits.
        let lagged = rx.recv().await;
        assert!(matches!(
            lagged,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["n"], 3);
    }

    #[test]
    fn envelope_serializes_type_field() {
        let event = SchedulerEvent {
            kind: EventKind::JobPending,
            payload: json!({"reason": "no_worker", "domain": "prod"}),
            ts: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "job_pending");
        assert_eq!(value["payload"]["reason"], "no_worker");
        assert!(value["ts"].is_string());
    }

    #[test]
    fn kind_names_match_wire_format() {
        assert_eq!(EventKind::JobManualRun.as_str(), "job_manual_run");
        assert_eq!(
            serde_json::to_string(&EventKind::JobRequeued).unwrap(),
            "\"job_requeued\""
        );
    }
}
