//! Broadcast — best-effort fan-out of pipeline events to dashboard
//! observers. No back-pressure, no replay: a slow or closed observer is
//! simply dropped, never allowed to stall a pipeline's own progress.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// `{type, projectId, payload:{status?, iteration?, currentTask?, message,
/// prd?, timestamp}}` — the observer-facing envelope shape. Kept as a flat
/// struct for ergonomic construction in the pipeline; `Serialize` nests the
/// fields under `payload` to match the wire contract.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub envelope_type: String,
    pub project_id: String,
    pub status: Option<String>,
    pub iteration: Option<u32>,
    pub current_task: Option<String>,
    pub message: String,
    pub prd: Option<Value>,
    pub timestamp: String,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Envelope", 3)?;
        state.serialize_field("type", &self.envelope_type)?;
        state.serialize_field("projectId", &self.project_id)?;
        state.serialize_field(
            "payload",
            &serde_json::json!({
                "status": self.status,
                "iteration": self.iteration,
                "currentTask": self.current_task,
                "message": self.message,
                "prd": self.prd,
                "timestamp": self.timestamp,
            }),
        )?;
        state.end()
    }
}

const CHANNEL_CAPACITY: usize = 256;

/// Process-wide observer channel. Cheap to clone; every clone shares the
/// same underlying sender.
#[derive(Clone)]
pub struct Broadcast {
    sender: broadcast::Sender<Envelope>,
}

impl Default for Broadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcast {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Deliver an envelope to every current observer. Best-effort: if
    /// there are no observers (or the lagging ones have been dropped),
    /// this is a no-op rather than an error.
    pub fn send(&self, envelope: Envelope) {
        if self.sender.send(envelope).is_err() {
            debug!("broadcast: no active observers");
        }
    }

    /// A fresh receiver for a newly connected observer (e.g. a WS client).
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn envelope(project_id: &str, message: &str) -> Envelope {
        Envelope {
            envelope_type: "status".to_string(),
            project_id: project_id.to_string(),
            status: None,
            iteration: None,
            current_task: None,
            message: message.to_string(),
            prd: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn send_with_no_observers_does_not_panic() {
        let broadcast = Broadcast::new();
        broadcast.send(envelope("p1", "hello"));
    }

    #[tokio::test]
    async fn subscribed_observer_receives_envelope() {
        let broadcast = Broadcast::new();
        let mut receiver = broadcast.subscribe();
        broadcast.send(envelope("p1", "hello"));
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.project_id, "p1");
        assert_eq!(received.message, "hello");
    }

    #[tokio::test]
    async fn closed_observer_is_pruned_on_next_send() {
        let broadcast = Broadcast::new();
        {
            let _receiver = broadcast.subscribe();
        }
        // Dropped receiver; a subsequent send to zero live receivers must
        // not error the caller.
        broadcast.send(envelope("p1", "hello"));
    }
}
