//! Resolution lifecycle events for the notification collaborator.
//!
//! Delivery is fire-and-forget over a broadcast channel; the engine never
//! waits on acknowledgement and a missing subscriber is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::ConsensusMethod;

/// Lifecycle events emitted during a resolution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResolutionEvent {
    Started {
        subject_id: String,
        attempt_id: Uuid,
    },
    EvidenceCollected {
        subject_id: String,
        count: usize,
    },
    ResponsesGenerated {
        subject_id: String,
        count: usize,
    },
    ConsensusFormed {
        subject_id: String,
        outcome: String,
        method: ConsensusMethod,
        confidence: f64,
    },
    Completed {
        subject_id: String,
        outcome: String,
        settlement_ref: Option<String>,
    },
    Failed {
        subject_id: String,
        error: String,
    },
    DisputeResolved {
        subject_id: String,
        outcome: String,
    },
}

impl ResolutionEvent {
    pub fn subject_id(&self) -> &str {
        match self {
            ResolutionEvent::Started { subject_id, .. }
            | ResolutionEvent::EvidenceCollected { subject_id, .. }
            | ResolutionEvent::ResponsesGenerated { subject_id, .. }
            | ResolutionEvent::ConsensusFormed { subject_id, .. }
            | ResolutionEvent::Completed { subject_id, .. }
            | ResolutionEvent::Failed { subject_id, .. }
            | ResolutionEvent::DisputeResolved { subject_id, .. } => subject_id,
        }
    }
}

/// Fire-and-forget event publisher.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<ResolutionEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResolutionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped silently when nobody listens.
    pub fn emit(&self, event: ResolutionEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(128)
    }
}
