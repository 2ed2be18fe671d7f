use crate::language_detector::Language;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle notifications published by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    ServerStarted {
        language: Language,
        connection_id: Uuid,
    },
    ServerStopped {
        language: Language,
    },
    ServerRecovered {
        language: Language,
        connection_id: Uuid,
        restart_count: u32,
    },
    HealthCheckFailed {
        language: Language,
        connection_id: Uuid,
        reason: String,
    },
    RestartLimitReached {
        language: Language,
        connection_id: Uuid,
        restart_count: u32,
    },
    DocumentChanged {
        language: Language,
        uri: String,
    },
}

impl SupervisorEvent {
    pub fn language(&self) -> Language {
        match self {
            SupervisorEvent::ServerStarted { language, .. }
            | SupervisorEvent::ServerStopped { language }
            | SupervisorEvent::ServerRecovered { language, .. }
            | SupervisorEvent::HealthCheckFailed { language, .. }
            | SupervisorEvent::RestartLimitReached { language, .. }
            | SupervisorEvent::DocumentChanged { language, .. } => *language,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: SupervisorEvent) {
        tracing::trace!("Supervisor event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        bus.publish(SupervisorEvent::ServerStopped {
            language: Language::Go,
        });

        let mut rx = bus.subscribe();
        bus.publish(SupervisorEvent::DocumentChanged {
            language: Language::Go,
            uri: "file:///main.go".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.language(), Language::Go);
        assert!(matches!(event, SupervisorEvent::DocumentChanged { .. }));
    }
}
