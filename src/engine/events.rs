//! # Engine Events
//!
//! Broadcast bus for task, step and resource lifecycle events. Publishing
//! never blocks and never fails for lack of subscribers; slow subscribers
//! lose the oldest events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::constants::defaults;

#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub name: String,
    pub task_id: Option<Uuid>,
    pub step_id: Option<String>,
    pub context: Value,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EngineEventPublisher {
    sender: broadcast::Sender<EngineEvent>,
}

impl EngineEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, name: impl Into<String>, context: Value) {
        self.send(EngineEvent {
            name: name.into(),
            task_id: None,
            step_id: None,
            context,
            published_at: Utc::now(),
        });
    }

    pub fn publish_task(&self, name: impl Into<String>, task_id: Uuid, context: Value) {
        self.send(EngineEvent {
            name: name.into(),
            task_id: Some(task_id),
            step_id: None,
            context,
            published_at: Utc::now(),
        });
    }

    pub fn publish_step(
        &self,
        name: impl Into<String>,
        task_id: Uuid,
        step_id: impl Into<String>,
        context: Value,
    ) {
        self.send(EngineEvent {
            name: name.into(),
            task_id: Some(task_id),
            step_id: Some(step_id.into()),
            context,
            published_at: Utc::now(),
        });
    }

    fn send(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EngineEventPublisher {
    fn default() -> Self {
        Self::new(defaults::EVENT_CHANNEL_CAPACITY)
    }
}
