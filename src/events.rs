// SPDX-License-Identifier: GPL-3.0-only
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::sync::session::SessionState;

const DEFAULT_CAPACITY: usize = 256;

/// Operator-facing console line or status change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleEvent {
    Message {
        text: String,
    },
    StateChanged {
        state: SessionState,
    },
    OperationFinished {
        id: Uuid,
        description: String,
        success: bool,
        error: Option<String>,
    },
    Progress {
        description: String,
        done: u64,
        total: u64,
    },
    ProcessOutput {
        program: String,
        line: String,
    },
}

/// Fan-out of console events to every connected client
///
/// Publishing never blocks; with nobody listening the event is dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConsoleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ConsoleEvent) {
        if self.sender.send(event).is_err() {
            trace!("No console subscribers");
        }
    }

    pub fn message(&self, text: impl Into<String>) {
        self.publish(ConsoleEvent::Message { text: text.into() });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
