//! Event types for streaming run progress
//!
//! Events are sent from the engine to any consumer (logger, UI, test) to
//! report node progress, streamed output, and run outcome. Sinks are
//! invoked synchronously and must not block; forward to a channel instead.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Trait for receiving run events
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Progress status reported for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    Starting,
    Completed,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Completed => "completed",
        }
    }
}

/// Events emitted during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// Run started
    #[serde(rename_all = "camelCase")]
    RunStarted {
        execution_id: String,
        root_id: String,
    },

    /// A node is starting or has completed
    #[serde(rename_all = "camelCase")]
    NodeProgress {
        node_id: String,
        status: NodeStatus,
        depth: usize,
    },

    /// A node failed
    #[serde(rename_all = "camelCase")]
    NodeFailed { node_id: String, error: String },

    /// A line of streamed output from a node
    #[serde(rename_all = "camelCase")]
    NodeOutput { node_id: String, line: String },

    /// Run completed successfully
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        execution_id: String,
        nodes_executed: usize,
        elapsed_ms: u64,
    },

    /// Run failed
    #[serde(rename_all = "camelCase")]
    RunFailed {
        execution_id: String,
        error: String,
        nodes_executed: usize,
        elapsed_ms: u64,
    },

    /// Run was cancelled or hit its deadline
    #[serde(rename_all = "camelCase")]
    RunCancelled {
        execution_id: String,
        nodes_executed: usize,
        elapsed_ms: u64,
    },
}

impl WorkflowEvent {
    /// Create a node progress event
    pub fn progress(node_id: &str, status: NodeStatus, depth: usize) -> Self {
        Self::NodeProgress {
            node_id: node_id.to_string(),
            status,
            depth,
        }
    }

    /// Create a node output event
    pub fn output(node_id: &str, line: impl Into<String>) -> Self {
        Self::NodeOutput {
            node_id: node_id.to_string(),
            line: line.into(),
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// `(node_id, status)` pairs of every progress event, in order
    pub fn progress(&self) -> Vec<(String, NodeStatus)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                WorkflowEvent::NodeProgress { node_id, status, .. } => Some((node_id, status)),
                _ => None,
            })
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        let mut events = self.events.lock().map_err(|_| EventError {
            message: "Event buffer poisoned".to_string(),
        })?;
        events.push(event);
        Ok(())
    }
}

/// Forwards events into an unbounded channel so the engine never waits on
/// the consumer
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::channel_closed())
    }
}
