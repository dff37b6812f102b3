//! Typed lifecycle events and best-effort delivery.
//!
//! The pipeline narrates itself through a small set of event types with a
//! stable envelope schema. Delivery is best-effort: a sink failure is logged
//! and never fails the operation that emitted the event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::Result;

/// Application name stamped on every event.
pub const SOURCE_APP: &str = "sentinel-core";

/// Lifecycle event types the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineEventType {
    #[serde(rename = "predictor.ready")]
    PredictorReady,
    #[serde(rename = "prediction.created")]
    PredictionCreated,
    #[serde(rename = "prediction.refreshed")]
    PredictionRefreshed,
    #[serde(rename = "positions.created")]
    PositionsCreated,
}

impl std::fmt::Display for PipelineEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PredictorReady => "predictor.ready",
            Self::PredictionCreated => "prediction.created",
            Self::PredictionRefreshed => "prediction.refreshed",
            Self::PositionsCreated => "positions.created",
        };
        write!(f, "{}", s)
    }
}

/// Event envelope with the stable wire schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Correlation context, usually the target id.
    pub context: String,
    pub source_app: String,
    pub hook_event_type: PipelineEventType,
    pub status: String,
    pub message: String,
    /// Pipeline step that produced the event (`tier2.threshold`, …).
    pub step: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(
        event_type: PipelineEventType,
        context: impl Into<String>,
        step: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            context: context.into(),
            source_app: SOURCE_APP.to_string(),
            hook_event_type: event_type,
            status: "ok".to_string(),
            message: message.into(),
            step: step.into(),
            payload: Value::Null,
            timestamp,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }
}

/// Destination for pipeline events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn push(&self, event: PipelineEvent) -> Result<()>;
}

/// Emits events to a sink, swallowing (and logging) delivery failures.
pub struct EventBus {
    sink: std::sync::Arc<dyn EventSink>,
    clock: std::sync::Arc<dyn Clock>,
}

impl EventBus {
    pub fn new(sink: std::sync::Arc<dyn EventSink>, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Build and deliver an event. Never fails the caller.
    pub async fn emit(
        &self,
        event_type: PipelineEventType,
        context: &str,
        step: &str,
        message: impl Into<String>,
        payload: Value,
    ) {
        let event = PipelineEvent::new(event_type, context, step, message, self.clock.now())
            .with_payload(payload);
        if let Err(error) = self.sink.push(event).await {
            warn!(%event_type, context, %error, "event delivery failed");
        }
    }
}

/// Sink that logs every event through tracing. The default for embedders
/// that bring no bus of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn push(&self, event: PipelineEvent) -> Result<()> {
        info!(
            event_type = %event.hook_event_type,
            context = %event.context,
            step = %event.step,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Bounded in-memory sink for inspection and tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<VecDeque<PipelineEvent>>,
    capacity: usize,
}

impl MemoryEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// All retained events, oldest first.
    pub fn drain(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }

    /// Snapshot without draining.
    pub fn snapshot(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    /// Count of retained events of one type.
    pub fn count_of(&self, event_type: PipelineEventType) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.hook_event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn push(&self, event: PipelineEvent) -> Result<()> {
        let mut events = self.events.lock().unwrap();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }
}
