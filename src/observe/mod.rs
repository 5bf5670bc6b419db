//! Observability side channel.
//!
//! Every terminal dispatch outcome, success or failure, emits exactly one
//! `ExecutionEvent` to an injected sink. The default sink logs through
//! `tracing`; tests inject a capturing sink and assert on the records.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ErrorKind;

/// Terminal outcome of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
}

/// One structured record per terminal dispatch outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionEvent {
    pub tool: String,
    pub caller: String,
    pub request_id: String,
    /// Attempts actually made; zero when the call failed before the first
    /// network attempt (unknown tool, rate limit, invalid input).
    pub attempts: u32,
    pub latency: Duration,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

/// Collaborator receiving execution events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: ExecutionEvent);
}

/// Default sink: structured log lines via `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: ExecutionEvent) {
        match event.outcome {
            Outcome::Success => info!(
                tool = %event.tool,
                caller = %event.caller,
                request_id = %event.request_id,
                attempts = event.attempts,
                latency_ms = event.latency.as_millis() as u64,
                "dispatch succeeded"
            ),
            Outcome::Failure(kind) => warn!(
                tool = %event.tool,
                caller = %event.caller,
                request_id = %event.request_id,
                attempts = event.attempts,
                latency_ms = event.latency.as_millis() as u64,
                kind = %kind,
                "dispatch failed"
            ),
        }
    }
}

/// Capturing sink for tests.
#[derive(Debug, Default)]
pub struct VecSink {
    events: std::sync::Mutex<Vec<ExecutionEvent>>,
}

impl VecSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().expect("event sink lock poisoned").clone()
    }
}

impl EventSink for VecSink {
    fn record(&self, event: ExecutionEvent) {
        self.events
            .lock()
            .expect("event sink lock poisoned")
            .push(event);
    }
}
