//! Typed telemetry events for every lifecycle transition.
//!
//! Events are immutable facts about what happened: emitted once, never
//! mutated. The sink is always present: callers that do not want
//! telemetry get [`NullSink`] rather than an `Option` guarded at every
//! call site. Each event is a complete, independently consumable unit, so
//! a concurrent append-only sink needs no cross-event ordering guarantee
//! beyond per-run chronological order by timestamp.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ScrapeStatus;

/// Telemetry schema version carried on every envelope.
pub const EVENT_SCHEMA_VERSION: u32 = 2;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Why the AI tier was skipped without being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiSkipReason {
    BreakerOpen,
    BudgetExceeded,
    NotConfigured,
}

/// Events produced by the engine (facts about what happened).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    // ========================================================================
    // Run lifecycle
    // ========================================================================
    RunStarted {
        total_steps: usize,
    },

    RunCompleted {
        status: ScrapeStatus,
        duration_ms: u64,
        fields_extracted: usize,
        missing_fields: Vec<String>,
    },

    RunFailed {
        error: String,
    },

    RunCancelled,

    // ========================================================================
    // Step lifecycle
    // ========================================================================
    StepStarted {
        step_index: usize,
        action: String,
        name: Option<String>,
    },

    StepRetrying {
        step_index: usize,
        action: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },

    StepCompleted {
        step_index: usize,
        action: String,
        duration_ms: u64,
        retry_count: u32,
    },

    StepFailed {
        step_index: usize,
        action: String,
        error: String,
        retryable: bool,
        attempts: u32,
    },

    // ========================================================================
    // Selector / extraction
    // ========================================================================
    SelectorResolved {
        name: String,
        found: bool,
        count: usize,
        attribute: Option<String>,
    },

    FieldExtracted {
        field: String,
        found: bool,
        tier: crate::types::Tier,
    },

    // ========================================================================
    // AI fallback
    // ========================================================================
    AiInvoked {
        model: String,
        fields: Vec<String>,
    },

    AiAccepted {
        confidence: f64,
        cost_usd: f64,
        fields: Vec<String>,
    },

    AiRejected {
        reason: String,
        confidence: Option<f64>,
        cost_usd: f64,
    },

    AiSkipped {
        reason: AiSkipReason,
    },

    BreakerOpened {
        site: String,
        consecutive_failures: u32,
        cooldown_secs: u64,
    },

    BreakerClosed {
        site: String,
    },

    // ========================================================================
    // Debugging
    // ========================================================================
    DebugCaptured {
        step_index: usize,
        action: String,
        url: Option<String>,
        has_screenshot: bool,
        /// Markup snapshot at failure time, capped so the event stream
        /// stays bounded
        page_source: Option<String>,
    },
}

impl EngineEvent {
    /// Default severity for this event type.
    pub fn severity(&self) -> Severity {
        match self {
            EngineEvent::RunFailed { .. } | EngineEvent::StepFailed { .. } => Severity::Error,
            EngineEvent::RunCancelled
            | EngineEvent::StepRetrying { .. }
            | EngineEvent::AiRejected { .. }
            | EngineEvent::AiSkipped { .. }
            | EngineEvent::BreakerOpened { .. } => Severity::Warn,
            EngineEvent::SelectorResolved { .. }
            | EngineEvent::FieldExtracted { .. }
            | EngineEvent::DebugCaptured { .. } => Severity::Debug,
            _ => Severity::Info,
        }
    }
}

/// The wire envelope around one event.
///
/// Consumers must tolerate unknown payload fields and absent optional
/// fields; the `schema_version` gates incompatible changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub schema_version: u32,
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub scraper: String,
    pub target: Option<String>,
    pub severity: Severity,
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl EventEnvelope {
    /// Wrap an event with correlation identifiers and the current time.
    pub fn new(run_id: Uuid, scraper: &str, target: Option<&str>, event: EngineEvent) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            timestamp: Utc::now(),
            run_id,
            scraper: scraper.to_string(),
            target: target.map(|t| t.to_string()),
            severity: event.severity(),
            event,
        }
    }
}

/// An append-only sink for engine events.
///
/// Implementations must be safe for concurrent emission from parallel
/// runs. Emission must never fail the run: sinks swallow their own errors.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EventEnvelope);
}

/// A sink that discards everything (telemetry disabled).
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EventEnvelope) {}
}

/// An in-memory sink for tests and dashboards.
#[derive(Debug, Default)]
pub struct BufferSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<EventEnvelope>> {
        // A panicked emitter leaves the buffer intact and still readable.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.lock().clone()
    }

    /// Count of events matching a predicate.
    pub fn count_matching(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| predicate(&e.event)).count()
    }
}

impl EventSink for BufferSink {
    fn emit(&self, event: EventEnvelope) {
        self.lock().push(event);
    }
}

/// A sink that forwards events to `tracing` at their severity.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EventEnvelope) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match event.severity {
            Severity::Debug => tracing::debug!(target: "scraper_engine::events", %payload),
            Severity::Info => tracing::info!(target: "scraper_engine::events", %payload),
            Severity::Warn => tracing::warn!(target: "scraper_engine::events", %payload),
            Severity::Error => tracing::error!(target: "scraper_engine::events", %payload),
        }
    }
}
