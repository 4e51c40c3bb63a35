//! Per-run mutable state threaded through every action invocation.
//!
//! The context is exclusively owned by one workflow executor and the
//! currently executing action; it is never shared across concurrent runs.
//! Actions get exactly the fields they need (results, page handle,
//! config, event sink) and nothing of the executor itself, so they cannot
//! bypass the registry or the retry layer.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::AiGuard;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventEnvelope, EventSink};
use crate::traits::{AiProvider, Browser, NavigationOutcome};
use crate::types::{ScraperConfig, Selector, StepError, Tier};

/// Mutable per-run state.
pub struct ScraperContext {
    pub run_id: Uuid,
    pub target_id: String,
    pub config: Arc<ScraperConfig>,

    /// Accumulated results, in insertion order; later steps may reference
    /// earlier extracted values
    pub results: IndexMap<String, Value>,

    /// Which tier produced each field
    pub provenance: IndexMap<String, Tier>,

    /// Required fields that resolved to not-found
    missing_required: Vec<String>,

    /// Optional fields that were requested but absent
    missing_optional: Vec<String>,

    /// Step failures captured for the final result
    pub step_errors: Vec<StepError>,

    /// Status and final URL of the most recent navigation; bookkeeping,
    /// kept out of `results` so it can never shadow an extracted field
    pub last_navigation: Option<NavigationOutcome>,

    pub browser: Arc<dyn Browser>,
    pub events: Arc<dyn EventSink>,
    pub ai: Option<Arc<dyn AiProvider>>,
    pub guard: Arc<AiGuard>,
    pub cancel: CancellationToken,

    /// Set by `conditional_skip`; remaining steps are skipped
    stopped: bool,

    /// AI spend accumulated during this run
    pub ai_spend_usd: f64,
}

impl ScraperContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run_id: Uuid,
        target_id: String,
        config: Arc<ScraperConfig>,
        browser: Arc<dyn Browser>,
        events: Arc<dyn EventSink>,
        ai: Option<Arc<dyn AiProvider>>,
        guard: Arc<AiGuard>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            target_id,
            config,
            results: IndexMap::new(),
            provenance: IndexMap::new(),
            missing_required: Vec::new(),
            missing_optional: Vec::new(),
            step_errors: Vec::new(),
            last_navigation: None,
            browser,
            events,
            ai,
            guard,
            cancel,
            stopped: false,
            ai_spend_usd: 0.0,
        }
    }

    /// Emit an event stamped with this run's correlation identifiers.
    pub fn emit(&self, event: EngineEvent) {
        self.events.emit(EventEnvelope::new(
            self.run_id,
            &self.config.name,
            Some(&self.target_id),
            event,
        ));
    }

    /// Record an extracted field with its provenance.
    pub fn record_field(&mut self, field: &str, value: Value, tier: Tier) {
        self.emit(EngineEvent::FieldExtracted {
            field: field.to_string(),
            found: !value.is_null(),
            tier,
        });
        self.results.insert(field.to_string(), value);
        self.provenance.insert(field.to_string(), tier);
        self.missing_required.retain(|f| f != field);
        self.missing_optional.retain(|f| f != field);
    }

    /// Record that a required field never resolved.
    pub fn mark_missing_required(&mut self, field: &str) {
        if !self.missing_required.iter().any(|f| f == field) {
            self.missing_required.push(field.to_string());
        }
    }

    /// Record that an optional field was requested but absent.
    pub fn mark_missing_optional(&mut self, field: &str) {
        if !self.missing_optional.iter().any(|f| f == field) {
            self.missing_optional.push(field.to_string());
        }
    }

    pub fn missing_required(&self) -> &[String] {
        &self.missing_required
    }

    pub fn missing_optional(&self) -> &[String] {
        &self.missing_optional
    }

    /// Capture a terminal step failure for the final result.
    pub fn record_step_error(
        &mut self,
        step_index: usize,
        action: &str,
        error: &EngineError,
        retryable: bool,
    ) {
        self.step_errors.push(StepError {
            step_index,
            action: action.to_string(),
            error: error.to_string(),
            retryable,
        });
    }

    /// Stop the workflow after the current step (conditional skip).
    pub fn stop_workflow(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Look up a selector from the owning config.
    pub fn selector(&self, name: &str) -> Option<&Selector> {
        self.config.selector(name)
    }

    /// Fail fast if the run-scoped cancellation signal fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Substitute `{placeholder}` tokens against the target id and
    /// accumulated results. Unknown placeholders are left untouched so a
    /// missing key never silently produces an empty URL.
    pub fn substitute(&self, template: &str) -> String {
        if !template.contains('{') {
            return template.to_string();
        }

        let mut out = template.replace("{sku}", &self.target_id);
        out = out.replace("{target_id}", &self.target_id);
        for (key, value) in &self.results {
            let token = format!("{{{key}}}");
            if out.contains(&token) {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                out = out.replace(&token, &rendered);
            }
        }
        out
    }

    /// String form of a previously extracted field, if present.
    pub fn result_str(&self, field: &str) -> Option<&str> {
        self.results.get(field).and_then(|v| v.as_str())
    }
}
