//! Top-level workflow execution: one run, one target, one result.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::actions::{ActionOutcome, ActionRegistry};
use crate::ai::AiGuard;
use crate::context::ScraperContext;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink, NullSink};
use crate::normalize;
use crate::traits::{AiProvider, Browser};
use crate::types::{RunMetadata, ScrapeResult, ScraperConfig};

use super::step::{self, RetryPolicy};

/// Runs validated configurations against browser sessions.
///
/// One executor serves many concurrent runs; the action registry, event
/// sink, and AI guard are shared, while each run gets its own context.
/// `run` is infallible by design: every failure mode lands in the
/// returned [`ScrapeResult`] so the caller always has the full picture
/// of what happened.
pub struct WorkflowExecutor {
    registry: Arc<ActionRegistry>,
    guard: Arc<AiGuard>,
    events: Arc<dyn EventSink>,
    ai: Option<Arc<dyn AiProvider>>,
    retry: RetryPolicy,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<ActionRegistry>, guard: Arc<AiGuard>) -> Self {
        Self {
            registry,
            guard,
            events: Arc::new(NullSink),
            ai: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Inject an event sink. Swappable for testing and dashboards.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Wire in the AI completion capability for fallback extraction.
    pub fn with_ai(mut self, ai: Arc<dyn AiProvider>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute the configured workflow for one target.
    ///
    /// The browser session is released on every exit path, including
    /// cancellation. The status invariant holds unconditionally: a
    /// result is `Completed` only when every required field resolved.
    pub async fn run(
        &self,
        config: Arc<ScraperConfig>,
        target_id: &str,
        browser: Arc<dyn Browser>,
        cancel: CancellationToken,
    ) -> ScrapeResult {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let started = Instant::now();

        self.guard.begin_page(&config.name);
        let mut ctx = ScraperContext::new(
            run_id,
            target_id.to_string(),
            config.clone(),
            browser.clone(),
            self.events.clone(),
            self.ai.clone(),
            self.guard.clone(),
            cancel,
        );

        let total_steps = config.workflow.len();
        ctx.emit(EngineEvent::RunStarted { total_steps });
        tracing::info!(
            scraper = %config.name,
            target_id,
            %run_id,
            total_steps,
            "run started"
        );

        let (steps_executed, retry_total, fatal, cancelled) = self.run_steps(&mut ctx).await;

        // Required fields that no step ever touched still count missing.
        for field in config.required_fields() {
            let filled = ctx
                .results
                .get(field)
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !filled {
                ctx.mark_missing_required(field);
            }
        }

        let record = normalize::canonicalize(&ctx.results, &config);
        let status = ScrapeResult::derive_status(
            ctx.missing_required(),
            ctx.missing_optional(),
            fatal || cancelled,
        );
        let duration_ms = started.elapsed().as_millis() as u64;

        if cancelled {
            ctx.emit(EngineEvent::RunCancelled);
            tracing::warn!(%run_id, target_id, "run cancelled");
        } else if fatal {
            let error = ctx
                .step_errors
                .last()
                .map(|e| e.error.clone())
                .unwrap_or_else(|| "step failure".to_string());
            ctx.emit(EngineEvent::RunFailed { error });
        } else {
            ctx.emit(EngineEvent::RunCompleted {
                status,
                duration_ms,
                fields_extracted: ctx.results.len(),
                missing_fields: ctx.missing_required().to_vec(),
            });
        }
        tracing::info!(
            %run_id,
            target_id,
            ?status,
            duration_ms,
            steps_executed,
            "run finished"
        );

        // Every exit path above converges here; the session is always released.
        browser.close().await;

        ScrapeResult {
            run_id,
            scraper: config.name.clone(),
            target_id: target_id.to_string(),
            status,
            record,
            raw_fields: ctx.results.clone(),
            missing_fields: ctx.missing_required().to_vec(),
            missing_optional: ctx.missing_optional().to_vec(),
            provenance: ctx.provenance.clone(),
            step_errors: ctx.step_errors.clone(),
            metadata: RunMetadata {
                started_at,
                duration_ms,
                steps_executed,
                total_steps,
                retry_total,
                ai_spend_usd: ctx.ai_spend_usd,
            },
        }
    }

    /// Iterate the steps. Returns (steps executed, total retries, fatal
    /// failure, cancelled).
    async fn run_steps(&self, ctx: &mut ScraperContext) -> (usize, u32, bool, bool) {
        let workflow = ctx.config.workflow.clone();
        let mut steps_executed = 0;
        let mut retry_total = 0;

        if let Some(anti) = &ctx.config.anti_detection {
            if anti.rotate_user_agent {
                if let Err(err) = ctx.browser.rotate_user_agent().await {
                    tracing::debug!(%err, "user-agent rotation unavailable");
                }
            }
            let span = anti.max_delay_ms.saturating_sub(anti.min_delay_ms);
            let delay = anti.min_delay_ms + fastrand::u64(0..=span);
            if delay > 0 {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return (0, 0, false, true),
                    _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                }
            }
        }

        for (step_index, workflow_step) in workflow.iter().enumerate() {
            if ctx.is_stopped() {
                tracing::info!(step_index, "workflow stopped early, skipping remaining steps");
                break;
            }
            match step::run_step(step_index, workflow_step, &self.registry, ctx, &self.retry).await
            {
                Ok(report) => {
                    steps_executed += 1;
                    retry_total += report.attempts - 1;
                    if matches!(report.outcome, ActionOutcome::StopWorkflow) {
                        break;
                    }
                }
                Err(EngineError::Cancelled) => {
                    return (steps_executed, retry_total, false, true);
                }
                Err(_) => {
                    // Already recorded and emitted by the step layer.
                    steps_executed += 1;
                    return (steps_executed, retry_total, true, false);
                }
            }
        }
        (steps_executed, retry_total, false, false)
    }
}
