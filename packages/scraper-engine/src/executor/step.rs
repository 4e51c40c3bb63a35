//! Single-step execution with retry and backoff.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::actions::{ActionOutcome, ActionParams, ActionRegistry};
use crate::context::ScraperContext;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::types::WorkflowStep;

use super::debug;

/// Backoff tuning for retryable step failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the base after an anti-bot detection
    pub anti_bot_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            anti_bot_factor: 4,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `next_attempt` (2-based; attempt 1 never
    /// waits). Exponential with additive jitter of at most 50%, so the
    /// jittered delay for attempt n never exceeds the unjittered delay
    /// for attempt n+1 and the sequence never decreases.
    pub fn delay_before(&self, next_attempt: u32, anti_bot: bool) -> Duration {
        let base = if anti_bot {
            self.base_delay * self.anti_bot_factor
        } else {
            self.base_delay
        };
        let exponent = next_attempt.saturating_sub(2).min(16);
        let unjittered = base.saturating_mul(1u32 << exponent);
        if unjittered >= self.max_delay {
            // Once capped, stay deterministic so the sequence of delays
            // never decreases between late attempts.
            return self.max_delay;
        }
        let jitter = unjittered.mul_f64(fastrand::f64() * 0.5);
        (unjittered + jitter).min(self.max_delay)
    }
}

/// Result of one step, successful or exhausted.
#[derive(Debug)]
pub struct StepReport {
    pub outcome: ActionOutcome,
    pub attempts: u32,
}

/// Run one workflow step to completion: dispatch, retry retryable
/// failures with backoff, and emit the step lifecycle events. A
/// returned error means the step failed after its final attempt (or
/// failed non-retryably) and has already been recorded in the context.
pub async fn run_step(
    step_index: usize,
    step: &WorkflowStep,
    registry: &ActionRegistry,
    ctx: &mut ScraperContext,
    policy: &RetryPolicy,
) -> Result<StepReport> {
    let max_attempts = step.retries.unwrap_or(ctx.config.retries).max(1);
    ctx.emit(EngineEvent::StepStarted {
        step_index,
        action: step.action.clone(),
        name: step.name.clone(),
    });
    let started = Instant::now();

    let params = ActionParams::new(step.action.clone(), substitute_params(ctx, &step.params));

    let mut attempt: u32 = 1;
    loop {
        ctx.check_cancelled()?;

        match registry.dispatch(&step.action, &params, ctx).await {
            Ok(outcome) => {
                ctx.emit(EngineEvent::StepCompleted {
                    step_index,
                    action: step.action.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    retry_count: attempt - 1,
                });
                return Ok(StepReport { outcome, attempts: attempt });
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_before(attempt + 1, err.is_anti_bot());
                tracing::warn!(
                    step_index,
                    action = %step.action,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "step failed, retrying"
                );
                ctx.emit(EngineEvent::StepRetrying {
                    step_index,
                    action: step.action.clone(),
                    attempt,
                    max_attempts,
                    delay_ms: delay.as_millis() as u64,
                    error: err.to_string(),
                });
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => {
                let retryable = err.is_retryable();
                tracing::error!(
                    step_index,
                    action = %step.action,
                    attempts = attempt,
                    error = %err,
                    "step failed"
                );
                ctx.emit(EngineEvent::StepFailed {
                    step_index,
                    action: step.action.clone(),
                    error: err.to_string(),
                    retryable,
                    attempts: attempt,
                });
                ctx.record_step_error(step_index, &step.action, &err, retryable);
                debug::capture_failure(ctx, step_index, &step.action).await;
                return Err(err);
            }
        }
    }
}

/// Substitute placeholders in every string parameter, recursively
/// through arrays and objects. Selector names and field maps pass
/// through untouched unless they carry placeholders themselves.
fn substitute_params(ctx: &ScraperContext, params: &Map<String, Value>) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), substitute_value(ctx, v)))
        .collect()
}

fn substitute_value(ctx: &ScraperContext, value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(ctx.substitute(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(ctx, v)).collect()),
        Value::Object(map) => Value::Object(substitute_params(ctx, map)),
        other => other.clone(),
    }
}
