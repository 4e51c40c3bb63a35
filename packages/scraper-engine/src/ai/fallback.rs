//! Escalation from the deterministic tier to AI extraction.
//!
//! AI is strictly a fallback: slower, nondeterministic, and billed per
//! call. Every invocation passes the guard first (breaker, page budget),
//! and every response passes a confidence gate plus a validation pass
//! before its fields are trusted. A well-formed answer for the wrong
//! product variant is a failure, not a success.

use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use crate::context::ScraperContext;
use crate::error::{AiError, EngineError, Result};
use crate::events::{AiSkipReason, EngineEvent};
use crate::traits::{AiExtraction, AiRequest};

use super::guard::{self, Admission};

/// Minimum variant-token overlap for an AI answer to be considered the
/// same product as the target.
const VARIANT_MATCH_THRESHOLD: f64 = 0.8;

/// What the escalation attempt produced.
#[derive(Debug, Clone)]
pub enum AiOutcome {
    /// Extraction passed every gate; fields are safe to merge.
    Accepted {
        fields: IndexMap<String, Value>,
        confidence: f64,
        cost_usd: f64,
    },
    /// The call was made but the answer was not trusted. Cost was still
    /// incurred and the failure counted toward the breaker.
    Rejected { reason: String, cost_usd: f64 },
    /// The call was never made.
    Skipped { reason: AiSkipReason },
}

/// Decide whether AI extraction may run for the given fields, run it if
/// so, and validate the answer. Never returns an error for provider
/// failures; those become [`AiOutcome::Rejected`] so the workflow can
/// continue with whatever deterministic data exists. Only cancellation
/// propagates as an error.
pub async fn maybe_escalate(
    ctx: &mut ScraperContext,
    fields: &[String],
    threshold_override: Option<f64>,
) -> Result<AiOutcome> {
    ctx.check_cancelled()?;

    let (provider, ai_config) = match (ctx.ai.clone(), ctx.config.ai.clone()) {
        (Some(p), Some(c)) => (p, c),
        _ => {
            ctx.emit(EngineEvent::AiSkipped {
                reason: AiSkipReason::NotConfigured,
            });
            return Ok(AiOutcome::Skipped {
                reason: AiSkipReason::NotConfigured,
            });
        }
    };

    let site = ctx.config.name.clone();
    match ctx.guard.admit(&site, ai_config.cost_ceiling_usd) {
        Admission::BreakerOpen => {
            tracing::warn!(site, "AI breaker open, skipping escalation");
            ctx.emit(EngineEvent::AiSkipped {
                reason: AiSkipReason::BreakerOpen,
            });
            return Ok(AiOutcome::Skipped {
                reason: AiSkipReason::BreakerOpen,
            });
        }
        Admission::BudgetExceeded => {
            tracing::warn!(
                site,
                spend = ctx.guard.page_spend(&site),
                ceiling = ai_config.cost_ceiling_usd,
                "AI page budget exhausted, skipping escalation"
            );
            ctx.emit(EngineEvent::AiSkipped {
                reason: AiSkipReason::BudgetExceeded,
            });
            return Ok(AiOutcome::Skipped {
                reason: AiSkipReason::BudgetExceeded,
            });
        }
        Admission::Permitted { trial } => {
            if trial {
                tracing::info!(site, "breaker half-open, permitting one trial call");
            }
        }
    }

    let page_url = match ctx.browser.current_url().await {
        Ok(url) => url,
        Err(_) => ctx.substitute(&ctx.config.base_url),
    };
    let known_fields: IndexMap<String, Value> = ctx
        .results
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let request = AiRequest {
        task: ai_config.task.clone(),
        model: ai_config.model.clone(),
        page_url,
        target_id: ctx.target_id.clone(),
        fields: fields.to_vec(),
        known_fields,
        max_steps: ai_config.max_steps,
    };

    ctx.emit(EngineEvent::AiInvoked {
        model: ai_config.model.clone(),
        fields: fields.to_vec(),
    });

    let call_timeout = Duration::from_secs(ai_config.timeout_secs);
    let response = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
        outcome = tokio::time::timeout(call_timeout, provider.extract(&request)) => {
            match outcome {
                Err(_) => Err(AiError::Timeout {
                    timeout_secs: ai_config.timeout_secs,
                }),
                Ok(inner) => inner,
            }
        }
    };

    let extraction = match response {
        Ok(extraction) => extraction,
        Err(err) => {
            return Ok(reject(ctx, &site, err.to_string(), None, 0.0));
        }
    };

    let cost_usd = guard::model_cost(&ai_config.model, extraction.usage);
    ctx.ai_spend_usd += cost_usd;

    let threshold = threshold_override.unwrap_or(ai_config.confidence_threshold);
    if extraction.confidence < threshold {
        let reason = format!(
            "confidence {:.2} below threshold {:.2}",
            extraction.confidence, threshold
        );
        return Ok(reject(ctx, &site, reason, Some(extraction.confidence), cost_usd));
    }

    if let Some(field) = first_unfilled_required(&ai_config.required_fields, ctx, &extraction) {
        let reason = format!("required field '{field}' still missing after extraction");
        return Ok(reject(ctx, &site, reason, Some(extraction.confidence), cost_usd));
    }

    if let Some(score) = variant_mismatch(&ctx.target_id, &extraction) {
        let reason = format!(
            "variant mismatch: token overlap {score:.2} below {VARIANT_MATCH_THRESHOLD:.2}"
        );
        return Ok(reject(ctx, &site, reason, Some(extraction.confidence), cost_usd));
    }

    if ctx.guard.record_success(&site, cost_usd) {
        ctx.emit(EngineEvent::BreakerClosed { site: site.clone() });
    }
    ctx.emit(EngineEvent::AiAccepted {
        confidence: extraction.confidence,
        cost_usd,
        fields: extraction.fields.keys().cloned().collect(),
    });
    Ok(AiOutcome::Accepted {
        fields: extraction.fields,
        confidence: extraction.confidence,
        cost_usd,
    })
}

fn reject(
    ctx: &mut ScraperContext,
    site: &str,
    reason: String,
    confidence: Option<f64>,
    cost_usd: f64,
) -> AiOutcome {
    let outcome = ctx.guard.record_failure(site, cost_usd);
    tracing::warn!(
        site,
        reason,
        consecutive_failures = outcome.consecutive_failures,
        "AI extraction rejected"
    );
    ctx.emit(EngineEvent::AiRejected {
        reason: reason.clone(),
        confidence,
        cost_usd,
    });
    if outcome.opened {
        ctx.emit(EngineEvent::BreakerOpened {
            site: site.to_string(),
            consecutive_failures: outcome.consecutive_failures,
            cooldown_secs: outcome.cooldown_secs,
        });
    }
    AiOutcome::Rejected { reason, cost_usd }
}

/// First configured required field that is empty in both the
/// deterministic results and the AI answer.
fn first_unfilled_required(
    required: &[String],
    ctx: &ScraperContext,
    extraction: &AiExtraction,
) -> Option<String> {
    required
        .iter()
        .find(|field| {
            let from_ai = extraction.fields.get(*field).map(non_empty).unwrap_or(false);
            let from_results = ctx.results.get(*field).map(non_empty).unwrap_or(false);
            !from_ai && !from_results
        })
        .cloned()
}

fn non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Check the AI answer's product identifier against the target's known
/// tokens. Returns the failing score when the answer looks like a
/// different variant; `None` means no evidence of mismatch (including
/// the case where the answer carries nothing comparable).
fn variant_mismatch(target_id: &str, extraction: &AiExtraction) -> Option<f64> {
    let candidate = ["sku", "model", "mpn", "product_id"]
        .iter()
        .find_map(|key| extraction.fields.get(*key).and_then(|v| v.as_str()))?;
    let score = variant_match(target_id, candidate);
    (score < VARIANT_MATCH_THRESHOLD).then_some(score)
}

/// Fraction of the target identifier's tokens present in the candidate
/// string. Tokens are maximal alphanumeric runs, compared
/// case-insensitively; size/color/form suffixes that differ pull the
/// score down because their tokens go unmatched.
pub fn variant_match(target_id: &str, candidate: &str) -> f64 {
    let target_tokens = tokens(target_id);
    if target_tokens.is_empty() {
        return 1.0;
    }
    let candidate_tokens = tokens(candidate);
    let matched = target_tokens
        .iter()
        .filter(|t| candidate_tokens.contains(*t))
        .count();
    matched as f64 / target_tokens.len() as f64
}

fn tokens(value: &str) -> Vec<String> {
    value
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
