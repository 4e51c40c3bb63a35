//! AI-backed actions: fallback extraction, answer validation, and
//! candidate-URL search.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ai::{fallback, AiOutcome};
use crate::context::ScraperContext;
use crate::error::{ActionError, EngineError, Result};
use crate::events::AiSkipReason;
use crate::types::Tier;

use super::{Action, ActionOutcome, ActionParams};

/// Escalate missing fields to the AI tier.
///
/// Parameters:
/// - `fields`: field names to request (defaults to the AI config's
///   required fields, then to every required selector name)
/// - `confidence_threshold`: per-step override of the config threshold
///
/// A skipped or rejected escalation is not a step failure: the fields
/// that remain empty are flagged missing and the workflow continues, so
/// the final result is explicitly incomplete rather than erroring out
/// mid-run.
pub struct AiExtractAction;

#[async_trait]
impl Action for AiExtractAction {
    fn name(&self) -> &'static str {
        "ai_extract"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        let mut fields = params.str_list("fields")?;
        if fields.is_empty() {
            if let Some(ai) = &ctx.config.ai {
                fields = ai.required_fields.clone();
            }
        }
        if fields.is_empty() {
            fields = ctx
                .config
                .required_fields()
                .into_iter()
                .map(str::to_string)
                .collect();
        }
        if fields.is_empty() {
            return Err(EngineError::Action(ActionError::MalformedParams {
                action: "ai_extract".into(),
                reason: "no fields to extract and none configured".into(),
            }));
        }

        let threshold = params.f64("confidence_threshold");
        let outcome = fallback::maybe_escalate(ctx, &fields, threshold).await?;

        match outcome {
            AiOutcome::Accepted {
                fields: extracted, ..
            } => {
                for (field, value) in extracted {
                    // The deterministic tier wins; AI only fills gaps.
                    let already_filled = ctx
                        .results
                        .get(&field)
                        .map(|v| !value_is_empty(v))
                        .unwrap_or(false);
                    if !already_filled && !value_is_empty(&value) {
                        ctx.record_field(&field, value, Tier::Ai);
                    }
                }
                mark_unfilled(ctx, &fields);
                Ok(ActionOutcome::Continue)
            }
            AiOutcome::Rejected { .. } | AiOutcome::Skipped { .. } => {
                mark_unfilled(ctx, &fields);
                Ok(ActionOutcome::Continue)
            }
        }
    }
}

fn value_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn mark_unfilled(ctx: &mut ScraperContext, requested: &[String]) {
    let required: Vec<String> = required_field_names(ctx);
    let unfilled: Vec<String> = requested
        .iter()
        .filter(|f| {
            ctx.results
                .get(*f)
                .map(value_is_empty)
                .unwrap_or(true)
        })
        .cloned()
        .collect();
    for field in unfilled {
        if required.iter().any(|r| r == &field) {
            ctx.mark_missing_required(&field);
        } else {
            ctx.mark_missing_optional(&field);
        }
    }
}

fn required_field_names(ctx: &ScraperContext) -> Vec<String> {
    let mut names: Vec<String> = ctx
        .config
        .required_fields()
        .into_iter()
        .map(str::to_string)
        .collect();
    if let Some(ai) = &ctx.config.ai {
        for field in &ai.required_fields {
            if !names.contains(field) {
                names.push(field.clone());
            }
        }
    }
    names
}

/// Validate the accumulated results against a required-field checklist
/// and, optionally, the target identifier's variant tokens.
///
/// Writes a `validation` object into the results. With `strict: true`
/// a failed validation fails the step; otherwise the verdict is
/// recorded and the workflow continues.
pub struct AiValidateAction;

#[async_trait]
impl Action for AiValidateAction {
    fn name(&self) -> &'static str {
        "ai_validate"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;

        let mut checklist = params.str_list("required_fields")?;
        if checklist.is_empty() {
            checklist = required_field_names(ctx);
        }

        let missing: Vec<String> = checklist
            .iter()
            .filter(|f| {
                ctx.results
                    .get(*f)
                    .map(value_is_empty)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        let sku_field = params.str("sku_field").unwrap_or("sku");
        let variant_score = if params.bool_or("sku_must_match", true) {
            ctx.result_str(sku_field)
                .map(|candidate| fallback::variant_match(&ctx.target_id, candidate))
        } else {
            None
        };
        let variant_ok = variant_score.map(|s| s >= 0.8).unwrap_or(true);

        let passed = missing.is_empty() && variant_ok;
        let report = json!({
            "passed": passed,
            "missing": missing,
            "variant_score": variant_score,
        });
        ctx.record_field("validation", report, Tier::Deterministic);

        for field in &missing {
            ctx.mark_missing_required(field);
        }

        if !passed {
            tracing::warn!(
                target_id = %ctx.target_id,
                missing = missing.len(),
                variant_ok,
                "result validation failed"
            );
            if params.bool_or("strict", false) {
                return Err(EngineError::Action(ActionError::Failed {
                    action: "ai_validate".into(),
                    reason: if variant_ok {
                        format!("missing required fields: {}", missing.join(", "))
                    } else {
                        "extracted result does not match target variant".to_string()
                    },
                }));
            }
        }
        Ok(ActionOutcome::Continue)
    }
}

/// Ask the provider for candidate product-page URLs.
///
/// Parameters: `query` (template, placeholders substituted), `top_n`
/// (default 5), `store_as` (default `candidate_urls`).
pub struct AiSearchAction;

#[async_trait]
impl Action for AiSearchAction {
    fn name(&self) -> &'static str {
        "ai_search"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;

        let provider = match ctx.ai.clone() {
            Some(p) => p,
            None => {
                ctx.emit(crate::events::EngineEvent::AiSkipped {
                    reason: AiSkipReason::NotConfigured,
                });
                return Ok(ActionOutcome::Continue);
            }
        };

        let query = ctx.substitute(params.require_str("query")?);
        let top_n = params.u64_or("top_n", 5) as usize;
        let store_as = params.str("store_as").unwrap_or("candidate_urls").to_string();

        let urls = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = provider.search(&query, top_n) => result?,
        };

        tracing::debug!(query = %query, count = urls.len(), "search returned candidates");
        ctx.record_field(
            &store_as,
            Value::Array(urls.into_iter().map(Value::String).collect()),
            Tier::Ai,
        );
        Ok(ActionOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, sample_config, MockAi, MockBrowser};
    use crate::traits::{AiExtraction, TokenUsage};
    use crate::types::AiConfig;
    use indexmap::IndexMap;

    fn params(action: &str, value: Value) -> ActionParams {
        let map = match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        };
        ActionParams::new(action, map)
    }

    fn confident(pairs: &[(&str, &str)]) -> AiExtraction {
        AiExtraction {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect::<IndexMap<_, _>>(),
            confidence: 0.9,
            usage: TokenUsage {
                input_tokens: 500,
                output_tokens: 100,
            },
        }
    }

    #[tokio::test]
    async fn ai_extract_fills_only_gaps() {
        let mut config = sample_config();
        config.ai = Some(AiConfig {
            task: "extract".into(),
            required_fields: vec!["name".into(), "price".into()],
            ..AiConfig::default()
        });
        let ai = MockAi::new().with_extraction(confident(&[
            ("name", "AI Name"),
            ("price", "9.99"),
        ]));
        let mut ctx = context_with(config, "SKU-1", MockBrowser::new(), Some(ai));
        ctx.record_field("name", Value::String("Scraped Name".into()), Tier::Deterministic);

        let outcome = AiExtractAction
            .execute(&params("ai_extract", json!({})), &mut ctx)
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Continue));
        // Deterministic value kept, gap filled by AI.
        assert_eq!(ctx.results["name"], Value::String("Scraped Name".into()));
        assert_eq!(ctx.results["price"], Value::String("9.99".into()));
        assert_eq!(ctx.provenance["name"], Tier::Deterministic);
        assert_eq!(ctx.provenance["price"], Tier::Ai);
    }

    #[tokio::test]
    async fn ai_extract_skip_marks_fields_missing_without_failing() {
        let mut config = sample_config();
        config.ai = Some(AiConfig {
            task: "extract".into(),
            required_fields: vec!["price".into()],
            ..AiConfig::default()
        });
        // No provider wired in: the escalation is skipped.
        let mut ctx = context_with(config, "SKU-1", MockBrowser::new(), None);
        let outcome = AiExtractAction
            .execute(&params("ai_extract", json!({})), &mut ctx)
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Continue));
        assert_eq!(ctx.missing_required(), ["price"]);
    }

    #[tokio::test]
    async fn validate_passes_complete_matching_result() {
        let mut config = sample_config();
        config.ai = Some(AiConfig {
            task: "extract".into(),
            required_fields: vec!["name".into()],
            ..AiConfig::default()
        });
        let mut ctx = context_with(config, "WID-500", MockBrowser::new(), None);
        ctx.record_field("name", Value::String("Widget".into()), Tier::Deterministic);
        ctx.record_field("sku", Value::String("WID-500".into()), Tier::Deterministic);

        AiValidateAction
            .execute(&params("ai_validate", json!({})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.results["validation"]["passed"], Value::Bool(true));
    }

    #[tokio::test]
    async fn validate_strict_fails_on_variant_mismatch() {
        let config = sample_config();
        let mut ctx = context_with(config, "WID-500-BLUE", MockBrowser::new(), None);
        ctx.record_field("name", Value::String("Widget".into()), Tier::Deterministic);
        ctx.record_field("price", Value::String("9.99".into()), Tier::Deterministic);
        ctx.record_field("sku", Value::String("OTHER-999".into()), Tier::Deterministic);

        let err = AiValidateAction
            .execute(
                &params("ai_validate", json!({"required_fields": ["name"], "strict": true})),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Action(ActionError::Failed { .. })
        ));
        assert_eq!(ctx.results["validation"]["passed"], Value::Bool(false));
    }

    #[tokio::test]
    async fn search_stores_candidate_urls() {
        let config = sample_config();
        let ai = MockAi::new().with_search_results(vec![
            "https://example.com/p/1".into(),
            "https://example.com/p/2".into(),
        ]);
        let mut ctx = context_with(config, "SKU-1", MockBrowser::new(), Some(ai.clone()));
        AiSearchAction
            .execute(
                &params("ai_search", json!({"query": "widget {sku}", "top_n": 2})),
                &mut ctx,
            )
            .await
            .unwrap();
        let urls = ctx.results["candidate_urls"].as_array().unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(ai.search_calls(), 1);
    }

    #[tokio::test]
    async fn search_without_provider_is_a_soft_skip() {
        let config = sample_config();
        let mut ctx = context_with(config, "SKU-1", MockBrowser::new(), None);
        let outcome = AiSearchAction
            .execute(&params("ai_search", json!({"query": "widget"})), &mut ctx)
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Continue));
        assert!(!ctx.results.contains_key("candidate_urls"));
    }
}
