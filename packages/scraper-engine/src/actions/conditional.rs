//! Flow-control actions: early exit on a predicate and field combination.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ScraperContext;
use crate::error::{ActionError, EngineError, Result};
use crate::types::Tier;

use super::{Action, ActionOutcome, ActionParams};

/// Stop the workflow early when a predicate over the page or the results
/// so far holds. Remaining steps are skipped, not failed.
///
/// Two predicate shapes:
/// - `field` plus one of `equals`, `contains`, or `missing: true`,
///   evaluated against the extracted results
/// - `selector` plus `when` ("found" or "missing"), a presence check
///   against the live page
pub struct ConditionalSkipAction;

#[async_trait]
impl Action for ConditionalSkipAction {
    fn name(&self) -> &'static str {
        "conditional_skip"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;

        let matched = if let Some(field) = params.str("field") {
            field_predicate(params, ctx, field)?
        } else if let Some(name) = params.str("selector") {
            let selector = ctx.selector(name).cloned().ok_or_else(|| {
                EngineError::Action(ActionError::MalformedParams {
                    action: "conditional_skip".into(),
                    reason: format!("selector '{name}' not in config"),
                })
            })?;
            let elements = ctx
                .browser
                .query(&selector.expression, selector.kind)
                .await?;
            match params.str("when").unwrap_or("found") {
                "found" => !elements.is_empty(),
                "missing" => elements.is_empty(),
                other => {
                    return Err(EngineError::Action(ActionError::MalformedParams {
                        action: "conditional_skip".into(),
                        reason: format!("'when' must be 'found' or 'missing', got '{other}'"),
                    }))
                }
            }
        } else {
            return Err(EngineError::Action(ActionError::MalformedParams {
                action: "conditional_skip".into(),
                reason: "needs either 'field' or 'selector'".into(),
            }));
        };

        if matched {
            tracing::info!(target_id = %ctx.target_id, "skip condition met, stopping workflow");
            ctx.stop_workflow();
            return Ok(ActionOutcome::StopWorkflow);
        }
        Ok(ActionOutcome::Continue)
    }
}

fn field_predicate(params: &ActionParams, ctx: &ScraperContext, field: &str) -> Result<bool> {
    let current = ctx.result_str(field);
    if params.bool_or("missing", false) {
        return Ok(current.is_none());
    }
    if let Some(expected) = params.str("equals") {
        return Ok(current == Some(expected));
    }
    if let Some(needle) = params.str("contains") {
        return Ok(current
            .map(|v| v.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false));
    }
    Err(EngineError::Action(ActionError::MalformedParams {
        action: "conditional_skip".into(),
        reason: "field predicate needs 'equals', 'contains', or 'missing'".into(),
    }))
}

/// Join several already-extracted fields into one.
///
/// Parameters: `field` (destination), `sources` (array of field names),
/// `separator` (default single space). Absent sources are skipped rather
/// than erroring so partial pages still combine what they have.
pub struct CombineAction;

#[async_trait]
impl Action for CombineAction {
    fn name(&self) -> &'static str {
        "combine"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;

        let field = params.require_str("field")?.to_string();
        let sources = params.str_list("sources")?;
        if sources.is_empty() {
            return Err(EngineError::Action(ActionError::MalformedParams {
                action: "combine".into(),
                reason: "missing 'sources' array".into(),
            }));
        }
        let separator = params.str("separator").unwrap_or(" ").to_string();

        let parts: Vec<String> = sources
            .iter()
            .filter_map(|s| ctx.result_str(s))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();

        if parts.is_empty() {
            ctx.record_field(&field, Value::Null, Tier::Deterministic);
            ctx.mark_missing_optional(&field);
        } else {
            ctx.record_field(&field, Value::String(parts.join(&separator)), Tier::Deterministic);
        }
        Ok(ActionOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, sample_config, MockBrowser};
    use crate::traits::Element;
    use crate::types::{Selector, Tier};
    use serde_json::json;

    fn params(action: &str, value: Value) -> ActionParams {
        match value {
            Value::Object(map) => ActionParams::new(action, map),
            _ => panic!("params must be an object"),
        }
    }

    #[tokio::test]
    async fn field_equals_predicate_stops_the_workflow() {
        let mut ctx = context_with(sample_config(), "SKU-1", MockBrowser::new(), None);
        ctx.record_field("availability", json!("discontinued"), Tier::Deterministic);

        let outcome = ConditionalSkipAction
            .execute(
                &params(
                    "conditional_skip",
                    json!({"field": "availability", "equals": "discontinued"}),
                ),
                &mut ctx,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::StopWorkflow));
        assert!(ctx.is_stopped());
    }

    #[tokio::test]
    async fn unmatched_predicate_continues() {
        let mut ctx = context_with(sample_config(), "SKU-1", MockBrowser::new(), None);
        ctx.record_field("availability", json!("in stock"), Tier::Deterministic);

        let outcome = ConditionalSkipAction
            .execute(
                &params(
                    "conditional_skip",
                    json!({"field": "availability", "equals": "discontinued"}),
                ),
                &mut ctx,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Continue));
        assert!(!ctx.is_stopped());
    }

    #[tokio::test]
    async fn selector_missing_predicate_stops() {
        let mut config = sample_config();
        config.selectors.push(Selector::css("banner", ".banner"));
        let mut ctx = context_with(config, "SKU-1", MockBrowser::new(), None);

        let outcome = ConditionalSkipAction
            .execute(
                &params(
                    "conditional_skip",
                    json!({"selector": "banner", "when": "missing"}),
                ),
                &mut ctx,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::StopWorkflow));
    }

    #[tokio::test]
    async fn selector_found_predicate_sees_the_page() {
        let mut config = sample_config();
        config.selectors.push(Selector::css("banner", ".banner"));
        let browser =
            MockBrowser::new().with_elements(".banner", vec![Element::with_text("Sale!")]);
        let mut ctx = context_with(config, "SKU-1", browser, None);

        let outcome = ConditionalSkipAction
            .execute(
                &params("conditional_skip", json!({"selector": "banner", "when": "found"})),
                &mut ctx,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::StopWorkflow));
    }

    #[tokio::test]
    async fn combine_joins_present_sources_only() {
        let mut ctx = context_with(sample_config(), "SKU-1", MockBrowser::new(), None);
        ctx.record_field("brand", json!("ACME"), Tier::Deterministic);
        ctx.record_field("model", json!("Widget Pro"), Tier::Deterministic);

        CombineAction
            .execute(
                &params(
                    "combine",
                    json!({"field": "name", "sources": ["brand", "model", "edition"]}),
                ),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(ctx.results["name"], json!("ACME Widget Pro"));
    }

    #[tokio::test]
    async fn combine_with_nothing_present_marks_optional() {
        let mut ctx = context_with(sample_config(), "SKU-1", MockBrowser::new(), None);
        CombineAction
            .execute(
                &params("combine", json!({"field": "name", "sources": ["brand"]})),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(ctx.results["name"], Value::Null);
        assert_eq!(ctx.missing_optional(), ["name"]);
    }
}
