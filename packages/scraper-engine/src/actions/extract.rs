//! Extraction actions: resolve selectors and merge values into the
//! context results.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ScraperContext;
use crate::error::{ActionError, EngineError, Result};
use crate::events::EngineEvent;
use crate::selector::{self, Resolution};
use crate::types::{Tier, Transform, ValueTarget};

use super::{Action, ActionOutcome, ActionParams};

/// Extract a set of fields, each via a named selector.
///
/// Parameters:
/// - `fields`: object mapping field name to selector name
/// - `multiple`: optional array of field names captured as arrays
///   (all matches) instead of the first match
///
/// A missing *required* selector fails the step after all other fields
/// have been attempted, so one bad selector does not mask the rest of the
/// page. Optional misses record a null and are flagged in the result.
pub struct ExtractAction;

#[async_trait]
impl Action for ExtractAction {
    fn name(&self) -> &'static str {
        "extract"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;

        let fields = params.str_map("fields")?;
        if fields.is_empty() {
            return Err(EngineError::Action(ActionError::MalformedParams {
                action: "extract".into(),
                reason: "missing 'fields' object".into(),
            }));
        }
        let multiple = params.str_list("multiple")?;
        let timeout = Duration::from_secs(params.u64_or("timeout_secs", ctx.config.timeout_secs));

        let mut first_required_miss: Option<String> = None;

        for (field, selector_name) in &fields {
            let selector = ctx.selector(selector_name).cloned().ok_or_else(|| {
                EngineError::Action(ActionError::MalformedParams {
                    action: "extract".into(),
                    reason: format!("selector '{selector_name}' not in config"),
                })
            })?;

            let resolution = selector::resolve(&selector, ctx.browser.as_ref(), timeout).await?;

            let attribute = match &selector.target {
                ValueTarget::Attribute(name) => Some(name.clone()),
                ValueTarget::Text | ValueTarget::StructuredList => None,
            };
            let count = match &resolution {
                Resolution::Found(values) => values.len(),
                Resolution::NotFound => 0,
            };
            ctx.emit(EngineEvent::SelectorResolved {
                name: selector_name.clone(),
                found: resolution.is_found(),
                count,
                attribute,
            });

            match resolution {
                Resolution::Found(values) => {
                    let structured = selector.target == ValueTarget::StructuredList;
                    let mut decoded = values.into_iter().map(|raw| field_value(raw, structured));
                    let value = if multiple.iter().any(|f| f == field) {
                        Value::Array(decoded.collect())
                    } else {
                        decoded.next().unwrap_or_default()
                    };
                    ctx.record_field(field, value, Tier::Deterministic);
                }
                Resolution::NotFound if selector.required => {
                    tracing::warn!(field, selector = %selector_name, "required selector not found");
                    ctx.mark_missing_required(field);
                    if first_required_miss.is_none() {
                        first_required_miss = Some(field.clone());
                    }
                }
                Resolution::NotFound => {
                    tracing::debug!(field, selector = %selector_name, "optional selector not found");
                    ctx.record_field(field, Value::Null, Tier::Deterministic);
                    ctx.mark_missing_optional(field);
                }
            }
        }

        match first_required_miss {
            Some(field) => Err(EngineError::Action(ActionError::RequiredFieldAbsent {
                field,
            })),
            None => Ok(ActionOutcome::Continue),
        }
    }
}

/// Structured-list selectors resolve to canonical JSON text; decode it so
/// the recorded value is the structure itself, not its serialization.
fn field_value(raw: String, structured: bool) -> Value {
    if structured {
        serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw))
    } else {
        Value::String(raw)
    }
}

/// Extract one field and apply an inline transform chain on top of the
/// selector's own transforms.
///
/// Parameters: `field`, `selector`, `transforms` (array of transform
/// objects, same shape as selector transforms).
pub struct ExtractAndTransformAction;

#[async_trait]
impl Action for ExtractAndTransformAction {
    fn name(&self) -> &'static str {
        "extract_and_transform"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;

        let field = params.require_str("field")?.to_string();
        let selector_name = params.require_str("selector")?.to_string();
        let selector = ctx.selector(&selector_name).cloned().ok_or_else(|| {
            EngineError::Action(ActionError::MalformedParams {
                action: "extract_and_transform".into(),
                reason: format!("selector '{selector_name}' not in config"),
            })
        })?;

        let inline: Vec<Transform> = match params.get("transforms") {
            None => Vec::new(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                EngineError::Action(ActionError::MalformedParams {
                    action: "extract_and_transform".into(),
                    reason: format!("bad 'transforms': {e}"),
                })
            })?,
        };

        let timeout = Duration::from_secs(params.u64_or("timeout_secs", ctx.config.timeout_secs));
        let resolution = selector::resolve(&selector, ctx.browser.as_ref(), timeout).await?;

        match resolution {
            Resolution::Found(values) => {
                let raw = values.into_iter().next().unwrap_or_default();
                let transformed = selector::apply_transforms(&raw, &inline, &selector_name)?;
                ctx.record_field(&field, Value::String(transformed), Tier::Deterministic);
                Ok(ActionOutcome::Continue)
            }
            Resolution::NotFound if selector.required => {
                ctx.mark_missing_required(&field);
                Err(EngineError::Action(ActionError::RequiredFieldAbsent {
                    field,
                }))
            }
            Resolution::NotFound => {
                ctx.record_field(&field, Value::Null, Tier::Deterministic);
                ctx.mark_missing_optional(&field);
                Ok(ActionOutcome::Continue)
            }
        }
    }
}
