//! Navigation and click actions.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::ScraperContext;
use crate::error::{ActionError, EngineError, Result, SelectorError};
use crate::events::EngineEvent;

use super::{Action, ActionOutcome, ActionParams};

/// Load a URL, templated with the target identifier.
///
/// The HTTP status and final URL land on the context's navigation slot,
/// not in the results; a non-2xx/3xx status is a soft signal (logged)
/// unless `fail_on_error` marks it fatal.
pub struct NavigateAction;

#[async_trait]
impl Action for NavigateAction {
    fn name(&self) -> &'static str {
        "navigate"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;

        let template = params
            .str("url")
            .unwrap_or(ctx.config.base_url.as_str())
            .to_string();
        let url = ctx.substitute(&template);

        tracing::info!(scraper = %ctx.config.name, %url, "navigating");
        let outcome = ctx.browser.navigate(&url).await?;

        ctx.last_navigation = Some(outcome.clone());

        if !(200..400).contains(&outcome.status) {
            let fail_on_error = params.bool_or("fail_on_error", false);
            tracing::warn!(
                status = outcome.status,
                url = %outcome.final_url,
                fatal = fail_on_error,
                "navigation returned error status"
            );
            if fail_on_error {
                return Err(EngineError::Action(ActionError::Failed {
                    action: "navigate".into(),
                    reason: format!("HTTP {} for {}", outcome.status, outcome.final_url),
                }));
            }
        }

        let wait_after_ms = params.u64_or("wait_after_ms", 0);
        if wait_after_ms > 0 {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(wait_after_ms)) => {}
            }
        }

        Ok(ActionOutcome::Continue)
    }
}

/// Click the element a named selector locates.
pub struct ClickAction;

#[async_trait]
impl Action for ClickAction {
    fn name(&self) -> &'static str {
        "click"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;

        let name = params.require_str("selector")?;
        let selector = ctx.selector(name).cloned().ok_or_else(|| {
            EngineError::Action(ActionError::MalformedParams {
                action: "click".into(),
                reason: format!("selector '{name}' not in config"),
            })
        })?;

        let timeout = Duration::from_secs(params.u64_or("timeout_secs", ctx.config.timeout_secs));
        let required = params.bool_or("required", true);

        let appeared = ctx
            .browser
            .wait_for(&selector.expression, selector.kind, timeout)
            .await
            .map_err(|e| match e {
                crate::error::BrowserError::Timeout { .. } => {
                    EngineError::Selector(SelectorError::Timeout {
                        name: name.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
                other => other.into(),
            })?;

        ctx.emit(EngineEvent::SelectorResolved {
            name: name.to_string(),
            found: appeared,
            count: usize::from(appeared),
            attribute: None,
        });

        if !appeared {
            if required {
                return Err(EngineError::Action(ActionError::Failed {
                    action: "click".into(),
                    reason: format!("click target '{name}' absent"),
                }));
            }
            tracing::debug!(selector = name, "optional click target absent, skipping");
            return Ok(ActionOutcome::Continue);
        }

        ctx.browser.click(&selector.expression, selector.kind).await?;
        Ok(ActionOutcome::Continue)
    }
}
