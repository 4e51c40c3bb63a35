//! Wait actions: fixed duration, element present, element absent.
//!
//! Waits are cooperative suspension points: each one races the run's
//! cancellation token so an external stop request halts mid-wait rather
//! than at the next step boundary. A wait that expires without its
//! condition holding is a typed, retryable timeout, never an exception
//! masquerading as success.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::ScraperContext;
use crate::error::{ActionError, BrowserError, EngineError, Result, SelectorError};

use super::{Action, ActionOutcome, ActionParams};

fn selector_timeout(name: &str, timeout: Duration) -> EngineError {
    EngineError::Selector(SelectorError::Timeout {
        name: name.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    })
}

fn lookup_expression(
    params: &ActionParams,
    ctx: &ScraperContext,
    action: &str,
) -> Result<(String, String, crate::types::SelectorKind)> {
    let name = params.require_str("selector")?;
    let selector = ctx.selector(name).ok_or_else(|| {
        EngineError::Action(ActionError::MalformedParams {
            action: action.to_string(),
            reason: format!("selector '{name}' not in config"),
        })
    })?;
    Ok((
        name.to_string(),
        selector.expression.clone(),
        selector.kind,
    ))
}

/// Block for a fixed duration.
pub struct WaitAction;

#[async_trait]
impl Action for WaitAction {
    fn name(&self) -> &'static str {
        "wait"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        let ms = params.u64_or("ms", params.u64_or("seconds", 1) * 1000);
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(ActionOutcome::Continue),
        }
    }
}

/// Block until an element is present.
pub struct WaitForAction;

#[async_trait]
impl Action for WaitForAction {
    fn name(&self) -> &'static str {
        "wait_for"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;
        let (name, expression, kind) = lookup_expression(params, ctx, "wait_for")?;
        let timeout = Duration::from_secs(params.u64_or("timeout_secs", ctx.config.timeout_secs));

        let appeared = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = ctx.browser.wait_for(&expression, kind, timeout) => {
                match result {
                    Ok(appeared) => appeared,
                    Err(BrowserError::Timeout { .. }) => false,
                    Err(other) => return Err(other.into()),
                }
            }
        };

        if appeared {
            Ok(ActionOutcome::Continue)
        } else {
            Err(selector_timeout(&name, timeout))
        }
    }
}

/// Block until an element is absent (e.g. a loading spinner).
pub struct WaitForHiddenAction;

#[async_trait]
impl Action for WaitForHiddenAction {
    fn name(&self) -> &'static str {
        "wait_for_hidden"
    }

    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        ctx.check_cancelled()?;
        let (name, expression, kind) = lookup_expression(params, ctx, "wait_for_hidden")?;
        let timeout = Duration::from_secs(params.u64_or("timeout_secs", ctx.config.timeout_secs));

        let hidden = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = ctx.browser.wait_for_hidden(&expression, kind, timeout) => {
                match result {
                    Ok(hidden) => hidden,
                    Err(BrowserError::Timeout { .. }) => false,
                    Err(other) => return Err(other.into()),
                }
            }
        };

        if hidden {
            Ok(ActionOutcome::Continue)
        } else {
            Err(selector_timeout(&name, timeout))
        }
    }
}
