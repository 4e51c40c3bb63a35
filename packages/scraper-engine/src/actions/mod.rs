//! Action registry and the atomic operations it dispatches.
//!
//! Every action is a self-contained unit with a uniform contract: given
//! validated parameters and the shared run context, perform one unit of
//! work and either merge a value into the context or signal a typed
//! failure. Actions are stateless between invocations; all mutable state
//! lives in [`ScraperContext`].
//!
//! Dispatch is an explicit name-to-handler map. Registration happens at
//! process initialization and duplicates are rejected there, turning a
//! runtime dispatch risk into a startup-time guarantee.

mod ai;
mod conditional;
mod extract;
mod navigate;
mod wait;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::ScraperContext;
use crate::error::{ActionError, ConfigError, ConfigResult, EngineError, Result};

pub use ai::{AiExtractAction, AiSearchAction, AiValidateAction};
pub use conditional::{CombineAction, ConditionalSkipAction};
pub use extract::{ExtractAction, ExtractAndTransformAction};
pub use navigate::{ClickAction, NavigateAction};
pub use wait::{WaitAction, WaitForAction, WaitForHiddenAction};

/// Control-flow signal returned by a successful action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Proceed to the next step
    Continue,
    /// Skip all remaining steps (conditional branch taken)
    StopWorkflow,
}

/// Validated, substituted parameters for one dispatch.
///
/// Typed accessors convert shape errors into
/// [`ActionError::MalformedParams`] naming the offending key.
#[derive(Debug, Clone)]
pub struct ActionParams {
    action: String,
    map: Map<String, Value>,
}

impl ActionParams {
    pub fn new(action: impl Into<String>, map: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            map,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> EngineError {
        EngineError::Action(ActionError::MalformedParams {
            action: self.action.clone(),
            reason: reason.into(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(|v| v.as_str())
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.str(key)
            .ok_or_else(|| self.malformed(format!("missing string parameter '{key}'")))
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.map.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.map.get(key).and_then(|v| v.as_f64())
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.map.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// A string-array parameter; absent means empty.
    pub fn str_list(&self, key: &str) -> Result<Vec<String>> {
        match self.map.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(|s| s.to_string())
                        .ok_or_else(|| self.malformed(format!("'{key}' must contain strings")))
                })
                .collect(),
            Some(_) => Err(self.malformed(format!("'{key}' must be an array"))),
        }
    }

    /// An object parameter of string values (field name -> selector name).
    pub fn str_map(&self, key: &str) -> Result<Vec<(String, String)>> {
        match self.map.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.clone(), s.to_string()))
                        .ok_or_else(|| self.malformed(format!("'{key}.{k}' must be a string")))
                })
                .collect(),
            Some(_) => Err(self.malformed(format!("'{key}' must be an object"))),
        }
    }
}

/// One atomic operation type with a uniform execution contract.
#[async_trait]
pub trait Action: Send + Sync {
    /// Registry key for this action.
    fn name(&self) -> &'static str;

    /// Perform one unit of work against the shared context.
    async fn execute(
        &self,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome>;
}

/// Name-to-handler map, built once at process startup.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// An empty registry, for callers composing their own action set.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The registry with every built-in action registered.
    pub fn builtin() -> ConfigResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(NavigateAction))?;
        registry.register(Arc::new(ClickAction))?;
        registry.register(Arc::new(WaitAction))?;
        registry.register(Arc::new(WaitForAction))?;
        registry.register(Arc::new(WaitForHiddenAction))?;
        registry.register(Arc::new(ExtractAction))?;
        registry.register(Arc::new(ExtractAndTransformAction))?;
        registry.register(Arc::new(ConditionalSkipAction))?;
        registry.register(Arc::new(CombineAction))?;
        registry.register(Arc::new(AiExtractAction))?;
        registry.register(Arc::new(AiSearchAction))?;
        registry.register(Arc::new(AiValidateAction))?;
        Ok(registry)
    }

    /// Register a handler. Duplicate names are a fatal configuration
    /// error, surfaced at startup rather than at run time.
    pub fn register(&mut self, action: Arc<dyn Action>) -> ConfigResult<()> {
        let name = action.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(ConfigError::DuplicateAction { name });
        }
        self.handlers.insert(name, action);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.handlers.get(name).cloned()
    }

    /// Registered action names, sorted for stable diagnostics.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Dispatch one action by name.
    pub async fn dispatch(
        &self,
        name: &str,
        params: &ActionParams,
        ctx: &mut ScraperContext,
    ) -> Result<ActionOutcome> {
        let action = self.get(name).ok_or_else(|| {
            EngineError::Action(ActionError::Unknown {
                name: name.to_string(),
            })
        })?;
        action.execute(params, ctx).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
