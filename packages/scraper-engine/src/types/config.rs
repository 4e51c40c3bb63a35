//! Configuration types for one target site.
//!
//! A [`ScraperConfig`] is parsed once from a structured document, validated
//! eagerly (cross-references included), and never mutated afterwards. A
//! structurally invalid document is rejected with the offending field
//! named; nothing is silently defaulted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::ActionRegistry;
use crate::error::{ConfigError, ConfigResult};

/// Root configuration for one target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Site name, used as the circuit-breaker and telemetry scope
    pub name: String,

    /// URL template for the product page; `{sku}` is replaced with the
    /// target identifier
    pub base_url: String,

    /// Default per-step timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Default attempt count per step (1 = no retry)
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Named selector rules referenced by workflow steps
    #[serde(default)]
    pub selectors: Vec<Selector>,

    /// Ordered workflow; index position is part of a step's identity
    pub workflow: Vec<WorkflowStep>,

    /// Anti-detection options
    #[serde(default)]
    pub anti_detection: Option<AntiDetectionConfig>,

    /// Optional AI fallback configuration
    #[serde(default)]
    pub ai: Option<AiConfig>,

    /// Currency assumed when a price carries no symbol or code
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Maximum images kept after normalization
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_max_images() -> usize {
    8
}

/// How a selector expression is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    Css,
    Xpath,
}

/// What to read off a located element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTarget {
    /// Visible text content
    Text,
    /// A named DOM attribute (`href`, `src`, `data-price`, ...)
    Attribute(String),
    /// Structured content: a JSON block (`<script type="application/ld+json">`)
    /// parsed whole, or table-like text split into row values
    StructuredList,
}

impl Default for ValueTarget {
    fn default() -> Self {
        Self::Text
    }
}

/// A value transform, applied in declared order after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    RemovePrefix { prefix: String },
    RemoveSuffix { suffix: String },
    Replace { from: String, to: String },
    RegexReplace { pattern: String, replacement: String },
    RegexExtract { pattern: String, group: usize },
    /// Extract the first decimal number, formatted with two places
    ParseNumber,
}

/// A named rule for locating and extracting one value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selector {
    pub name: String,

    #[serde(default = "default_selector_kind")]
    pub kind: SelectorKind,

    /// CSS or XPath expression, per `kind`
    pub expression: String,

    #[serde(default)]
    pub target: ValueTarget,

    /// Required selectors that resolve to not-found fail the owning step
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub transforms: Vec<Transform>,
}

fn default_selector_kind() -> SelectorKind {
    SelectorKind::Css
}

impl Selector {
    /// Create a CSS text selector with no transforms.
    pub fn css(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SelectorKind::Css,
            expression: expression.into(),
            target: ValueTarget::Text,
            required: false,
            transforms: Vec::new(),
        }
    }

    /// Mark this selector as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Read a named attribute instead of text content.
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.target = ValueTarget::Attribute(name.into());
        self
    }

    /// Read structured content (JSON block or table rows).
    pub fn structured(mut self) -> Self {
        self.target = ValueTarget::StructuredList;
        self
    }

    /// Append a transform to the chain.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }
}

/// One instruction in the ordered workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Action name; must exist in the registry (validated at load)
    pub action: String,

    /// Optional step name for telemetry
    #[serde(default)]
    pub name: Option<String>,

    /// Free-form parameters, validated per-action at dispatch time
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,

    /// Per-step attempt-count override
    #[serde(default)]
    pub retries: Option<u32>,

    /// Per-step timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl WorkflowStep {
    /// Create a step with no parameters.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            name: None,
            params: serde_json::Map::new(),
            retries: None,
            timeout_secs: None,
        }
    }

    /// Set a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the telemetry name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set a per-step attempt count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Selector names this step references, for load-time validation.
    ///
    /// Looks at the conventional parameter shapes: a `selector` string, a
    /// `fields` map of field name to selector name, and a `selectors` array.
    pub fn selector_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();

        if let Some(Value::String(s)) = self.params.get("selector") {
            refs.push(s.as_str());
        }
        if let Some(Value::Object(fields)) = self.params.get("fields") {
            for value in fields.values() {
                if let Value::String(s) = value {
                    refs.push(s.as_str());
                }
            }
        }
        if let Some(Value::Array(items)) = self.params.get("selectors") {
            for item in items {
                if let Value::String(s) = item {
                    refs.push(s.as_str());
                }
            }
        }

        refs
    }
}

/// Anti-detection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiDetectionConfig {
    /// Minimum settle delay at the start of a run, before the first
    /// step, milliseconds
    #[serde(default)]
    pub min_delay_ms: u64,

    /// Maximum settle delay at the start of a run, milliseconds
    #[serde(default)]
    pub max_delay_ms: u64,

    /// Ask the browser capability to rotate its user agent between runs
    #[serde(default)]
    pub rotate_user_agent: bool,
}

/// AI fallback configuration.
///
/// The threshold and ceiling defaults are tuning values, not structural
/// requirements; nothing downstream assumes these exact numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Task description handed to the completion capability
    pub task: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum reasoning steps the provider may take
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Minimum confidence to accept an AI extraction, in [0, 1]
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Per-page spend ceiling in USD
    #[serde(default = "default_cost_ceiling")]
    pub cost_ceiling_usd: f64,

    /// Fields an AI extraction must supply to pass validation
    #[serde(default)]
    pub required_fields: Vec<String>,

    /// Provider call timeout in seconds
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            task: String::new(),
            model: default_model(),
            max_steps: default_max_steps(),
            confidence_threshold: default_confidence_threshold(),
            cost_ceiling_usd: default_cost_ceiling(),
            required_fields: Vec::new(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_steps() -> u32 {
    10
}

fn default_confidence_threshold() -> f64 {
    0.35
}

fn default_cost_ceiling() -> f64 {
    0.15
}

fn default_ai_timeout() -> u64 {
    120
}

impl ScraperConfig {
    /// Parse and validate a configuration document.
    ///
    /// Pure transform: no side effects, no browser session. Every step's
    /// action must exist in `registry` and every selector reference must
    /// resolve, so a malformed document never reaches run time.
    pub fn parse(raw: &str, registry: &ActionRegistry) -> ConfigResult<Self> {
        let config: ScraperConfig = serde_json::from_str(raw)?;
        config.validate(registry)?;
        Ok(config)
    }

    /// Validate an already-constructed configuration.
    pub fn validate(&self, registry: &ActionRegistry) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "name".into(),
            });
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "base_url".into(),
            });
        }
        if self.workflow.is_empty() {
            return Err(ConfigError::EmptyWorkflow {
                scraper: self.name.clone(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs".into(),
                reason: "must be positive".into(),
            });
        }
        if self.retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retries".into(),
                reason: "must be at least 1".into(),
            });
        }

        // Selector names must be unique.
        let mut names = std::collections::HashSet::new();
        for selector in &self.selectors {
            if !names.insert(selector.name.as_str()) {
                return Err(ConfigError::DuplicateSelector {
                    name: selector.name.clone(),
                });
            }
        }

        // Every step's action must be registered and every selector
        // reference must resolve.
        for (index, step) in self.workflow.iter().enumerate() {
            if !registry.contains(&step.action) {
                return Err(ConfigError::UnknownAction {
                    step_index: index,
                    action: step.action.clone(),
                });
            }
            for reference in step.selector_refs() {
                if !names.contains(reference) {
                    return Err(ConfigError::UnknownSelector {
                        step_index: index,
                        selector: reference.to_string(),
                    });
                }
            }
            if let Some(0) = step.retries {
                return Err(ConfigError::InvalidValue {
                    field: format!("workflow[{index}].retries"),
                    reason: "must be at least 1".into(),
                });
            }
            if let Some(0) = step.timeout_secs {
                return Err(ConfigError::InvalidValue {
                    field: format!("workflow[{index}].timeout_secs"),
                    reason: "must be positive".into(),
                });
            }
        }

        if let Some(anti) = &self.anti_detection {
            if anti.max_delay_ms < anti.min_delay_ms {
                return Err(ConfigError::InvalidValue {
                    field: "anti_detection.max_delay_ms".into(),
                    reason: "must be >= min_delay_ms".into(),
                });
            }
        }

        if let Some(ai) = &self.ai {
            if ai.task.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "ai.task".into(),
                });
            }
            if !(0.0..=1.0).contains(&ai.confidence_threshold) {
                return Err(ConfigError::InvalidValue {
                    field: "ai.confidence_threshold".into(),
                    reason: "must be in [0, 1]".into(),
                });
            }
            if ai.cost_ceiling_usd <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "ai.cost_ceiling_usd".into(),
                    reason: "must be positive".into(),
                });
            }
            if ai.max_steps == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "ai.max_steps".into(),
                    reason: "must be at least 1".into(),
                });
            }
        }

        Ok(())
    }

    /// Look up a selector by name.
    pub fn selector(&self, name: &str) -> Option<&Selector> {
        self.selectors.iter().find(|s| s.name == name)
    }

    /// Names of all `required` selectors.
    pub fn required_fields(&self) -> Vec<&str> {
        self.selectors
            .iter()
            .filter(|s| s.required)
            .map(|s| s.name.as_str())
            .collect()
    }
}
