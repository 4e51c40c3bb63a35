//! Typed errors for the workflow engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Retryability is a property
//! of the error, not of the call site: the step executor asks
//! [`EngineError::is_retryable`] and never inspects error strings.

use thiserror::Error;

/// Errors raised while parsing or validating a scraper configuration.
///
/// All of these are fatal and surface at load time, before any browser
/// session is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration document failed to parse
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A required top-level field is missing or empty
    #[error("missing required config field: {field}")]
    MissingField { field: String },

    /// A numeric or range-bound field holds an invalid value
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Workflow has no steps
    #[error("workflow is empty for scraper '{scraper}'")]
    EmptyWorkflow { scraper: String },

    /// A step names an action that is not registered
    #[error("step {step_index} references unknown action '{action}'")]
    UnknownAction { step_index: usize, action: String },

    /// A step references a selector that is not defined
    #[error("step {step_index} references undefined selector '{selector}'")]
    UnknownSelector { step_index: usize, selector: String },

    /// Two selectors share a name
    #[error("duplicate selector name '{name}'")]
    DuplicateSelector { name: String },

    /// An action was registered twice at startup
    #[error("action '{name}' is already registered")]
    DuplicateAction { name: String },
}

/// Errors surfaced by the browser-automation capability.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Navigation could not complete
    #[error("navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    /// A blocking browser operation exceeded its timeout
    #[error("browser timeout: {operation}")]
    Timeout { operation: String },

    /// Transient infrastructure failure (connection reset, renderer crash)
    #[error("transient browser failure: {0}")]
    Transient(String),

    /// An anti-bot challenge or CAPTCHA marker was detected
    #[error("anti-bot challenge detected: {0}")]
    AntiBotDetected(String),

    /// The session was already released
    #[error("browser session closed")]
    SessionClosed,
}

/// Errors raised during selector resolution.
///
/// "Not found" is deliberately absent: stable absence is a first-class
/// outcome ([`crate::selector::Resolution::NotFound`]), not an error.
/// Only genuine infrastructure failures live here so the retry layer
/// never retries a stable miss.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// The element did not appear within the resolution timeout
    #[error("selector '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    /// A transform in the selector's chain failed
    #[error("transform failed for selector '{name}': {reason}")]
    Transform { name: String, reason: String },
}

/// Errors raised by an action's own precondition checks.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Dispatch target does not exist in the registry
    #[error("unknown action: {name}")]
    Unknown { name: String },

    /// Parameters failed per-action validation at dispatch time
    #[error("malformed params for '{action}': {reason}")]
    MalformedParams { action: String, reason: String },

    /// A `required` selector resolved to not-found
    #[error("required field '{field}' absent in page markup")]
    RequiredFieldAbsent { field: String },

    /// The action ran but could not complete its unit of work
    #[error("action '{action}' failed: {reason}")]
    Failed { action: String, reason: String },
}

/// Errors surfaced by the AI completion capability.
///
/// Budget exhaustion and an open circuit breaker are *not* errors; they
/// are explicit [`crate::ai::AiOutcome::Skipped`] outcomes.
#[derive(Debug, Error)]
pub enum AiError {
    /// The provider call itself failed
    #[error("AI provider error: {0}")]
    Provider(String),

    /// The provider did not respond within the configured timeout
    #[error("AI call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The provider responded with something unparseable
    #[error("malformed AI response: {0}")]
    MalformedResponse(String),
}

/// Umbrella error for one workflow run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Ai(#[from] AiError),

    /// The run-scoped cancellation signal fired
    #[error("run cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the step executor may retry after this error.
    ///
    /// Infrastructure-class failures (timeouts, transient browser faults,
    /// anti-bot challenges) are retryable; semantic failures (bad config,
    /// malformed params, required field structurally absent) surface
    /// immediately. Cancellation is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Browser(e) => matches!(
                e,
                BrowserError::Timeout { .. }
                    | BrowserError::Transient(_)
                    | BrowserError::AntiBotDetected(_)
                    | BrowserError::Navigation { .. }
            ),
            EngineError::Selector(SelectorError::Timeout { .. }) => true,
            EngineError::Ai(e) => {
                matches!(e, AiError::Provider(_) | AiError::Timeout { .. })
            }
            _ => false,
        }
    }

    /// Whether this error came from an anti-bot challenge.
    ///
    /// Anti-bot detections retry with a longer backoff than ordinary
    /// transient failures.
    pub fn is_anti_bot(&self) -> bool {
        matches!(
            self,
            EngineError::Browser(BrowserError::AntiBotDetected(_))
        )
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for browser operations.
pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

/// Result type alias for AI provider calls.
pub type AiResult<T> = std::result::Result<T, AiError>;
