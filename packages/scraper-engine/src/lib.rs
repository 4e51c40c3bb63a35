//! Configuration-Driven Scrape Workflow Engine
//!
//! Executes declarative scraper configurations against live pages: an
//! ordered workflow of actions (navigate, wait, click, extract,
//! conditional skip, AI fallback) over named selectors, with per-step
//! retry/backoff, a cost-guarded AI escalation tier, and canonical
//! result normalization. Every lifecycle transition emits a typed event.
//!
//! # Design Philosophy
//!
//! **"Deterministic first, AI as a guarded fallback"**
//!
//! - Configurations are validated before a session is ever opened
//! - Stable absence, timeout, and failure are distinct outcomes
//! - AI extraction is budgeted per page and circuit-broken per site
//! - A result is never `Completed` with required fields missing
//! - Capabilities (browser, AI, events) are traits, injected at the seam
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scraper_engine::{ActionRegistry, AiGuard, WorkflowExecutor};
//! use scraper_engine::events::TracingSink;
//! use scraper_engine::types::ScraperConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = Arc::new(ActionRegistry::builtin()?);
//! let config = Arc::new(ScraperConfig::parse(&raw_json, &registry)?);
//! let executor = WorkflowExecutor::new(registry, Arc::new(AiGuard::default()))
//!     .with_events(Arc::new(TracingSink));
//!
//! let result = executor
//!     .run(config, "SKU-123", browser_session, CancellationToken::new())
//!     .await;
//! assert!(result.is_complete() || !result.missing_fields.is_empty());
//! ```
//!
//! # Modules
//!
//! - [`types`] - Configuration schema and the canonical result record
//! - [`actions`] - The action registry and built-in action handlers
//! - [`executor`] - Workflow/step execution with retry and backoff
//! - [`selector`] - Selector resolution and value transforms
//! - [`ai`] - AI fallback chain, cost ledger, circuit breaker
//! - [`normalize`] - Price/availability/image/text canonicalization
//! - [`events`] - Typed telemetry events and sinks
//! - [`traits`] - Capability seams (browser session, AI provider)
//! - [`testing`] - Mock implementations for testing

pub mod actions;
pub mod ai;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod normalize;
pub mod selector;
pub mod testing;
pub mod traits;
pub mod types;

pub use actions::{Action, ActionOutcome, ActionParams, ActionRegistry};
pub use ai::{AiGuard, AiOutcome, GuardConfig};
pub use context::ScraperContext;
pub use error::{
    ActionError, AiError, BrowserError, ConfigError, EngineError, Result, SelectorError,
};
pub use events::{EngineEvent, EventEnvelope, EventSink};
pub use executor::{RetryPolicy, WorkflowExecutor};
pub use selector::Resolution;
pub use traits::{AiProvider, Browser};
pub use types::{ScrapeResult, ScrapeStatus, ScraperConfig};
