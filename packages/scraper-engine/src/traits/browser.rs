//! Browser seam the executor drives.
//!
//! The engine does not embed a browser-automation library; it assumes one
//! exists behind this trait. Implementations wrap a real driver
//! (Playwright over CDP, a remote grid, ...) and return plain-value
//! element snapshots so actions never touch driver handles directly.
//! Sessions are a finite, expensive resource: `close` must be safe to call
//! exactly once on every exit path.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrowserResult;
use crate::types::SelectorKind;

/// A value-level snapshot of one located DOM element.
#[derive(Debug, Clone, Default)]
pub struct Element {
    /// Visible text content, untrimmed
    pub text: String,
    /// Attribute map; `href`/`src` are expected pre-resolved to absolute URLs
    pub attributes: HashMap<String, String>,
}

impl Element {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Outcome of a navigation.
#[derive(Debug, Clone)]
pub struct NavigationOutcome {
    /// HTTP status of the main document response
    pub status: u16,
    /// URL after redirects
    pub final_url: String,
}

/// One exclusive browser session, owned by a single workflow run.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Load a URL; suspends until the main document settles or times out.
    async fn navigate(&self, url: &str) -> BrowserResult<NavigationOutcome>;

    /// Current page URL.
    async fn current_url(&self) -> BrowserResult<String>;

    /// Query all elements matching an expression, without waiting.
    ///
    /// An empty result means stable absence, not failure.
    async fn query(&self, expression: &str, kind: SelectorKind) -> BrowserResult<Vec<Element>>;

    /// Wait until at least one match is present.
    ///
    /// `Ok(true)` when it appeared, `Ok(false)` when the page settled
    /// without it (stable absence), `Err(Timeout)` when the page never
    /// settled within `timeout`.
    async fn wait_for(
        &self,
        expression: &str,
        kind: SelectorKind,
        timeout: Duration,
    ) -> BrowserResult<bool>;

    /// Wait until no match is present; same outcome semantics as `wait_for`.
    async fn wait_for_hidden(
        &self,
        expression: &str,
        kind: SelectorKind,
        timeout: Duration,
    ) -> BrowserResult<bool>;

    /// Click the first match.
    async fn click(&self, expression: &str, kind: SelectorKind) -> BrowserResult<()>;

    /// Whether an add-to-cart style control is enabled; `None` when no such
    /// control matched. Availability normalization consumes this signal.
    async fn element_enabled(
        &self,
        expression: &str,
        kind: SelectorKind,
    ) -> BrowserResult<Option<bool>> {
        let elements = self.query(expression, kind).await?;
        Ok(elements
            .first()
            .map(|e| e.attributes.get("disabled").is_none()))
    }

    /// Full page markup, for debug capture.
    async fn page_source(&self) -> BrowserResult<String>;

    /// PNG screenshot if the driver supports it.
    async fn screenshot(&self) -> BrowserResult<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Rotate the session user agent (anti-detection); default no-op.
    async fn rotate_user_agent(&self) -> BrowserResult<()> {
        Ok(())
    }

    /// Release the session. Idempotent; runs on every exit path.
    async fn close(&self);
}
