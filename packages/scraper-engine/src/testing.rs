//! Hand-rolled test doubles and fixtures.
//!
//! Mocks are plain structs over `Arc<RwLock<_>>` state with `with_*`
//! builders, so a test can keep a clone for assertions after the engine
//! takes ownership of the other. Always compiled, so downstream crates
//! can drive the engine against the same doubles in their own tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::AiGuard;
use crate::context::ScraperContext;
use crate::error::{AiError, AiResult, BrowserError, BrowserResult};
use crate::events::{BufferSink, EventSink, NullSink};
use crate::traits::{
    AiExtraction, AiProvider, AiRequest, Browser, Element, NavigationOutcome,
};
use crate::types::{ScraperConfig, Selector, SelectorKind, WorkflowStep};

// ============================================================================
// Browser mock
// ============================================================================

#[derive(Default)]
struct MockBrowserState {
    elements: HashMap<String, Vec<Element>>,
    timeout_selectors: HashSet<String>,
    navigate_status: u16,
    transient_navigation_failures: u32,
    anti_bot_navigation_failures: u32,
    page_source: String,
    navigations: Vec<String>,
    clicks: Vec<String>,
    wait_for_calls: usize,
    rotations: usize,
    closed: bool,
}

/// Scriptable in-memory browser session.
///
/// Clones share state, so keep one clone for post-run assertions.
#[derive(Clone)]
pub struct MockBrowser {
    state: Arc<RwLock<MockBrowserState>>,
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockBrowserState {
                navigate_status: 200,
                page_source: "<html><body></body></html>".to_string(),
                ..MockBrowserState::default()
            })),
        }
    }

    /// Script the elements a query for `expression` returns.
    pub fn with_elements(self, expression: impl Into<String>, elements: Vec<Element>) -> Self {
        self.write().elements.insert(expression.into(), elements);
        self
    }

    /// Make waits on `expression` time out (page never settles).
    pub fn with_timeout_selector(self, expression: impl Into<String>) -> Self {
        self.write().timeout_selectors.insert(expression.into());
        self
    }

    /// Status code every navigation reports.
    pub fn with_status(self, status: u16) -> Self {
        self.write().navigate_status = status;
        self
    }

    /// Fail the first `count` navigations with a transient error.
    pub fn with_transient_navigation_failures(self, count: u32) -> Self {
        self.write().transient_navigation_failures = count;
        self
    }

    /// Fail the first `count` navigations with an anti-bot challenge.
    pub fn with_anti_bot_challenges(self, count: u32) -> Self {
        self.write().anti_bot_navigation_failures = count;
        self
    }

    pub fn with_page_source(self, source: impl Into<String>) -> Self {
        self.write().page_source = source.into();
        self
    }

    pub fn last_navigated_url(&self) -> Option<String> {
        self.read().navigations.last().cloned()
    }

    pub fn navigation_count(&self) -> usize {
        self.read().navigations.len()
    }

    pub fn clicked(&self) -> Vec<String> {
        self.read().clicks.clone()
    }

    pub fn wait_for_calls(&self) -> usize {
        self.read().wait_for_calls
    }

    pub fn rotations(&self) -> usize {
        self.read().rotations
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MockBrowserState> {
        self.state.read().unwrap()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MockBrowserState> {
        self.state.write().unwrap()
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn navigate(&self, url: &str) -> BrowserResult<NavigationOutcome> {
        let mut state = self.write();
        state.navigations.push(url.to_string());
        if state.anti_bot_navigation_failures > 0 {
            state.anti_bot_navigation_failures -= 1;
            return Err(BrowserError::AntiBotDetected("challenge page".into()));
        }
        if state.transient_navigation_failures > 0 {
            state.transient_navigation_failures -= 1;
            return Err(BrowserError::Transient("connection reset".into()));
        }
        Ok(NavigationOutcome {
            status: state.navigate_status,
            final_url: url.to_string(),
        })
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self
            .read()
            .navigations
            .last()
            .cloned()
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn query(&self, expression: &str, _kind: SelectorKind) -> BrowserResult<Vec<Element>> {
        Ok(self
            .read()
            .elements
            .get(expression)
            .cloned()
            .unwrap_or_default())
    }

    async fn wait_for(
        &self,
        expression: &str,
        _kind: SelectorKind,
        _timeout: Duration,
    ) -> BrowserResult<bool> {
        let mut state = self.write();
        state.wait_for_calls += 1;
        if state.timeout_selectors.contains(expression) {
            return Err(BrowserError::Timeout {
                operation: format!("wait_for {expression}"),
            });
        }
        Ok(state
            .elements
            .get(expression)
            .map(|e| !e.is_empty())
            .unwrap_or(false))
    }

    async fn wait_for_hidden(
        &self,
        expression: &str,
        _kind: SelectorKind,
        _timeout: Duration,
    ) -> BrowserResult<bool> {
        let state = self.read();
        if state.timeout_selectors.contains(expression) {
            return Err(BrowserError::Timeout {
                operation: format!("wait_for_hidden {expression}"),
            });
        }
        Ok(state
            .elements
            .get(expression)
            .map(|e| e.is_empty())
            .unwrap_or(true))
    }

    async fn click(&self, expression: &str, _kind: SelectorKind) -> BrowserResult<()> {
        self.write().clicks.push(expression.to_string());
        Ok(())
    }

    async fn page_source(&self) -> BrowserResult<String> {
        Ok(self.read().page_source.clone())
    }

    async fn rotate_user_agent(&self) -> BrowserResult<()> {
        self.write().rotations += 1;
        Ok(())
    }

    async fn close(&self) {
        self.write().closed = true;
    }
}

// ============================================================================
// AI provider mock
// ============================================================================

#[derive(Default)]
struct MockAiState {
    extraction: Option<AiExtraction>,
    fail_with: Option<String>,
    search_results: Vec<String>,
    extract_calls: usize,
    search_calls: usize,
    requests: Vec<AiRequest>,
}

/// Scriptable AI provider. Clones share state.
#[derive(Clone, Default)]
pub struct MockAi {
    state: Arc<RwLock<MockAiState>>,
}

impl MockAi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every extract call returns this answer.
    pub fn with_extraction(self, extraction: AiExtraction) -> Self {
        self.state.write().unwrap().extraction = Some(extraction);
        self
    }

    /// Every extract call fails with a provider error.
    pub fn failing(message: impl Into<String>) -> Self {
        let mock = Self::new();
        mock.state.write().unwrap().fail_with = Some(message.into());
        mock
    }

    pub fn with_search_results(self, urls: Vec<String>) -> Self {
        self.state.write().unwrap().search_results = urls;
        self
    }

    pub fn extract_calls(&self) -> usize {
        self.state.read().unwrap().extract_calls
    }

    pub fn search_calls(&self) -> usize {
        self.state.read().unwrap().search_calls
    }

    /// Requests observed by `extract`, in call order.
    pub fn requests(&self) -> Vec<AiRequest> {
        self.state.read().unwrap().requests.clone()
    }
}

#[async_trait]
impl AiProvider for MockAi {
    async fn extract(&self, request: &AiRequest) -> AiResult<AiExtraction> {
        let mut state = self.state.write().unwrap();
        state.extract_calls += 1;
        state.requests.push(request.clone());
        if let Some(message) = &state.fail_with {
            return Err(AiError::Provider(message.clone()));
        }
        state
            .extraction
            .clone()
            .ok_or_else(|| AiError::MalformedResponse("no scripted extraction".into()))
    }

    async fn search(&self, _query: &str, top_n: usize) -> AiResult<Vec<String>> {
        let mut state = self.state.write().unwrap();
        state.search_calls += 1;
        Ok(state.search_results.iter().take(top_n).cloned().collect())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A minimal valid configuration: one navigate step plus a required
/// `name` selector and an optional `description` selector.
pub fn sample_config() -> ScraperConfig {
    ScraperConfig {
        name: "demo-site".to_string(),
        base_url: "https://shop.example.com/products/{sku}".to_string(),
        timeout_secs: 1,
        retries: 2,
        selectors: vec![
            Selector::css("name", ".product-name").required(),
            Selector::css("description", ".product-description"),
        ],
        workflow: vec![WorkflowStep::new("navigate")],
        anti_detection: None,
        ai: None,
        default_currency: "USD".to_string(),
        max_images: 8,
    }
}

/// Context over a default mock browser, no AI, no telemetry.
pub fn context_for_tests(config: ScraperConfig, target_id: &str) -> ScraperContext {
    context_with(config, target_id, MockBrowser::new(), None)
}

/// Context with explicit browser and AI doubles.
pub fn context_with(
    config: ScraperConfig,
    target_id: &str,
    browser: MockBrowser,
    ai: Option<MockAi>,
) -> ScraperContext {
    build_context(config, target_id, browser, ai, Arc::new(NullSink))
}

/// Context that records events into the given sink.
pub fn context_with_events(
    config: ScraperConfig,
    target_id: &str,
    browser: MockBrowser,
    events: Arc<BufferSink>,
) -> ScraperContext {
    build_context(config, target_id, browser, None, events)
}

fn build_context(
    config: ScraperConfig,
    target_id: &str,
    browser: MockBrowser,
    ai: Option<MockAi>,
    events: Arc<dyn EventSink>,
) -> ScraperContext {
    ScraperContext::new(
        Uuid::new_v4(),
        target_id.to_string(),
        Arc::new(config),
        Arc::new(browser),
        events,
        ai.map(|a| Arc::new(a) as Arc<dyn AiProvider>),
        Arc::new(AiGuard::default()),
        CancellationToken::new(),
    )
}
