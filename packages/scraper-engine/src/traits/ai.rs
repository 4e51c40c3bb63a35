//! AI completion seam for the fallback tier.
//!
//! The model itself is a black-box text/vision completion service.
//! Implementations wrap a specific provider and handle prompting and
//! response parsing; the engine only sees structured fields, a confidence
//! score, and token usage.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::AiResult;

/// One extraction request handed to the provider.
#[derive(Debug, Clone)]
pub struct AiRequest {
    /// Task description from the scraper's AI configuration
    pub task: String,
    /// Model identifier
    pub model: String,
    /// Page the extraction should run against
    pub page_url: String,
    /// Target identifier (e.g. the SKU) for grounding
    pub target_id: String,
    /// Field names the caller wants filled
    pub fields: Vec<String>,
    /// Already-known values from the deterministic tier, as hints
    pub known_fields: IndexMap<String, Value>,
    /// Maximum reasoning steps the provider may take
    pub max_steps: u32,
}

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A structured extraction returned by the provider.
#[derive(Debug, Clone)]
pub struct AiExtraction {
    /// Extracted field values; missing fields are simply absent
    pub fields: IndexMap<String, Value>,
    /// Provider- or engine-computed confidence in [0, 1]
    pub confidence: f64,
    pub usage: TokenUsage,
}

/// AI completion capability.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Run one structured extraction against a page.
    async fn extract(&self, request: &AiRequest) -> AiResult<AiExtraction>;

    /// Locate candidate product-page URLs for a target, most relevant
    /// first. Used by the `ai_search` action; providers without a search
    /// capability return an empty list.
    async fn search(&self, query: &str, top_n: usize) -> AiResult<Vec<String>> {
        let _ = (query, top_n);
        Ok(Vec::new())
    }
}
