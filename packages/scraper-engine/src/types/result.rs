//! The canonical output record of one scrape run.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Terminal state of one run.
///
/// Never a bare boolean: partial success is explicit, and the non-success
/// states always carry the field or step names that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    /// All required fields present
    Completed,
    /// Required fields present, one or more optional fields missing
    PartiallyCompleted,
    /// A required field is missing or a step failed without recovery
    Failed,
}

/// Which extraction tier produced a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Deterministic,
    Ai,
}

/// A normalized price: decimal amount plus explicit currency code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Decimal,
    pub currency: String,
    /// Set when the raw text carried several live prices (a range or a
    /// multi-pack) and no strike-through marker disambiguated them; the
    /// amount is then the first listed, not a verified unit price
    #[serde(default)]
    pub ambiguous: bool,
}

impl Price {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            ambiguous: false,
        }
    }

    pub fn ambiguous(mut self) -> Self {
        self.ambiguous = true;
        self
    }
}

/// Closed availability enum; raw signals map into this via a fixed
/// precedence order (see [`crate::normalize::availability`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    OutOfStock,
    Limited,
    Unknown,
}

/// The normalized, schema-stable product record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub name: Option<String>,
    pub brand: Option<String>,
    pub price: Option<Price>,
    #[serde(default = "default_availability")]
    pub availability: Availability,
    /// Ordered by relevance; primary/hero image first
    #[serde(default)]
    pub images: Vec<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

fn default_availability() -> Availability {
    Availability::Unknown
}

impl Default for Availability {
    fn default() -> Self {
        Availability::Unknown
    }
}

/// A step failure captured in the final result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub step_index: usize,
    pub action: String,
    pub error: String,
    pub retryable: bool,
}

/// Run timing and bookkeeping metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps_executed: usize,
    pub total_steps: usize,
    pub retry_total: u32,
    pub ai_spend_usd: f64,
}

/// The result of one workflow run for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub run_id: Uuid,
    pub scraper: String,
    pub target_id: String,
    pub status: ScrapeStatus,
    pub record: CanonicalRecord,
    /// Raw accumulated results, pre-normalization
    pub raw_fields: IndexMap<String, Value>,
    /// Required fields that never resolved; non-empty unless Completed
    pub missing_fields: Vec<String>,
    /// Optional fields that were requested but absent
    pub missing_optional: Vec<String>,
    /// Which tier produced each field
    pub provenance: IndexMap<String, Tier>,
    pub step_errors: Vec<StepError>,
    pub metadata: RunMetadata,
}

impl ScrapeResult {
    /// Whether the run may be reported as fully successful.
    ///
    /// Guards the central invariant: a result with missing required fields
    /// is never `Completed`.
    pub fn is_complete(&self) -> bool {
        self.status == ScrapeStatus::Completed && self.missing_fields.is_empty()
    }

    /// Compute the status implied by the missing-field sets and step errors.
    pub fn derive_status(
        missing_required: &[String],
        missing_optional: &[String],
        fatal_step_failure: bool,
    ) -> ScrapeStatus {
        if !missing_required.is_empty() || fatal_step_failure {
            ScrapeStatus::Failed
        } else if !missing_optional.is_empty() {
            ScrapeStatus::PartiallyCompleted
        } else {
            ScrapeStatus::Completed
        }
    }
}
