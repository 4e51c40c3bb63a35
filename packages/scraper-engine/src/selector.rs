//! Selector resolution: locate elements and extract values.
//!
//! Three outcomes are kept distinct on purpose: a value was found; the
//! element is legitimately absent ([`Resolution::NotFound`]); or resolution
//! timed out (an infrastructure failure, eligible for retry). Collapsing
//! absence into timeout would make the retry layer hammer pages for
//! elements that were never there.

use std::time::Duration;

use regex::Regex;

use crate::error::{BrowserError, EngineError, Result, SelectorError};
use crate::traits::browser::{Browser, Element};
use crate::types::{Selector, Transform, ValueTarget};

/// Outcome of resolving one selector against a live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Ordered extracted values, one per matched element; callers decide
    /// whether to take the first or all matches
    Found(Vec<String>),
    /// The element is stably absent, a first-class outcome rather than an error
    NotFound,
}

impl Resolution {
    /// First extracted value, if any.
    pub fn first(&self) -> Option<&str> {
        match self {
            Resolution::Found(values) => values.first().map(|s| s.as_str()),
            Resolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Resolve a selector against a page, waiting up to `timeout` for the
/// element to appear.
pub async fn resolve(
    selector: &Selector,
    browser: &dyn Browser,
    timeout: Duration,
) -> Result<Resolution> {
    // Fast path: already present.
    let mut elements = browser.query(&selector.expression, selector.kind).await?;

    if elements.is_empty() {
        match browser
            .wait_for(&selector.expression, selector.kind, timeout)
            .await
        {
            Ok(true) => {
                elements = browser.query(&selector.expression, selector.kind).await?;
            }
            Ok(false) => return Ok(Resolution::NotFound),
            Err(BrowserError::Timeout { .. }) => {
                return Err(EngineError::Selector(SelectorError::Timeout {
                    name: selector.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }));
            }
            Err(other) => return Err(other.into()),
        }
    }

    let mut values = Vec::with_capacity(elements.len());
    for element in &elements {
        if let Some(raw) = extract_value(element, &selector.target) {
            let transformed = apply_transforms(&raw, &selector.transforms, &selector.name)?;
            if !transformed.is_empty() {
                values.push(transformed);
            }
        }
    }

    if values.is_empty() {
        Ok(Resolution::NotFound)
    } else {
        Ok(Resolution::Found(values))
    }
}

/// Read the targeted value off an element snapshot.
fn extract_value(element: &Element, target: &ValueTarget) -> Option<String> {
    match target {
        ValueTarget::Text => {
            let text = element.text.trim();
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }
        ValueTarget::Attribute(name) => element.attributes.get(name).cloned(),
        ValueTarget::StructuredList => structured_value(&element.text),
    }
}

/// Canonical JSON rendering of a structured block: valid JSON (an
/// `application/ld+json` script body, say) passes through re-serialized;
/// table-like text becomes an array of its non-empty row strings.
fn structured_value(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return serde_json::to_string(&value).ok();
    }
    let rows: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|row| !row.is_empty())
        .collect();
    serde_json::to_string(&rows).ok()
}

/// Apply a transform chain in declared order.
pub fn apply_transforms(
    value: &str,
    transforms: &[Transform],
    selector_name: &str,
) -> Result<String> {
    let mut current = value.to_string();
    for transform in transforms {
        current = apply_one(&current, transform).map_err(|reason| {
            EngineError::Selector(SelectorError::Transform {
                name: selector_name.to_string(),
                reason,
            })
        })?;
    }
    Ok(current)
}

fn apply_one(value: &str, transform: &Transform) -> std::result::Result<String, String> {
    Ok(match transform {
        Transform::Trim => value.trim().to_string(),
        Transform::Lowercase => value.to_lowercase(),
        Transform::Uppercase => value.to_uppercase(),
        Transform::RemovePrefix { prefix } => value
            .strip_prefix(prefix.as_str())
            .unwrap_or(value)
            .trim_start()
            .to_string(),
        Transform::RemoveSuffix { suffix } => value
            .strip_suffix(suffix.as_str())
            .unwrap_or(value)
            .trim_end()
            .to_string(),
        Transform::Replace { from, to } => value.replace(from.as_str(), to.as_str()),
        Transform::RegexReplace {
            pattern,
            replacement,
        } => {
            let re = Regex::new(pattern).map_err(|e| format!("bad pattern: {e}"))?;
            re.replace_all(value, replacement.as_str()).into_owned()
        }
        Transform::RegexExtract { pattern, group } => {
            let re = Regex::new(pattern).map_err(|e| format!("bad pattern: {e}"))?;
            match re.captures(value).and_then(|c| c.get(*group)) {
                Some(m) => m.as_str().to_string(),
                None => value.to_string(),
            }
        }
        Transform::ParseNumber => {
            let re = Regex::new(r"(\d+(?:\.\d+)?)").map_err(|e| format!("bad pattern: {e}"))?;
            match re.captures(value).and_then(|c| c.get(1)) {
                Some(m) => {
                    let n: f64 = m
                        .as_str()
                        .parse()
                        .map_err(|e| format!("not a number: {e}"))?;
                    format!("{n:.2}")
                }
                None => return Err(format!("no number in '{value}'")),
            }
        }
    })
}
