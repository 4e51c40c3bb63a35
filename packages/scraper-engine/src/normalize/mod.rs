//! Canonicalization of accumulated raw fields into the stable record.
//!
//! Raw results are whatever the selectors and the AI tier produced:
//! strings with currency markers and MSRPs, badge text, relative image
//! paths, breadcrumbs. This module is the single place that turns them
//! into [`CanonicalRecord`]; it is pure and total, so a half-filled raw
//! map still yields a well-formed (if sparse) record.

pub mod availability;
pub mod images;
pub mod price;
pub mod text;

use indexmap::IndexMap;
use serde_json::Value;
use url::Url;

use crate::types::{CanonicalRecord, ScraperConfig};

pub use availability::derive as derive_availability;
pub use images::normalize_images;
pub use price::parse_price;
pub use text::{clean_text, split_categories};

/// Build the canonical record from raw accumulated fields.
///
/// Field conventions: `name` (or `title`), `brand`, `price`,
/// `availability` (badge text), `add_to_cart_enabled`,
/// `availability_structured`, `images` (array or single string, also
/// `image`), `description`, `categories` (array) or `breadcrumb`.
pub fn canonicalize(raw: &IndexMap<String, Value>, config: &ScraperConfig) -> CanonicalRecord {
    let str_field = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| raw.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    let name = str_field(&["name", "title"]).and_then(|v| clean_text(&v));
    let brand = str_field(&["brand"]).and_then(|v| clean_text(&v));
    let description = str_field(&["description"]).and_then(|v| clean_text(&v));

    let price = str_field(&["price"])
        .and_then(|v| parse_price(&v, &config.default_currency))
        .or_else(|| {
            raw.get("price")
                .and_then(Value::as_f64)
                .and_then(|n| parse_price(&format!("{n:.2}"), &config.default_currency))
        });

    let availability = derive_availability(
        str_field(&["availability", "stock_status"]).as_deref(),
        raw.get("add_to_cart_enabled").and_then(Value::as_bool),
        str_field(&["availability_structured"]).as_deref(),
    );

    let base = Url::parse(&config.base_url).ok();
    let raw_images = collect_strings(raw, &["images", "image"]);
    let images = normalize_images(&raw_images, base.as_ref(), config.max_images);

    let categories = match raw.get("categories").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(clean_text)
            .collect(),
        None => str_field(&["breadcrumb", "categories"])
            .map(|v| split_categories(&v))
            .unwrap_or_default(),
    };

    CanonicalRecord {
        name,
        brand,
        price,
        availability,
        images,
        description,
        categories,
    }
}

/// Gather strings from the first present key, whether it holds a single
/// string or an array of them.
fn collect_strings(raw: &IndexMap<String, Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match raw.get(*key) {
            Some(Value::String(s)) => return vec![s.clone()],
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }
            _ => continue,
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_config;
    use crate::types::Availability;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    fn raw(pairs: Value) -> IndexMap<String, Value> {
        match pairs {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("raw fields must be an object"),
        }
    }

    #[test]
    fn full_record_from_messy_raw_fields() {
        let record = canonicalize(
            &raw(json!({
                "name": "  Widget&nbsp;Pro ",
                "brand": "ACME",
                "price": "$14.45 (was $19.99)",
                "availability": "In Stock",
                "add_to_cart_enabled": true,
                "images": ["//cdn.example.com/hero.jpg", "/img/alt.jpg"],
                "description": "A  very\ngood   widget",
                "breadcrumb": "Home > Tools > Widgets"
            })),
            &sample_config(),
        );
        assert_eq!(record.name.as_deref(), Some("Widget Pro"));
        assert_eq!(record.brand.as_deref(), Some("ACME"));
        let price = record.price.unwrap();
        assert_eq!(price.amount, Decimal::from_str("14.45").unwrap());
        assert_eq!(record.availability, Availability::InStock);
        assert_eq!(record.images.len(), 2);
        assert!(record.images[0].starts_with("https://cdn.example.com"));
        assert_eq!(record.description.as_deref(), Some("A very good widget"));
        assert_eq!(record.categories, ["Tools", "Widgets"]);
    }

    #[test]
    fn sparse_raw_fields_yield_sparse_record() {
        let record = canonicalize(&raw(json!({"name": "Widget"})), &sample_config());
        assert_eq!(record.name.as_deref(), Some("Widget"));
        assert!(record.price.is_none());
        assert_eq!(record.availability, Availability::Unknown);
        assert!(record.images.is_empty());
    }

    #[test]
    fn numeric_price_value() {
        let record = canonicalize(&raw(json!({"price": 9.5})), &sample_config());
        assert_eq!(
            record.price.unwrap().amount,
            Decimal::from_str("9.50").unwrap()
        );
    }

    #[test]
    fn title_falls_back_for_name() {
        let record = canonicalize(&raw(json!({"title": "Widget"})), &sample_config());
        assert_eq!(record.name.as_deref(), Some("Widget"));
    }
}
