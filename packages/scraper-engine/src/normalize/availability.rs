//! Stock-state mapping from heterogeneous page signals.

use crate::types::Availability;

/// Derive availability from up to three signals, in precedence order:
/// visible stock badge text, then add-to-cart button state, then
/// structured data (schema.org `availability` values). Signals that are
/// absent or unrecognized fall through to the next.
pub fn derive(
    badge_text: Option<&str>,
    cart_enabled: Option<bool>,
    structured: Option<&str>,
) -> Availability {
    if let Some(state) = badge_text.and_then(from_badge) {
        return state;
    }
    if let Some(enabled) = cart_enabled {
        return if enabled {
            Availability::InStock
        } else {
            Availability::OutOfStock
        };
    }
    if let Some(state) = structured.and_then(from_structured) {
        return state;
    }
    Availability::Unknown
}

/// Map visible badge text. Negative phrases are checked first because
/// "out of stock" contains "stock".
fn from_badge(text: &str) -> Option<Availability> {
    let text = text.to_lowercase();
    if text.is_empty() {
        return None;
    }
    const OUT: &[&str] = &["out of stock", "sold out", "unavailable", "currently not available"];
    const LIMITED: &[&str] = &["limited", "low stock", "almost gone", "few left", "left in stock", "hurry"];
    const IN: &[&str] = &["in stock", "available", "ships", "add to cart", "ready to ship"];

    if OUT.iter().any(|p| text.contains(p)) {
        return Some(Availability::OutOfStock);
    }
    if LIMITED.iter().any(|p| text.contains(p)) {
        return Some(Availability::Limited);
    }
    if IN.iter().any(|p| text.contains(p)) {
        return Some(Availability::InStock);
    }
    None
}

/// Map schema.org availability URLs/tokens, e.g.
/// `https://schema.org/InStock` or a bare `InStock`.
fn from_structured(value: &str) -> Option<Availability> {
    let token = value
        .rsplit('/')
        .next()
        .unwrap_or(value)
        .to_lowercase();
    match token.as_str() {
        "instock" | "onlineonly" | "instoreonly" => Some(Availability::InStock),
        "outofstock" | "soldout" | "discontinued" => Some(Availability::OutOfStock),
        "limitedavailability" | "preorder" | "backorder" => Some(Availability::Limited),
        _ => None,
    }
}
