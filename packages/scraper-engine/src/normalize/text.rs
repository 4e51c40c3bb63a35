//! Text field cleanup.

/// HTML entities that survive into scraped text often enough to matter.
const ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&nbsp;", " "),
];

/// Collapse whitespace, decode common entities, and trim. Returns `None`
/// when nothing remains.
pub fn clean_text(raw: &str) -> Option<String> {
    let mut text = raw.to_string();
    for (entity, replacement) in ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, replacement);
        }
    }
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Split a breadcrumb or category string into individual categories.
/// Handles `>`, `/`, `|`, and `»` separators and drops generic root
/// crumbs like "Home".
pub fn split_categories(raw: &str) -> Vec<String> {
    raw.split(['>', '/', '|', '»'])
        .filter_map(clean_segment)
        .collect()
}

fn clean_segment(segment: &str) -> Option<String> {
    let cleaned = clean_text(segment)?;
    let lower = cleaned.to_lowercase();
    if lower == "home" || lower == "all" || lower == "shop" {
        return None;
    }
    Some(cleaned)
}
