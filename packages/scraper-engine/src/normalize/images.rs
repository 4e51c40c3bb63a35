//! Image URL canonicalization.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

/// Path fragments that mark chrome assets rather than product photos.
const ASSET_MARKERS: &[&str] = &["icon", "sprite", "logo", "placeholder", "spacer", "badge"];

/// Path fragments that mark the primary/hero shot.
const PRIMARY_MARKERS: &[&str] = &["hero", "primary", "main", "zoom", "large"];

fn dimension_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,3})x(\d{1,3})")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Normalize raw image references into absolute, deduplicated URLs with
/// the primary/hero image first.
///
/// Protocol-relative references get `https:`, relative paths resolve
/// against `base`, and the list is capped at `max`. Dropped outright:
/// `data:` URIs, unresolvable values, and non-product assets (paths
/// naming icons/sprites/logos or carrying tiny pixel dimensions such as
/// `32x32`). Page order is otherwise preserved; when a later entry is
/// the only one marked hero/primary it moves to the front.
pub fn normalize_images(raw: &[String], base: Option<&Url>, max: usize) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for candidate in raw {
        let candidate = candidate.trim();
        if candidate.is_empty() || candidate.starts_with("data:") {
            continue;
        }
        let Some(absolute) = absolutize(candidate, base) else {
            continue;
        };
        if is_chrome_asset(&absolute) {
            continue;
        }
        if !seen.contains(&absolute) {
            seen.push(absolute);
        }
    }

    if let Some(primary) = seen.iter().position(|url| is_primary(url)) {
        if primary > 0 {
            let hero = seen.remove(primary);
            seen.insert(0, hero);
        }
    }

    seen.truncate(max);
    seen
}

fn absolutize(candidate: &str, base: Option<&Url>) -> Option<String> {
    if let Some(rest) = candidate.strip_prefix("//") {
        return Url::parse(&format!("https://{rest}")).ok().map(String::from);
    }
    if let Ok(url) = Url::parse(candidate) {
        return match url.scheme() {
            "http" | "https" => Some(url.into()),
            _ => None,
        };
    }
    base.and_then(|b| b.join(candidate).ok()).map(String::from)
}

/// Whether a resolved URL names a page-chrome asset rather than a
/// product photo: a marker word in the path, or pixel dimensions at
/// thumbnail scale (both sides 64 or under).
fn is_chrome_asset(url: &str) -> bool {
    let path = path_of(url).to_lowercase();
    if ASSET_MARKERS.iter().any(|m| path.contains(m)) {
        return true;
    }
    if let Some(caps) = dimension_pattern().captures(&path) {
        let w: u32 = caps[1].parse().unwrap_or(u32::MAX);
        let h: u32 = caps[2].parse().unwrap_or(u32::MAX);
        return w <= 64 && h <= 64;
    }
    false
}

fn is_primary(url: &str) -> bool {
    let path = path_of(url).to_lowercase();
    PRIMARY_MARKERS.iter().any(|m| path.contains(m))
}

/// The path component, so marker words in the host never match.
fn path_of(url: &str) -> &str {
    url.split_once("://")
        .map(|(_, rest)| rest.split_once('/').map_or("", |(_, path)| path))
        .unwrap_or(url)
}
