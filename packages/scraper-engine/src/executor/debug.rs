//! Failure-time page capture for offline debugging.

use crate::context::ScraperContext;
use crate::events::EngineEvent;

/// Capture what the page looked like when a step gave up: the current
/// URL and, when the session supports it, a screenshot. Capture is
/// best-effort; a browser that is already gone must not turn a step
/// failure into a second failure.
pub async fn capture_failure(ctx: &mut ScraperContext, step_index: usize, action: &str) {
    let url = ctx.browser.current_url().await.ok();
    let screenshot = ctx.browser.screenshot().await.ok().flatten();
    let has_screenshot = screenshot.is_some();

    if let Some(bytes) = &screenshot {
        tracing::debug!(
            step_index,
            action,
            bytes = bytes.len(),
            "captured failure screenshot"
        );
    }
    let page_source = match ctx.browser.page_source().await {
        Ok(source) => {
            tracing::debug!(step_index, action, chars = source.len(), "captured page source");
            Some(truncate_to(source, MAX_SOURCE_CHARS))
        }
        Err(err) => {
            tracing::debug!(step_index, action, %err, "page source unavailable");
            None
        }
    };

    ctx.emit(EngineEvent::DebugCaptured {
        step_index,
        action: action.to_string(),
        url,
        has_screenshot,
        page_source,
    });
}

/// Cap on the markup snapshot attached to the failure event.
const MAX_SOURCE_CHARS: usize = 64 * 1024;

fn truncate_to(mut source: String, max_chars: usize) -> String {
    if let Some((boundary, _)) = source.char_indices().nth(max_chars) {
        source.truncate(boundary);
    }
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BufferSink, EngineEvent};
    use crate::testing::{context_with_events, sample_config, MockBrowser};
    use std::sync::Arc;

    #[tokio::test]
    async fn capture_emits_event_even_without_screenshot() {
        let sink = Arc::new(BufferSink::default());
        let browser = MockBrowser::new().with_page_source("<html><body>gone</body></html>");
        let mut ctx = context_with_events(sample_config(), "SKU-1", browser, sink.clone());
        capture_failure(&mut ctx, 2, "extract").await;

        let captured = sink
            .events()
            .into_iter()
            .find_map(|e| match e.event {
                EngineEvent::DebugCaptured {
                    step_index,
                    has_screenshot,
                    page_source,
                    ..
                } => Some((step_index, has_screenshot, page_source)),
                _ => None,
            })
            .unwrap();
        assert_eq!(captured.0, 2);
        assert!(!captured.1);
        // The markup snapshot rides on the event itself.
        assert_eq!(captured.2.as_deref(), Some("<html><body>gone</body></html>"));
    }

    #[test]
    fn oversized_snapshots_are_capped() {
        let big = "x".repeat(MAX_SOURCE_CHARS + 100);
        assert_eq!(truncate_to(big, MAX_SOURCE_CHARS).len(), MAX_SOURCE_CHARS);
        assert_eq!(truncate_to("short".into(), MAX_SOURCE_CHARS), "short");
    }
}
