//! End-to-end workflow runs against scripted browser and AI doubles.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use scraper_engine::events::{BufferSink, EngineEvent};
use scraper_engine::testing::{MockAi, MockBrowser};
use scraper_engine::traits::{AiExtraction, Element, TokenUsage};
use scraper_engine::types::{AiConfig, Availability, Selector, Tier, WorkflowStep};
use scraper_engine::{ActionRegistry, AiGuard, ScrapeStatus, ScraperConfig, WorkflowExecutor};

fn product_config() -> ScraperConfig {
    ScraperConfig {
        name: "demo-shop".to_string(),
        base_url: "https://shop.example.com/p/{sku}".to_string(),
        timeout_secs: 1,
        retries: 3,
        selectors: vec![
            Selector::css("name", ".product-name").required(),
            Selector::css("price", ".price").required(),
            Selector::css("description", ".description"),
        ],
        workflow: vec![
            WorkflowStep::new("navigate"),
            WorkflowStep::new("extract").with_param(
                "fields",
                json!({"name": "name", "price": "price", "description": "description"}),
            ),
        ],
        anti_detection: None,
        ai: None,
        default_currency: "USD".to_string(),
        max_images: 8,
    }
}

fn stocked_browser() -> MockBrowser {
    MockBrowser::new()
        .with_elements(".product-name", vec![Element::with_text("Widget Pro")])
        .with_elements(".price", vec![Element::with_text("$14.45 (was $19.99)")])
        .with_elements(".description", vec![Element::with_text("A good widget")])
}

fn executor(sink: Arc<BufferSink>) -> WorkflowExecutor {
    WorkflowExecutor::new(
        Arc::new(ActionRegistry::builtin().unwrap()),
        Arc::new(AiGuard::default()),
    )
    .with_events(sink)
}

#[tokio::test]
async fn happy_path_completes_with_normalized_record() {
    let sink = Arc::new(BufferSink::new());
    let browser = stocked_browser();
    let result = executor(sink.clone())
        .run(
            Arc::new(product_config()),
            "SKU-1",
            Arc::new(browser.clone()),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, ScrapeStatus::Completed);
    assert!(result.is_complete());
    assert_eq!(result.record.name.as_deref(), Some("Widget Pro"));
    let price = result.record.price.as_ref().unwrap();
    assert_eq!(price.amount, Decimal::new(1445, 2));
    assert_eq!(price.currency, "USD");
    assert_eq!(result.provenance.get("price"), Some(&Tier::Deterministic));
    assert_eq!(result.metadata.total_steps, 2);
    assert_eq!(result.metadata.steps_executed, 2);

    // Navigation was templated with the target id.
    assert_eq!(
        browser.last_navigated_url().as_deref(),
        Some("https://shop.example.com/p/SKU-1")
    );
    // The session is released on the way out.
    assert!(browser.is_closed());

    let events = sink.events();
    assert!(matches!(events[0].event, EngineEvent::RunStarted { .. }));
    assert!(matches!(
        events.last().unwrap().event,
        EngineEvent::RunCompleted {
            status: ScrapeStatus::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn missing_required_field_is_failed_not_silent_success() {
    let sink = Arc::new(BufferSink::new());
    // Price never appears; everything else resolves.
    let browser = MockBrowser::new()
        .with_elements(".product-name", vec![Element::with_text("Widget Pro")])
        .with_elements(".description", vec![Element::with_text("A good widget")]);
    let result = executor(sink.clone())
        .run(
            Arc::new(product_config()),
            "SKU-1",
            Arc::new(browser.clone()),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, ScrapeStatus::Failed);
    assert!(!result.is_complete());
    assert_eq!(result.missing_fields, ["price"]);
    assert_eq!(result.record.name.as_deref(), Some("Widget Pro"));
    assert_eq!(result.step_errors.len(), 1);
    assert!(!result.step_errors[0].retryable);
    assert!(browser.is_closed());
}

#[tokio::test(start_paused = true)]
async fn transient_navigation_failures_are_retried_until_success() {
    let sink = Arc::new(BufferSink::new());
    let browser = stocked_browser().with_transient_navigation_failures(2);
    let result = executor(sink.clone())
        .run(
            Arc::new(product_config()),
            "SKU-1",
            Arc::new(browser.clone()),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, ScrapeStatus::Completed);
    assert_eq!(browser.navigation_count(), 3);
    assert_eq!(result.metadata.retry_total, 2);
    assert_eq!(
        sink.count_matching(|e| matches!(e, EngineEvent::StepRetrying { .. })),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn retries_exhausted_surfaces_retryable_step_error() {
    let sink = Arc::new(BufferSink::new());
    let browser = stocked_browser().with_transient_navigation_failures(10);
    let result = executor(sink.clone())
        .run(
            Arc::new(product_config()),
            "SKU-1",
            Arc::new(browser.clone()),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, ScrapeStatus::Failed);
    // Global retries = 3 attempts, never a fourth.
    assert_eq!(browser.navigation_count(), 3);
    assert_eq!(result.step_errors.len(), 1);
    assert!(result.step_errors[0].retryable);
    assert!(browser.is_closed());
    assert_eq!(
        sink.count_matching(|e| matches!(e, EngineEvent::RunFailed { .. })),
        1
    );
}

#[tokio::test]
async fn conditional_skip_stops_remaining_steps() {
    let sink = Arc::new(BufferSink::new());
    let mut config = product_config();
    config
        .selectors
        .push(Selector::css("discontinued_banner", ".discontinued"));
    config.workflow = vec![
        WorkflowStep::new("navigate"),
        WorkflowStep::new("conditional_skip")
            .with_param("selector", "discontinued_banner")
            .with_param("when", "found"),
        WorkflowStep::new("extract").with_param("fields", json!({"name": "name"})),
    ];
    let browser = stocked_browser()
        .with_elements(".discontinued", vec![Element::with_text("Discontinued")]);

    let result = executor(sink.clone())
        .run(
            Arc::new(config),
            "SKU-1",
            Arc::new(browser),
            CancellationToken::new(),
        )
        .await;

    // Extraction never ran, so required fields are missing and the run
    // is reported incomplete rather than silently successful.
    assert_eq!(result.metadata.steps_executed, 2);
    assert_eq!(result.status, ScrapeStatus::Failed);
    assert!(result.missing_fields.contains(&"name".to_string()));
    assert!(result.raw_fields.get("name").is_none());
}

#[tokio::test]
async fn ai_fallback_fills_gaps_with_provenance() {
    let sink = Arc::new(BufferSink::new());
    let mut config = product_config();
    config.selectors = vec![
        Selector::css("name", ".product-name").required(),
        Selector::css("price", ".price"),
    ];
    config.workflow = vec![
        WorkflowStep::new("navigate"),
        WorkflowStep::new("extract").with_param("fields", json!({"name": "name", "price": "price"})),
        WorkflowStep::new("ai_extract"),
    ];
    config.ai = Some(AiConfig {
        task: "extract product name and price".into(),
        required_fields: vec!["name".into(), "price".into()],
        ..AiConfig::default()
    });

    // Deterministic tier finds the name but not the price.
    let browser = MockBrowser::new()
        .with_elements(".product-name", vec![Element::with_text("Widget Pro")]);
    let ai = MockAi::new().with_extraction(AiExtraction {
        fields: [
            ("name".to_string(), json!("Widget Pro")),
            ("price".to_string(), json!("$9.99")),
        ]
        .into_iter()
        .collect(),
        confidence: 0.9,
        usage: TokenUsage {
            input_tokens: 2000,
            output_tokens: 300,
        },
    });

    let result = WorkflowExecutor::new(
        Arc::new(ActionRegistry::builtin().unwrap()),
        Arc::new(AiGuard::default()),
    )
    .with_events(sink.clone())
    .with_ai(Arc::new(ai.clone()))
    .run(
        Arc::new(config),
        "SKU-1",
        Arc::new(browser),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, ScrapeStatus::Completed);
    assert_eq!(result.provenance.get("name"), Some(&Tier::Deterministic));
    assert_eq!(result.provenance.get("price"), Some(&Tier::Ai));
    assert_eq!(
        result.record.price.as_ref().unwrap().amount,
        Decimal::new(999, 2)
    );
    assert!(result.metadata.ai_spend_usd > 0.0);
    assert_eq!(ai.extract_calls(), 1);
    assert_eq!(
        sink.count_matching(|e| matches!(e, EngineEvent::AiAccepted { .. })),
        1
    );
}

#[tokio::test]
async fn ai_rejection_leaves_result_explicitly_incomplete() {
    let sink = Arc::new(BufferSink::new());
    let mut config = product_config();
    config.workflow = vec![
        WorkflowStep::new("navigate"),
        WorkflowStep::new("extract").with_param("fields", json!({"name": "name", "price": "price"})),
    ];
    config.selectors = vec![
        Selector::css("name", ".product-name").required(),
        Selector::css("price", ".price"),
    ];
    config.workflow.push(WorkflowStep::new("ai_extract"));
    config.ai = Some(AiConfig {
        task: "extract".into(),
        required_fields: vec!["price".into()],
        ..AiConfig::default()
    });

    let browser = MockBrowser::new()
        .with_elements(".product-name", vec![Element::with_text("Widget Pro")]);
    let ai = MockAi::failing("provider unavailable");

    let result = WorkflowExecutor::new(
        Arc::new(ActionRegistry::builtin().unwrap()),
        Arc::new(AiGuard::default()),
    )
    .with_events(sink.clone())
    .with_ai(Arc::new(ai))
    .run(
        Arc::new(config),
        "SKU-1",
        Arc::new(browser),
        CancellationToken::new(),
    )
    .await;

    // The run carries on after the rejected escalation, but the missing
    // required field keeps it out of Completed.
    assert_eq!(result.status, ScrapeStatus::Failed);
    assert!(result.missing_fields.contains(&"price".to_string()));
    assert_eq!(
        sink.count_matching(|e| matches!(e, EngineEvent::AiRejected { .. })),
        1
    );
}

#[tokio::test]
async fn cancellation_releases_the_session() {
    let sink = Arc::new(BufferSink::new());
    let browser = stocked_browser();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = executor(sink.clone())
        .run(
            Arc::new(product_config()),
            "SKU-1",
            Arc::new(browser.clone()),
            cancel,
        )
        .await;

    assert_eq!(result.status, ScrapeStatus::Failed);
    assert!(browser.is_closed());
    assert_eq!(
        sink.count_matching(|e| matches!(e, EngineEvent::RunCancelled)),
        1
    );
}

#[tokio::test]
async fn events_carry_correlation_ids_and_schema_version() {
    let sink = Arc::new(BufferSink::new());
    let result = executor(sink.clone())
        .run(
            Arc::new(product_config()),
            "SKU-7",
            Arc::new(stocked_browser()),
            CancellationToken::new(),
        )
        .await;

    for envelope in sink.events() {
        assert_eq!(envelope.schema_version, 2);
        assert_eq!(envelope.run_id, result.run_id);
        assert_eq!(envelope.scraper, "demo-shop");
        assert_eq!(envelope.target.as_deref(), Some("SKU-7"));
    }
}

#[test]
fn config_parse_rejects_dangling_selector_reference() {
    let registry = ActionRegistry::builtin().unwrap();
    let raw = json!({
        "name": "demo-shop",
        "base_url": "https://shop.example.com/p/{sku}",
        "selectors": [
            {"name": "name", "expression": ".product-name", "required": true}
        ],
        "workflow": [
            {"action": "navigate"},
            {"action": "extract", "params": {"fields": {"price": "price"}}}
        ]
    })
    .to_string();

    let err = ScraperConfig::parse(&raw, &registry).unwrap_err();
    assert!(err.to_string().contains("price"));
}

#[test]
fn config_parse_accepts_a_complete_document() {
    let registry = ActionRegistry::builtin().unwrap();
    let raw = json!({
        "name": "demo-shop",
        "base_url": "https://shop.example.com/p/{sku}",
        "timeout_secs": 5,
        "retries": 2,
        "selectors": [
            {"name": "name", "expression": ".product-name", "required": true},
            {"name": "image", "expression": "img.hero", "target": {"attribute": "src"}}
        ],
        "workflow": [
            {"action": "navigate", "params": {"wait_after_ms": 100}},
            {"action": "extract", "params": {"fields": {"name": "name", "image": "image"}}}
        ],
        "ai": {
            "task": "extract product details",
            "confidence_threshold": 0.5,
            "required_fields": ["name"]
        }
    })
    .to_string();

    let config = ScraperConfig::parse(&raw, &registry).unwrap();
    assert_eq!(config.ai.as_ref().unwrap().confidence_threshold, 0.5);
    assert_eq!(config.workflow.len(), 2);
}

#[tokio::test]
async fn availability_from_page_signals() {
    let sink = Arc::new(BufferSink::new());
    let mut config = product_config();
    config.selectors.push(Selector::css("availability", ".stock-badge"));
    config.workflow = vec![
        WorkflowStep::new("navigate"),
        WorkflowStep::new("extract").with_param(
            "fields",
            json!({"name": "name", "price": "price", "availability": "availability"}),
        ),
    ];
    let browser = stocked_browser()
        .with_elements(".stock-badge", vec![Element::with_text("In Stock")]);

    let result = executor(sink)
        .run(
            Arc::new(config),
            "SKU-1",
            Arc::new(browser),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.record.availability, Availability::InStock);
}
