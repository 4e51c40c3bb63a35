//! Core trait abstractions (Browser, AiProvider).

pub mod ai;
pub mod browser;

pub use ai::{AiExtraction, AiProvider, AiRequest, TokenUsage};
pub use browser::{Browser, Element, NavigationOutcome};
