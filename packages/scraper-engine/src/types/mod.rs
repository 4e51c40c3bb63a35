//! Data types for the workflow engine.

pub mod config;
pub mod result;

pub use config::{
    AiConfig, AntiDetectionConfig, ScraperConfig, Selector, SelectorKind, Transform, ValueTarget,
    WorkflowStep,
};
pub use result::{
    Availability, CanonicalRecord, Price, RunMetadata, ScrapeResult, ScrapeStatus, StepError, Tier,
};
