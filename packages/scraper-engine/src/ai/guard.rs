//! Per-site spend ledger and circuit breaker for the AI tier.
//!
//! One [`AiGuard`] lives for the whole process and is shared by every
//! concurrent run. State is scoped per site name, not per run: a site
//! that keeps burning AI calls stays throttled no matter how many
//! targets are in flight. A mutex around the whole map is enough; AI
//! calls are rare relative to deterministic steps.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::traits::TokenUsage;

/// Tuning for the breaker. Defaults match production behavior: three
/// consecutive failures open the breaker for five minutes.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breaker {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct SiteState {
    breaker: Breaker,
    consecutive_failures: u32,
    page_spend_usd: f64,
    total_spend_usd: f64,
}

impl Default for SiteState {
    fn default() -> Self {
        Self {
            breaker: Breaker::Closed,
            consecutive_failures: 0,
            page_spend_usd: 0.0,
            total_spend_usd: 0.0,
        }
    }
}

/// Verdict on whether one AI call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Call permitted. `trial` is set when the breaker is half-open and
    /// this is the single trial after cooldown.
    Permitted { trial: bool },
    /// Breaker is open and the cooldown has not elapsed.
    BreakerOpen,
    /// The page's running spend has reached the configured ceiling.
    BudgetExceeded,
}

/// What happened to the breaker after a recorded failure.
#[derive(Debug, Clone, Copy)]
pub struct FailureOutcome {
    pub consecutive_failures: u32,
    /// Set when this failure opened (or re-opened) the breaker.
    pub opened: bool,
    pub cooldown_secs: u64,
}

#[derive(Debug, Default)]
pub struct AiGuard {
    config: GuardConfig,
    sites: Mutex<HashMap<String, SiteState>>,
}

impl AiGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            sites: Mutex::new(HashMap::new()),
        }
    }

    /// Reset the per-page spend counter. Called by the executor at the
    /// start of each run; breaker state and total spend carry over.
    pub fn begin_page(&self, site: &str) {
        let mut sites = self.lock();
        sites.entry(site.to_string()).or_default().page_spend_usd = 0.0;
    }

    /// Check whether one AI call may be made right now against the given
    /// per-page cost ceiling. Transitions an expired open breaker to
    /// half-open as a side effect.
    pub fn admit(&self, site: &str, page_ceiling_usd: f64) -> Admission {
        let mut sites = self.lock();
        let state = sites.entry(site.to_string()).or_default();

        let trial = match state.breaker {
            Breaker::Closed => false,
            Breaker::HalfOpen => true,
            Breaker::Open { until } => {
                if Instant::now() < until {
                    return Admission::BreakerOpen;
                }
                state.breaker = Breaker::HalfOpen;
                true
            }
        };

        if state.page_spend_usd >= page_ceiling_usd {
            return Admission::BudgetExceeded;
        }
        Admission::Permitted { trial }
    }

    /// Record a successful call and its cost. Returns true when the
    /// breaker was previously tripped and is now closed.
    pub fn record_success(&self, site: &str, cost_usd: f64) -> bool {
        let mut sites = self.lock();
        let state = sites.entry(site.to_string()).or_default();
        state.page_spend_usd += cost_usd;
        state.total_spend_usd += cost_usd;
        state.consecutive_failures = 0;
        let was_tripped = state.breaker != Breaker::Closed;
        state.breaker = Breaker::Closed;
        was_tripped
    }

    /// Record a failed call (cost still accrues; a rejected extraction
    /// was still paid for).
    pub fn record_failure(&self, site: &str, cost_usd: f64) -> FailureOutcome {
        let mut sites = self.lock();
        let state = sites.entry(site.to_string()).or_default();
        state.page_spend_usd += cost_usd;
        state.total_spend_usd += cost_usd;
        state.consecutive_failures += 1;

        // A failed half-open trial re-opens immediately regardless of
        // the failure count.
        let opened = state.breaker == Breaker::HalfOpen
            || (state.breaker == Breaker::Closed
                && state.consecutive_failures >= self.config.failure_threshold);
        if opened {
            state.breaker = Breaker::Open {
                until: Instant::now() + self.config.cooldown,
            };
        }
        FailureOutcome {
            consecutive_failures: state.consecutive_failures,
            opened,
            cooldown_secs: self.config.cooldown.as_secs(),
        }
    }

    /// Running spend for the current page.
    pub fn page_spend(&self, site: &str) -> f64 {
        self.lock()
            .get(site)
            .map(|s| s.page_spend_usd)
            .unwrap_or(0.0)
    }

    /// Lifetime spend for a site across all runs in this process.
    pub fn total_spend(&self, site: &str) -> f64 {
        self.lock()
            .get(site)
            .map(|s| s.total_spend_usd)
            .unwrap_or(0.0)
    }

    /// Manually clear breaker and failure state for a site. Spend totals
    /// are kept.
    pub fn reset(&self, site: &str) {
        let mut sites = self.lock();
        if let Some(state) = sites.get_mut(site) {
            state.breaker = Breaker::Closed;
            state.consecutive_failures = 0;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SiteState>> {
        // Poisoning only happens if a holder panicked; the map is still
        // structurally valid, so keep going.
        self.sites.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Price table in USD per million tokens: (input, output). Matched by
/// prefix, so longer names must come first.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-3.5-turbo", 0.50, 1.50),
    ("gpt-4", 30.00, 60.00),
];

/// Cost of one call for a model. Unknown models are billed at
/// gpt-4o-mini rates; underestimating would defeat the ceiling.
pub fn model_cost(model: &str, usage: TokenUsage) -> f64 {
    let (input_rate, output_rate) = MODEL_PRICING
        .iter()
        .find(|(name, _, _)| model.starts_with(name))
        .map(|(_, i, o)| (*i, *o))
        .unwrap_or_else(|| {
            tracing::warn!(model, "no price entry for model, assuming gpt-4o-mini rates");
            (0.15, 0.60)
        });
    (usage.input_tokens as f64 * input_rate + usage.output_tokens as f64 * output_rate) / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard_with_cooldown(cooldown: Duration) -> AiGuard {
        AiGuard::new(GuardConfig {
            failure_threshold: 3,
            cooldown,
        })
    }

    #[test]
    fn admits_fresh_site() {
        let guard = AiGuard::default();
        assert_eq!(
            guard.admit("example.com", 0.15),
            Admission::Permitted { trial: false }
        );
    }

    #[test]
    fn opens_after_three_consecutive_failures() {
        let guard = guard_with_cooldown(Duration::from_secs(60));
        assert!(!guard.record_failure("site", 0.01).opened);
        assert!(!guard.record_failure("site", 0.01).opened);
        let third = guard.record_failure("site", 0.01);
        assert!(third.opened);
        assert_eq!(third.consecutive_failures, 3);
        assert_eq!(guard.admit("site", 1.0), Admission::BreakerOpen);
    }

    #[test]
    fn success_resets_failure_streak() {
        let guard = AiGuard::default();
        guard.record_failure("site", 0.01);
        guard.record_failure("site", 0.01);
        guard.record_success("site", 0.01);
        assert!(!guard.record_failure("site", 0.01).opened);
    }

    #[test]
    fn half_open_allows_one_trial_after_cooldown() {
        let guard = guard_with_cooldown(Duration::from_millis(0));
        for _ in 0..3 {
            guard.record_failure("site", 0.0);
        }
        // Zero cooldown: the expired breaker half-opens on next check.
        assert_eq!(
            guard.admit("site", 1.0),
            Admission::Permitted { trial: true }
        );
        assert!(guard.record_success("site", 0.01));
        assert_eq!(
            guard.admit("site", 1.0),
            Admission::Permitted { trial: false }
        );
    }

    #[test]
    fn failed_trial_reopens_immediately() {
        let guard = guard_with_cooldown(Duration::from_millis(0));
        for _ in 0..3 {
            guard.record_failure("site", 0.0);
        }
        assert_eq!(
            guard.admit("site", 1.0),
            Admission::Permitted { trial: true }
        );
        let outcome = guard.record_failure("site", 0.0);
        assert!(outcome.opened);
    }

    #[test]
    fn page_ceiling_blocks_further_calls() {
        let guard = AiGuard::default();
        guard.begin_page("site");
        guard.record_success("site", 0.10);
        assert_eq!(
            guard.admit("site", 0.15),
            Admission::Permitted { trial: false }
        );
        guard.record_success("site", 0.06);
        assert_eq!(guard.admit("site", 0.15), Admission::BudgetExceeded);
        // A new page starts with a fresh budget.
        guard.begin_page("site");
        assert_eq!(
            guard.admit("site", 0.15),
            Admission::Permitted { trial: false }
        );
    }

    #[test]
    fn total_spend_survives_page_reset() {
        let guard = AiGuard::default();
        guard.begin_page("site");
        guard.record_success("site", 0.05);
        guard.begin_page("site");
        assert_eq!(guard.page_spend("site"), 0.0);
        assert!((guard.total_spend("site") - 0.05).abs() < 1e-9);
    }

    #[test]
    fn manual_reset_closes_breaker() {
        let guard = guard_with_cooldown(Duration::from_secs(600));
        for _ in 0..3 {
            guard.record_failure("site", 0.0);
        }
        assert_eq!(guard.admit("site", 1.0), Admission::BreakerOpen);
        guard.reset("site");
        assert_eq!(
            guard.admit("site", 1.0),
            Admission::Permitted { trial: false }
        );
    }

    #[test]
    fn known_model_pricing() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 0,
        };
        assert!((model_cost("gpt-4o-mini", usage) - 0.15).abs() < 1e-9);
        assert!((model_cost("gpt-4o", usage) - 2.50).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_mini_rates() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
        };
        assert!((model_cost("claude-haiku", usage) - 0.75).abs() < 1e-9);
    }
}
