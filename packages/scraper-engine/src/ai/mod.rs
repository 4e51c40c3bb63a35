//! AI fallback tier: spend/breaker guard and the escalation decision.

pub mod fallback;
pub mod guard;

pub use fallback::{maybe_escalate, variant_match, AiOutcome};
pub use guard::{Admission, AiGuard, GuardConfig};
