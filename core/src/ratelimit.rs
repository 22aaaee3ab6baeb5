//! Sliding 1-hour rate limiting per `(tenantId, verb)` (spec.md §4.7).
//!
//! Keyed and locked the same way as [`crate::entitlements::EntitlementTracker`]'s
//! usage map: one `RwLock<HashMap<_, _>>`, a fixed-window counter per key
//! that rolls over once its hour elapses. The source's own "retry after"
//! formula isn't fully deterministic (bucket-timestamp arithmetic that
//! varies run to run); this treats it as `ceil(secondsUntilNextSlotOpens)`,
//! which is the documented fallback.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

const WINDOW: Duration = Duration::from_secs(60 * 60);

/// Hourly call allowance for a verb. Spec.md §4.7 pins the windowing rule
/// but not the ceilings themselves; these are sized so the free tier can
/// drive a handful of manual uploads and decisions per hour without ever
/// being the binding constraint ahead of the monthly entitlement quotas.
pub fn verb_limit(verb: &str) -> u64 {
    match verb {
        "upload" => 120,
        "view" => 600,
        "decision" => 60,
        "conformance" => 30,
        _ => 300,
    }
}

struct Window {
    started_at: Instant,
    count: u64,
}

/// Tracks sliding 1-hour call windows per `(tenantId, verb)`.
#[derive(Default)]
pub struct RateLimiter {
    windows: RwLock<HashMap<(String, String), Window>>,
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call against `(tenant_id, verb)`.
    ///
    /// Returns `Ok(())` if the verb's hourly allowance isn't yet exhausted,
    /// otherwise `Err(retry_after_secs)` — the integer seconds until the
    /// window rolls over.
    pub fn check(&self, tenant_id: &str, verb: &str) -> Result<(), u64> {
        let limit = verb_limit(verb);
        let key = (tenant_id.to_string(), verb.to_string());
        let mut windows = self.windows.write();
        let window = windows.entry(key).or_insert_with(|| Window { started_at: Instant::now(), count: 0 });
        if window.started_at.elapsed() >= WINDOW {
            window.started_at = Instant::now();
            window.count = 0;
        }
        if window.count >= limit {
            let remaining = WINDOW.saturating_sub(window.started_at.elapsed());
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(secs.max(1));
        }
        window.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_calls_up_to_the_verb_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..verb_limit("decision") {
            limiter.check("acme", "decision").unwrap();
        }
        let retry_after = limiter.check("acme", "decision").unwrap_err();
        assert!(retry_after > 0 && retry_after <= 3600);
    }

    #[test]
    fn windows_are_isolated_per_tenant_and_verb() {
        let limiter = RateLimiter::new();
        for _ in 0..verb_limit("decision") {
            limiter.check("acme", "decision").unwrap();
        }
        limiter.check("other-tenant", "decision").unwrap();
        limiter.check("acme", "view").unwrap();
    }
}
