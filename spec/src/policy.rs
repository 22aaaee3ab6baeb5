//! Declarative vendor and auto-decision policy model (spec.md §3, §4.4, §4.5).
//!
//! Grounded in `ledger_spec::policy`'s shape: rules describe conditions and
//! produce a side-effect-free `PolicyEffect`; evaluation happens in
//! `settld-core`. Here the "rules" are fixed per spec.md rather than an
//! arbitrary rule bundle, but the effect/decision/alert split is kept:
//! evaluating a vendor policy against a verify outcome produces a
//! `PolicyCheckResult` the same way evaluating a ledger policy against an
//! event produces a `PolicyDecision`.

use serde::{Deserialize, Serialize};

use crate::RunStatus;

/// Per-vendor verification policy (spec.md §3 `TenantSettings.vendorPolicies`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VendorPolicy {
    /// Verification mode this vendor must use; `None` means tenant default applies.
    #[serde(default)]
    pub required_mode: Option<crate::VerificationMode>,
    /// Whether `approve` is allowed when the run status is `amber`.
    #[serde(default)]
    pub allow_amber_approvals: Option<bool>,
    /// Treat any verifier warning as an error.
    #[serde(default)]
    pub fail_on_warnings: bool,
    /// If non-empty, the bundle's pricing-matrix signer key id must be in this set.
    #[serde(default)]
    pub required_pricing_matrix_signer_key_ids: Vec<String>,
}

/// Effect produced by applying a vendor policy to a verify outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyEffect {
    /// No additional restriction.
    Allow,
    /// Block the action outright, with a machine-readable reason code.
    Block {
        /// Error code to surface (e.g. `FAIL_ON_WARNINGS`).
        code: String,
    },
}

/// Result of applying a vendor policy to a completed verify pass, before
/// final status derivation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyCheckResult {
    /// Effects produced, in evaluation order.
    pub effects: Vec<PolicyEffect>,
}

impl PolicyCheckResult {
    /// True if any effect is a `Block`.
    pub fn is_blocked(&self) -> bool {
        self.effects.iter().any(|e| matches!(e, PolicyEffect::Block { .. }))
    }

    /// Collect block reason codes in evaluation order.
    pub fn block_codes(&self) -> Vec<String> {
        self.effects
            .iter()
            .filter_map(|e| match e {
                PolicyEffect::Block { code } => Some(code.clone()),
                PolicyEffect::Allow => None,
            })
            .collect()
    }
}

/// Evaluate a vendor policy against a verifier outcome.
///
/// `has_warnings` and `signer_key_id` describe the verifier output prior to
/// policy application; this function only ever *adds* errors (spec.md §4.4
/// step 5), it never clears existing verifier errors.
pub fn evaluate_vendor_policy(
    policy: &VendorPolicy,
    has_warnings: bool,
    signer_key_id: Option<&str>,
) -> PolicyCheckResult {
    let mut effects = Vec::new();
    if policy.fail_on_warnings && has_warnings {
        effects.push(PolicyEffect::Block {
            code: "FAIL_ON_WARNINGS".to_string(),
        });
    }
    if !policy.required_pricing_matrix_signer_key_ids.is_empty() {
        let allowed = signer_key_id
            .map(|id| policy.required_pricing_matrix_signer_key_ids.iter().any(|a| a == id))
            .unwrap_or(false);
        if !allowed {
            effects.push(PolicyEffect::Block {
                code: "HOSTED_POLICY_PRICING_MATRIX_SIGNER_KEYID_NOT_ALLOWED".to_string(),
            });
        }
    }
    if effects.is_empty() {
        effects.push(PolicyEffect::Allow);
    }
    PolicyCheckResult { effects }
}

/// Whether a decision verb is permitted for a given run status under a
/// vendor policy (spec.md §4.5 policy checks).
pub fn decision_allowed(policy: &VendorPolicy, verb: crate::DecisionVerb, status: RunStatus) -> Result<(), &'static str> {
    use crate::DecisionVerb::*;
    match (verb, status) {
        (Approve, RunStatus::Red) => Err("APPROVE_FORBIDDEN"),
        (Approve, RunStatus::Amber) => {
            if policy.allow_amber_approvals == Some(false) {
                Err("APPROVE_FORBIDDEN")
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}

/// Auto-decision configuration (spec.md §3 `TenantSettings.autoDecision`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoDecisionPolicy {
    /// Whether auto-decision is active.
    pub enabled: bool,
    /// Auto-approve runs resolved `green`.
    #[serde(default)]
    pub approve_on_green: bool,
    /// Auto-approve runs resolved `amber`.
    #[serde(default)]
    pub approve_on_amber: bool,
    /// Auto-hold runs resolved `red`.
    #[serde(default)]
    pub hold_on_red: bool,
    /// Template ids eligible for auto-decision; empty means any.
    #[serde(default)]
    pub template_ids: Vec<String>,
    /// Email recorded as the acting party for auto-decisions.
    pub actor_email: String,
}

impl AutoDecisionPolicy {
    /// Decide whether this run should be auto-decided and, if so, which verb.
    pub fn verb_for(&self, status: RunStatus, template_id: Option<&str>) -> Option<crate::DecisionVerb> {
        if !self.enabled {
            return None;
        }
        if !self.template_ids.is_empty() {
            match template_id {
                Some(t) if self.template_ids.iter().any(|x| x == t) => {}
                _ => return None,
            }
        }
        match status {
            RunStatus::Green if self.approve_on_green => Some(crate::DecisionVerb::Approve),
            RunStatus::Amber if self.approve_on_amber => Some(crate::DecisionVerb::Approve),
            RunStatus::Red if self.hold_on_red => Some(crate::DecisionVerb::Hold),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_on_warnings_blocks() {
        let policy = VendorPolicy {
            fail_on_warnings: true,
            ..Default::default()
        };
        let result = evaluate_vendor_policy(&policy, true, None);
        assert!(result.is_blocked());
        assert_eq!(result.block_codes(), vec!["FAIL_ON_WARNINGS".to_string()]);
    }

    #[test]
    fn signer_key_allowlist_blocks_unknown_signer() {
        let policy = VendorPolicy {
            required_pricing_matrix_signer_key_ids: vec!["k1".into()],
            ..Default::default()
        };
        let result = evaluate_vendor_policy(&policy, false, Some("k2"));
        assert!(result.is_blocked());
        assert_eq!(
            result.block_codes(),
            vec!["HOSTED_POLICY_PRICING_MATRIX_SIGNER_KEYID_NOT_ALLOWED".to_string()]
        );
    }

    #[test]
    fn signer_key_allowlist_allows_known_signer() {
        let policy = VendorPolicy {
            required_pricing_matrix_signer_key_ids: vec!["k1".into()],
            ..Default::default()
        };
        let result = evaluate_vendor_policy(&policy, false, Some("k1"));
        assert!(!result.is_blocked());
    }

    #[test]
    fn approve_on_red_is_always_forbidden() {
        let policy = VendorPolicy::default();
        assert_eq!(
            decision_allowed(&policy, crate::DecisionVerb::Approve, RunStatus::Red),
            Err("APPROVE_FORBIDDEN")
        );
    }

    #[test]
    fn approve_on_amber_requires_policy_opt_in() {
        let mut policy = VendorPolicy::default();
        assert!(decision_allowed(&policy, crate::DecisionVerb::Approve, RunStatus::Amber).is_ok());
        policy.allow_amber_approvals = Some(false);
        assert_eq!(
            decision_allowed(&policy, crate::DecisionVerb::Approve, RunStatus::Amber),
            Err("APPROVE_FORBIDDEN")
        );
    }

    #[test]
    fn auto_decision_respects_template_allowlist() {
        let policy = AutoDecisionPolicy {
            enabled: true,
            approve_on_green: true,
            template_ids: vec!["t1".into()],
            actor_email: "auto@settld.dev".into(),
            ..Default::default()
        };
        assert_eq!(policy.verb_for(RunStatus::Green, Some("t2")), None);
        assert_eq!(
            policy.verb_for(RunStatus::Green, Some("t1")),
            Some(crate::DecisionVerb::Approve)
        );
    }
}
