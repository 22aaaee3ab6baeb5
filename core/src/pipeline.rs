//! Verification pipeline and decision engine.
//!
//! The verifier's shape — run a fixed sequence of checks over a bundle,
//! collect findings, fold them into a single status — is grounded in
//! `lifecycle::MuscleLifecycleManager::handle_event`, which likewise folds
//! a sequence of lifecycle events into a single `MuscleRecord` state. The
//! decision engine's signing step reuses the `signing::sign_envelope`
//! pattern (hash the canonical body, sign the hash, attach signer +
//! signature), applied here to a `SettlementDecision` instead of an
//! `Envelope`.

use dashmap::DashMap;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use settld_spec::policy::{decision_allowed, VendorPolicy};
use settld_spec::{DecisionVerb, RunStatus, VerificationMode};

/// `serde` only implements `Serialize`/`Deserialize` for arrays up to 32
/// elements, so a 64-byte Ed25519 signature needs a manual impl.
mod signature_array {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        bytes.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        <[u8; 64]>::try_from(bytes)
            .map_err(|v| serde::de::Error::invalid_length(v.len(), &"64 bytes"))
    }
}

/// Severity of an individual verifier finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    /// Informational; does not affect status.
    Info,
    /// Affects status only under `strict` mode or `failOnWarnings`.
    Warning,
    /// Always resolves the run to `red`.
    Error,
}

/// A single verifier finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Machine-readable finding code.
    pub code: String,
    /// Severity.
    pub severity: FindingSeverity,
    /// Human-readable detail.
    pub message: String,
}

/// Result of running the verification pipeline over an uploaded bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    /// Resolved run status before vendor policy is applied.
    pub status: RunStatus,
    /// All findings collected, in check order.
    pub findings: Vec<Finding>,
    /// Key id of the pricing-matrix signer, if the bundle carried one.
    pub pricing_matrix_signer_key_id: Option<String>,
}

impl VerifyOutcome {
    /// Whether any finding is a warning or worse.
    pub fn has_warnings(&self) -> bool {
        self.findings
            .iter()
            .any(|f| matches!(f.severity, FindingSeverity::Warning | FindingSeverity::Error))
    }
}

const REQUIRED_BUNDLE_FIELDS: &[&str] = &["vendorId", "lineItems", "totalAmount"];

/// Exact literal message spec.md §4.4 step 4 / §8 invariant 2 pin for a
/// `strict`-mode run with no configured governance trust roots.
const GOVERNANCE_TRUST_ROOTS_MISSING_STRICT: &str = "strict requires trusted governance root keys";

/// Check the bundle's governance attestations, if any, against the
/// tenant's configured trust roots (spec.md §4.4 step 4). With no roots
/// configured at all, `strict` refuses outright and `auto`/`compat` warn
/// and skip attestation checking. With roots configured, each attestation
/// not signed by one of them is flagged at the same strict/lenient split.
fn check_governance_trust_roots(bundle: &Value, mode: VerificationMode, trust_root_key_ids: &[String], findings: &mut Vec<Finding>) {
    if trust_root_key_ids.is_empty() {
        match mode {
            VerificationMode::Strict => findings.push(Finding {
                code: "GOVERNANCE_TRUST_ROOTS_MISSING".into(),
                severity: FindingSeverity::Error,
                message: GOVERNANCE_TRUST_ROOTS_MISSING_STRICT.into(),
            }),
            VerificationMode::Auto | VerificationMode::Compat => findings.push(Finding {
                code: "TRUSTED_GOVERNANCE_ROOT_KEYS_MISSING_LENIENT".into(),
                severity: FindingSeverity::Warning,
                message: "no trusted governance root keys configured; skipping governance attestation checks in lenient mode".into(),
            }),
        }
        return;
    }

    let Some(attestations) = bundle.get("governanceAttestations").and_then(Value::as_array) else {
        return;
    };
    for attestation in attestations {
        let signer = attestation.get("signerKeyId").and_then(Value::as_str);
        let trusted = signer.is_some_and(|s| trust_root_key_ids.iter().any(|root| root == s));
        if trusted {
            continue;
        }
        let severity = match mode {
            VerificationMode::Strict => FindingSeverity::Error,
            VerificationMode::Auto | VerificationMode::Compat => FindingSeverity::Warning,
        };
        findings.push(Finding {
            code: "GOVERNANCE_ATTESTATION_UNTRUSTED".into(),
            severity,
            message: format!(
                "governance attestation signed by `{}` is not among the tenant's trusted governance root keys",
                signer.unwrap_or("<missing signerKeyId>")
            ),
        });
    }
}

/// Run the verification pipeline over a bundle body (spec.md §4.4).
///
/// Checks, in order: governance trust root configuration/attestation
/// trust, required-field presence, pricing-matrix signature presence
/// under `strict` mode, and line-item total reconciliation. Each failed
/// check contributes one finding; the worst finding severity determines
/// the resolved status (`error` -> red, `warning` -> amber, otherwise
/// green).
pub fn run_verification(bundle: &Value, mode: VerificationMode, governance_trust_root_key_ids: &[String]) -> VerifyOutcome {
    let mut findings = Vec::new();

    check_governance_trust_roots(bundle, mode, governance_trust_root_key_ids, &mut findings);

    for field in REQUIRED_BUNDLE_FIELDS {
        if bundle.get(field).is_none() {
            findings.push(Finding {
                code: "MISSING_REQUIRED_FIELD".into(),
                severity: FindingSeverity::Error,
                message: format!("bundle is missing required field `{field}`"),
            });
        }
    }

    let pricing_matrix_signer_key_id = bundle
        .get("pricingMatrix")
        .and_then(|pm| pm.get("signerKeyId"))
        .and_then(Value::as_str)
        .map(str::to_string);

    if pricing_matrix_signer_key_id.is_none() {
        let severity = match mode {
            VerificationMode::Strict => FindingSeverity::Error,
            VerificationMode::Auto | VerificationMode::Compat => FindingSeverity::Warning,
        };
        findings.push(Finding {
            code: "PRICING_MATRIX_UNSIGNED".into(),
            severity,
            message: "pricing matrix carries no signer key id".into(),
        });
    }

    if let (Some(total), Some(items)) = (bundle.get("totalAmount").and_then(Value::as_f64), bundle.get("lineItems").and_then(Value::as_array)) {
        let sum: f64 = items.iter().filter_map(|i| i.get("amount").and_then(Value::as_f64)).sum();
        if (sum - total).abs() > 0.01 {
            findings.push(Finding {
                code: "LINE_ITEM_TOTAL_MISMATCH".into(),
                severity: FindingSeverity::Error,
                message: format!("line items sum to {sum} but totalAmount is {total}"),
            });
        }
    }

    let status = if findings.iter().any(|f| f.severity == FindingSeverity::Error) {
        RunStatus::Red
    } else if findings.iter().any(|f| f.severity == FindingSeverity::Warning) {
        RunStatus::Amber
    } else {
        RunStatus::Green
    };

    VerifyOutcome { status, findings, pricing_matrix_signer_key_id }
}

/// Errors raised while recording a decision.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    /// Vendor policy forbade this verb for the run's resolved status.
    #[error("{0}")]
    PolicyForbidden(&'static str),
    /// A decision was already recorded for this run; the lock is one-shot.
    #[error("a decision was already recorded for run {0}")]
    AlreadyRecorded(String),
}

/// A signed settlement decision (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementDecision {
    /// Run this decision applies to.
    pub run_id: String,
    /// Decision verb.
    pub verb: DecisionVerb,
    /// Run status at the time of decision.
    pub status: RunStatus,
    /// How the acting party authenticated.
    pub auth_method: settld_spec::AuthMethod,
    /// Email or system actor identifier recorded on the decision.
    pub actor: String,
    /// Unix millis decision timestamp.
    pub decided_at_ms: u64,
    /// Ed25519 public key bytes of the signer.
    pub signer_key: [u8; 32],
    /// Ed25519 signature over the decision's canonical body (all fields above).
    #[serde(with = "signature_array")]
    pub signature: [u8; 64],
}

fn decision_signing_bytes(
    run_id: &str,
    verb: DecisionVerb,
    status: RunStatus,
    auth_method: settld_spec::AuthMethod,
    actor: &str,
    decided_at_ms: u64,
) -> Vec<u8> {
    let body = serde_json::json!({
        "runId": run_id,
        "verb": verb,
        "status": status,
        "authMethod": auth_method,
        "actor": actor,
        "decidedAtMs": decided_at_ms,
    });
    settld_spec::canon::canonical_json(&body).expect("decision body is always finite JSON")
}

/// Evaluate vendor policy and, if allowed, sign and return a decision.
pub fn decide(
    policy: &VendorPolicy,
    run_id: String,
    verb: DecisionVerb,
    status: RunStatus,
    auth_method: settld_spec::AuthMethod,
    actor: String,
    decided_at_ms: u64,
    signer: &SigningKey,
) -> Result<SettlementDecision, DecisionError> {
    decision_allowed(policy, verb, status).map_err(DecisionError::PolicyForbidden)?;
    let bytes = decision_signing_bytes(&run_id, verb, status, auth_method, &actor, decided_at_ms);
    let signature = signer.sign(&bytes);
    Ok(SettlementDecision {
        run_id,
        verb,
        status,
        auth_method,
        actor,
        decided_at_ms,
        signer_key: signer.verifying_key().to_bytes(),
        signature: signature.to_bytes(),
    })
}

/// Verify a decision's signature against its own embedded signer key.
pub fn verify_decision_signature(decision: &SettlementDecision) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&decision.signer_key) else {
        return false;
    };
    let bytes = decision_signing_bytes(
        &decision.run_id,
        decision.verb,
        decision.status,
        decision.auth_method,
        &decision.actor,
        decision.decided_at_ms,
    );
    let signature = ed25519_dalek::Signature::from_bytes(&decision.signature);
    key.verify_strict(&bytes, &signature).is_ok()
}

/// Enforces the one-decision-per-run lock (spec.md §4.5): a second
/// `POST /decision` against a run that already has one recorded is rejected
/// with [`DecisionError::AlreadyRecorded`], regardless of which actor or
/// auth method records the first one. Keyed by run id rather than by magic
/// link token, since a run's receipt token can be reissued but the
/// underlying decision lock must not reset.
#[derive(Default)]
pub struct DecisionStore {
    decisions: DashMap<String, SettlementDecision>,
}

impl DecisionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision for a run, failing if one is already recorded.
    pub fn record(&self, decision: SettlementDecision) -> Result<SettlementDecision, DecisionError> {
        match self.decisions.entry(decision.run_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DecisionError::AlreadyRecorded(decision.run_id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(decision.clone());
                Ok(decision)
            }
        }
    }

    /// Fetch the decision recorded for a run, if any.
    pub fn get(&self, run_id: &str) -> Option<SettlementDecision> {
        self.decisions.get(run_id).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use serde_json::json;

    fn trusted_root() -> Vec<String> {
        vec!["root_1".into()]
    }

    #[test]
    fn verification_flags_missing_required_fields() {
        let outcome = run_verification(&json!({}), VerificationMode::Auto, &trusted_root());
        assert_eq!(outcome.status, RunStatus::Red);
        assert!(outcome.findings.iter().any(|f| f.code == "MISSING_REQUIRED_FIELD"));
    }

    #[test]
    fn verification_is_amber_on_unsigned_pricing_matrix_in_auto_mode() {
        let bundle = json!({
            "vendorId": "v1",
            "lineItems": [{"amount": 10.0}],
            "totalAmount": 10.0,
        });
        let outcome = run_verification(&bundle, VerificationMode::Auto, &trusted_root());
        assert_eq!(outcome.status, RunStatus::Amber);
    }

    #[test]
    fn verification_is_red_on_unsigned_pricing_matrix_in_strict_mode() {
        let bundle = json!({
            "vendorId": "v1",
            "lineItems": [{"amount": 10.0}],
            "totalAmount": 10.0,
        });
        let outcome = run_verification(&bundle, VerificationMode::Strict, &trusted_root());
        assert_eq!(outcome.status, RunStatus::Red);
    }

    #[test]
    fn verification_is_green_with_signed_matrix_and_matching_total() {
        let bundle = json!({
            "vendorId": "v1",
            "lineItems": [{"amount": 10.0}],
            "totalAmount": 10.0,
            "pricingMatrix": {"signerKeyId": "k1"},
        });
        let outcome = run_verification(&bundle, VerificationMode::Auto, &trusted_root());
        assert_eq!(outcome.status, RunStatus::Green);
        assert_eq!(outcome.pricing_matrix_signer_key_id.as_deref(), Some("k1"));
    }

    fn signed_bundle() -> Value {
        json!({
            "vendorId": "v1",
            "lineItems": [{"amount": 10.0}],
            "totalAmount": 10.0,
            "pricingMatrix": {"signerKeyId": "k1"},
        })
    }

    #[test]
    fn strict_mode_with_no_trust_roots_is_red_with_the_pinned_message() {
        let outcome = run_verification(&signed_bundle(), VerificationMode::Strict, &[]);
        assert_eq!(outcome.status, RunStatus::Red);
        let finding = outcome.findings.iter().find(|f| f.code == "GOVERNANCE_TRUST_ROOTS_MISSING").unwrap();
        assert_eq!(finding.message, "strict requires trusted governance root keys");
    }

    #[test]
    fn compat_mode_with_no_trust_roots_is_amber_with_the_lenient_code() {
        let outcome = run_verification(&signed_bundle(), VerificationMode::Compat, &[]);
        assert_eq!(outcome.status, RunStatus::Amber);
        assert!(outcome.findings.iter().any(|f| f.code == "TRUSTED_GOVERNANCE_ROOT_KEYS_MISSING_LENIENT"));
    }

    #[test]
    fn auto_mode_with_no_trust_roots_is_amber_with_the_lenient_code() {
        let outcome = run_verification(&signed_bundle(), VerificationMode::Auto, &[]);
        assert_eq!(outcome.status, RunStatus::Amber);
        assert!(outcome.findings.iter().any(|f| f.code == "TRUSTED_GOVERNANCE_ROOT_KEYS_MISSING_LENIENT"));
    }

    #[test]
    fn attestation_outside_configured_roots_is_flagged_in_strict_mode() {
        let mut bundle = signed_bundle();
        bundle["governanceAttestations"] = json!([{"signerKeyId": "untrusted_root"}]);
        let outcome = run_verification(&bundle, VerificationMode::Strict, &trusted_root());
        assert_eq!(outcome.status, RunStatus::Red);
        assert!(outcome.findings.iter().any(|f| f.code == "GOVERNANCE_ATTESTATION_UNTRUSTED"));
    }

    #[test]
    fn attestation_signed_by_a_configured_root_is_not_flagged() {
        let mut bundle = signed_bundle();
        bundle["governanceAttestations"] = json!([{"signerKeyId": "root_1"}]);
        let outcome = run_verification(&bundle, VerificationMode::Strict, &trusted_root());
        assert_eq!(outcome.status, RunStatus::Green);
    }

    #[test]
    fn decision_signature_roundtrips() {
        let signer = SigningKey::generate(&mut OsRng);
        let decision = decide(
            &VendorPolicy::default(),
            "run_1".into(),
            DecisionVerb::Approve,
            RunStatus::Green,
            settld_spec::AuthMethod::BuyerSession,
            "buyer@example.com".into(),
            1_000,
            &signer,
        )
        .unwrap();
        assert!(verify_decision_signature(&decision));
    }

    #[test]
    fn decision_forbidden_on_red_status() {
        let signer = SigningKey::generate(&mut OsRng);
        let err = decide(
            &VendorPolicy::default(),
            "run_1".into(),
            DecisionVerb::Approve,
            RunStatus::Red,
            settld_spec::AuthMethod::BuyerSession,
            "buyer@example.com".into(),
            1_000,
            &signer,
        )
        .unwrap_err();
        assert_eq!(err, DecisionError::PolicyForbidden("APPROVE_FORBIDDEN"));
    }

    #[test]
    fn decision_store_locks_after_first_record() {
        let signer = SigningKey::generate(&mut OsRng);
        let decision = decide(
            &VendorPolicy::default(),
            "run_1".into(),
            DecisionVerb::Approve,
            RunStatus::Green,
            settld_spec::AuthMethod::BuyerSession,
            "buyer@example.com".into(),
            1_000,
            &signer,
        )
        .unwrap();
        let store = DecisionStore::new();
        store.record(decision.clone()).unwrap();
        let err = store.record(decision).unwrap_err();
        assert_eq!(err, DecisionError::AlreadyRecorded("run_1".into()));
    }
}
