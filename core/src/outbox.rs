//! Outbox delivery engine: queueing, exponential backoff, and
//! dead-lettering of webhook notifications (spec.md §4.6).
//!
//! The record/registry/stage shape is grounded in
//! `lifecycle::MuscleLifecycleManager`: a `HashMap` registry of records each
//! carrying a `stage` enum and a `last_error`, mutated by discrete
//! transition methods rather than free-form field writes. Here the stages
//! are delivery stages instead of muscle lifecycle stages, and the registry
//! additionally computes each record's next retry time.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use settld_spec::TenantId;

/// Destination kind an outbox entry is addressed to (spec.md §3
/// `OutboxEntry.provider`). Only `webhook` is ever delivered by
/// [`OutboxManager::due_records`]/HTTP delivery today; the others exist so
/// replay's provider-mismatch check (spec.md §4.6.5, §7) has something to
/// compare against for entries queued by future integrations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Tenant-configured webhook URL, HMAC-signed (spec.md §4.6.1).
    Webhook,
    /// Slack incoming webhook (wire shape only; spec.md §1 Non-goals).
    Slack,
    /// Zapier trigger (wire shape only; spec.md §1 Non-goals).
    Zapier,
    /// Buyer-facing notification (e.g. the OTP mailer entry).
    BuyerNotification,
    /// Downstream payment trigger fired off a settlement decision.
    PaymentTrigger,
}

/// Errors raised by outbox operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// No record exists with the given id.
    #[error("outbox record not found: {0}")]
    NotFound(String),
    /// The record exists but isn't dead-lettered, so there's nothing to
    /// requeue.
    #[error("outbox record {0} is not dead-lettered")]
    NotDeadLettered(String),
    /// A replay/requeue named a `provider` that doesn't match the stored
    /// entry's own `provider` (spec.md §4.6.5, §7 `409 PROVIDER_MISMATCH`).
    #[error("replay provider `{requested:?}` does not match stored provider `{stored:?}`")]
    ProviderMismatch {
        /// Provider the replay request named.
        requested: Provider,
        /// Provider actually stored on the record.
        stored: Provider,
    },
}

/// Delivery stage of an outbox entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStage {
    /// Queued, not yet attempted.
    Pending,
    /// At least one attempt made, waiting for the next retry window.
    Retrying,
    /// Delivered successfully; terminal.
    Delivered,
    /// Exhausted all retry attempts; terminal, operator-visible.
    DeadLettered,
}

/// A queued outbox notification (spec.md §3 `OutboxEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Record id (ULID/UUID string).
    pub id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Destination kind this entry targets.
    pub provider: Provider,
    /// Magic link / run token this notification is about, if any.
    pub token: Option<String>,
    /// Destination URL.
    pub url: String,
    /// JSON body to deliver.
    pub body: Value,
    /// Extra headers to attach at delivery time (e.g. a signature computed
    /// up front), beyond whatever the delivery client adds itself.
    pub headers: HashMap<String, String>,
    /// Sealed per-tenant secret this entry's signature was/will be computed
    /// with, if the provider requires one (`enc:v1:<nonce>:<ciphertext>`).
    pub encrypted_secret: Option<String>,
    /// Caller-supplied idempotency key. A second [`OutboxManager::enqueue`]
    /// call with the same key against a non-terminal entry coalesces onto
    /// it instead of inserting a duplicate (spec.md §4.6.4, §8 invariant 4).
    pub idempotency_key: String,
    /// Current stage.
    pub stage: DeliveryStage,
    /// Attempts made so far.
    pub attempts: u32,
    /// Unix millis of the next attempt, once `stage` is `Pending`/`Retrying`.
    pub next_attempt_at_ms: u64,
    /// Most recent delivery error, if any.
    pub last_error: Option<String>,
    /// Unix millis when a dead-letter alert was last emitted for this
    /// record, if ever (spec.md §8 invariant 4: at most one alert per
    /// `(provider, month-bucket)`).
    pub dead_letter_emitted_at_ms: Option<u64>,
}

/// Parameters for [`OutboxManager::enqueue`], grouped to keep the call site
/// readable now that an entry carries the full spec.md §3 field set.
pub struct NewOutboxEntry {
    /// Record id (ULID/UUID string).
    pub id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Destination kind this entry targets.
    pub provider: Provider,
    /// Magic link / run token this notification is about, if any.
    pub token: Option<String>,
    /// Destination URL.
    pub url: String,
    /// JSON body to deliver.
    pub body: Value,
    /// Extra headers to attach at delivery time.
    pub headers: HashMap<String, String>,
    /// Sealed per-tenant secret, if the provider requires one.
    pub encrypted_secret: Option<String>,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
}

const MAX_ATTEMPTS: u32 = 8;
const BASE_BACKOFF_MS: u64 = 2_000;
const MAX_BACKOFF_MS: u64 = 30 * 60 * 1_000;

/// Compute the exponential backoff delay (ms) before attempt number `attempt`
/// (1-indexed), capped at `MAX_BACKOFF_MS`: `base * 2^(attempt-1)`.
pub fn backoff_delay_ms(attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(20);
    BASE_BACKOFF_MS.saturating_mul(1u64 << exp).min(MAX_BACKOFF_MS)
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_millis() as u64
}

/// Coarse `YYYY-MM` bucket used to dedupe dead-letter alerts per
/// `(tenant, provider)` per month (spec.md §8 invariant 4). Derived from
/// Unix millis with plain integer arithmetic rather than a calendar crate,
/// since only month-granularity dedup is required, not a calendar date.
fn month_bucket(at_ms: u64) -> String {
    const MS_PER_DAY: u64 = 86_400_000;
    const DAYS_PER_MONTH_APPROX: u64 = 30;
    let days = at_ms / MS_PER_DAY;
    format!("{}", days / DAYS_PER_MONTH_APPROX)
}

/// In-memory outbox registry. Persistence of delivered/dead-lettered
/// history belongs to the tenant's [`crate::audit::TenantAuditLog`]; this
/// registry only tracks entries still in flight or awaiting operator
/// attention.
#[derive(Default)]
pub struct OutboxManager {
    records: RwLock<HashMap<String, OutboxRecord>>,
    /// `(tenant, provider, month-bucket)` tuples that have already fired a
    /// dead-letter alert, so a second dead-lettered entry for the same
    /// provider this month doesn't page the operator again.
    dead_letter_alerts_emitted: RwLock<std::collections::HashSet<(TenantId, Provider, String)>>,
}

impl OutboxManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a new notification for immediate delivery. If a non-terminal
    /// entry already exists for this tenant with the same `idempotencyKey`,
    /// that entry is returned unchanged instead of inserting a duplicate
    /// (spec.md §4.6.4, §8 invariant 4).
    pub fn enqueue(&self, entry: NewOutboxEntry) -> OutboxRecord {
        let mut records = self.records.write();
        if let Some(existing) = records.values().find(|r| {
            r.tenant_id == entry.tenant_id
                && r.idempotency_key == entry.idempotency_key
                && !matches!(r.stage, DeliveryStage::Delivered | DeliveryStage::DeadLettered)
        }) {
            return existing.clone();
        }
        let record = OutboxRecord {
            id: entry.id.clone(),
            tenant_id: entry.tenant_id,
            provider: entry.provider,
            token: entry.token,
            url: entry.url,
            body: entry.body,
            headers: entry.headers,
            encrypted_secret: entry.encrypted_secret,
            idempotency_key: entry.idempotency_key,
            stage: DeliveryStage::Pending,
            attempts: 0,
            next_attempt_at_ms: now_ms(),
            last_error: None,
            dead_letter_emitted_at_ms: None,
        };
        records.insert(entry.id, record.clone());
        record
    }

    /// Records due for delivery at or before "now".
    pub fn due_records(&self) -> Vec<OutboxRecord> {
        let now = now_ms();
        self.records
            .read()
            .values()
            .filter(|r| matches!(r.stage, DeliveryStage::Pending | DeliveryStage::Retrying) && r.next_attempt_at_ms <= now)
            .cloned()
            .collect()
    }

    /// Mark a delivery attempt successful; terminal.
    pub fn mark_delivered(&self, id: &str) -> Option<OutboxRecord> {
        let mut records = self.records.write();
        let record = records.get_mut(id)?;
        record.stage = DeliveryStage::Delivered;
        record.attempts += 1;
        record.last_error = None;
        Some(record.clone())
    }

    /// Mark a delivery attempt failed: either schedules the next retry or,
    /// once `MAX_ATTEMPTS` is reached, dead-letters the record. Returns
    /// alongside the updated record whether this transition should raise a
    /// fresh operator alert (it is the first dead-letter this month for
    /// this tenant/provider pair — spec.md §8 invariant 4).
    pub fn mark_failed(&self, id: &str, error: String) -> Option<(OutboxRecord, bool)> {
        let mut records = self.records.write();
        let record = records.get_mut(id)?;
        record.attempts += 1;
        record.last_error = Some(error);
        let mut should_alert = false;
        if record.attempts >= MAX_ATTEMPTS {
            record.stage = DeliveryStage::DeadLettered;
            let at_ms = now_ms();
            let bucket = (record.tenant_id.clone(), record.provider, month_bucket(at_ms));
            should_alert = self.dead_letter_alerts_emitted.write().insert(bucket);
            if should_alert {
                record.dead_letter_emitted_at_ms = Some(at_ms);
            }
        } else {
            record.stage = DeliveryStage::Retrying;
            record.next_attempt_at_ms = now_ms() + backoff_delay_ms(record.attempts + 1);
        }
        Some((record.clone(), should_alert))
    }

    /// Requeue a dead-lettered record for immediate redelivery (operator
    /// action), rejecting the request if it names a `provider` other than
    /// the one actually stored on the record (spec.md §4.6.5, §7
    /// `409 PROVIDER_MISMATCH`). `requested_provider` of `None` skips the
    /// check, for callers (like the run-once worker) that don't have an
    /// independently-asserted provider to compare against.
    pub fn requeue(&self, id: &str, requested_provider: Option<Provider>) -> Result<OutboxRecord, OutboxError> {
        let mut records = self.records.write();
        let record = records.get_mut(id).ok_or_else(|| OutboxError::NotFound(id.to_string()))?;
        if let Some(requested) = requested_provider {
            if requested != record.provider {
                return Err(OutboxError::ProviderMismatch { requested, stored: record.provider });
            }
        }
        if record.stage != DeliveryStage::DeadLettered {
            return Err(OutboxError::NotDeadLettered(id.to_string()));
        }
        record.stage = DeliveryStage::Pending;
        record.attempts = 0;
        record.next_attempt_at_ms = now_ms();
        record.last_error = None;
        Ok(record.clone())
    }

    /// All dead-lettered records for a tenant (operator dashboard view).
    pub fn dead_letters_for(&self, tenant_id: &str) -> Vec<OutboxRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.stage == DeliveryStage::DeadLettered)
            .cloned()
            .collect()
    }

    /// Backlog size (pending + retrying) for a tenant, used by `/readyz`.
    pub fn backlog_for(&self, tenant_id: &str) -> usize {
        self.records
            .read()
            .values()
            .filter(|r| r.tenant_id == tenant_id && matches!(r.stage, DeliveryStage::Pending | DeliveryStage::Retrying))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, idempotency_key: &str) -> NewOutboxEntry {
        NewOutboxEntry {
            id: id.into(),
            tenant_id: "acme".into(),
            provider: Provider::Webhook,
            token: None,
            url: "https://example.com".into(),
            body: json!({}),
            headers: HashMap::new(),
            encrypted_secret: None,
            idempotency_key: idempotency_key.into(),
        }
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_delay_ms(1), 2_000);
        assert_eq!(backoff_delay_ms(2), 4_000);
        assert_eq!(backoff_delay_ms(3), 8_000);
        assert_eq!(backoff_delay_ms(30), MAX_BACKOFF_MS);
    }

    #[test]
    fn repeated_failures_dead_letter_after_max_attempts() {
        let manager = OutboxManager::new();
        manager.enqueue(entry("n1", "idem-1"));
        for _ in 0..MAX_ATTEMPTS {
            manager.mark_failed("n1", "connection refused".into());
        }
        let dead = manager.dead_letters_for("acme");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].stage, DeliveryStage::DeadLettered);
        assert!(dead[0].dead_letter_emitted_at_ms.is_some());
    }

    #[test]
    fn only_the_first_dead_letter_this_month_for_a_provider_alerts() {
        let manager = OutboxManager::new();
        manager.enqueue(entry("n1", "idem-1"));
        manager.enqueue(entry("n2", "idem-2"));
        let mut alerts = 0;
        for _ in 0..MAX_ATTEMPTS {
            if let Some((_, should_alert)) = manager.mark_failed("n1", "boom".into()) {
                if should_alert {
                    alerts += 1;
                }
            }
        }
        for _ in 0..MAX_ATTEMPTS {
            if let Some((_, should_alert)) = manager.mark_failed("n2", "boom".into()) {
                if should_alert {
                    alerts += 1;
                }
            }
        }
        assert_eq!(alerts, 1, "second dead letter for the same tenant/provider/month must not re-alert");
    }

    #[test]
    fn enqueue_coalesces_duplicate_idempotency_keys() {
        let manager = OutboxManager::new();
        let first = manager.enqueue(entry("n1", "idem-1"));
        let second = manager.enqueue(entry("n2", "idem-1"));
        assert_eq!(first.id, second.id, "second enqueue must return the existing record, not insert a duplicate");
        assert_eq!(manager.backlog_for("acme"), 1);
    }

    #[test]
    fn enqueue_does_not_coalesce_onto_a_terminal_record() {
        let manager = OutboxManager::new();
        let first = manager.enqueue(entry("n1", "idem-1"));
        manager.mark_delivered(&first.id);
        let second = manager.enqueue(entry("n2", "idem-1"));
        assert_ne!(first.id, second.id, "a delivered record must not coalesce a fresh retry of the same idempotency key");
    }

    #[test]
    fn requeue_resets_a_dead_lettered_record() {
        let manager = OutboxManager::new();
        manager.enqueue(entry("n1", "idem-1"));
        for _ in 0..MAX_ATTEMPTS {
            manager.mark_failed("n1", "boom".into());
        }
        let requeued = manager.requeue("n1", None).unwrap();
        assert_eq!(requeued.stage, DeliveryStage::Pending);
        assert_eq!(requeued.attempts, 0);
    }

    #[test]
    fn requeue_rejects_a_mismatched_provider() {
        let manager = OutboxManager::new();
        manager.enqueue(entry("n1", "idem-1"));
        for _ in 0..MAX_ATTEMPTS {
            manager.mark_failed("n1", "boom".into());
        }
        let err = manager.requeue("n1", Some(Provider::Slack)).unwrap_err();
        assert!(matches!(err, OutboxError::ProviderMismatch { requested: Provider::Slack, stored: Provider::Webhook }));
    }

    #[test]
    fn delivered_record_is_terminal_and_leaves_backlog() {
        let manager = OutboxManager::new();
        manager.enqueue(entry("n1", "idem-1"));
        assert_eq!(manager.backlog_for("acme"), 1);
        manager.mark_delivered("n1");
        assert_eq!(manager.backlog_for("acme"), 0);
    }
}
