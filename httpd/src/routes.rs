//! HTTP route handlers (spec.md §6).
//!
//! Narrowed to the six "hard engineering core" areas spec.md §1 names as
//! in scope: the verification-receipt pipeline, the decision engine, the
//! outbox, plan entitlements, chained event runtime coupling, and the
//! audit/export packager. Billing, Stripe/Circle/Slack/Zapier, and
//! analytics/trust-graph routes are out of scope per spec.md §1's
//! Non-goals ("Circle/Stripe/Slack/Zapier external services (wire shape
//! only)"), so this module does not attempt to fabricate them.
//!
//! Tenant-scoped admin endpoints trust the `:tenantId` path segment
//! directly rather than modeling a separate admin-session/API-key layer —
//! `settld-core` has no such concept beyond vendor ingest keys, and
//! inventing one would be ungrounded.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use settld_core::outbox::{DeliveryStage, NewOutboxEntry, Provider};
use settld_core::pipeline::{decide, run_verification};
use settld_core::tenant::unseal_secret;
use settld_core::vault::StoredBundle;
use settld_spec::policy::VendorPolicy;
use settld_spec::{AuthMethod, DecisionVerb, Plan, RunStatus, VerificationMode};

use crate::error::ApiError;
use crate::state::SharedState;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn parse_plan(raw: &str) -> Result<Plan, ApiError> {
    match raw {
        "free" => Ok(Plan::Free),
        "builder" => Ok(Plan::Builder),
        "growth" => Ok(Plan::Growth),
        "scale" => Ok(Plan::Scale),
        "enterprise" => Ok(Plan::Enterprise),
        other => Err(ApiError::BadRequest { code: "INVALID_JSON", message: format!("unknown plan `{other}`") }),
    }
}

// ---- tenants ----------------------------------------------------------

/// `POST /v1/tenants`.
#[derive(Deserialize)]
pub struct CreateTenantRequest {
    name: String,
}

#[derive(Serialize)]
struct CreateTenantResponse {
    #[serde(rename = "tenantId")]
    tenant_id: String,
    #[serde(rename = "createdAtMs")]
    created_at_ms: u64,
}

/// Register a new tenant (spec.md §4.2).
pub async fn create_tenant(
    State(state): State<SharedState>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = format!("tenant_{}", uuid::Uuid::new_v4());
    let created_at_ms = now_ms();
    let tenant = state.tenants.create(id, req.name, created_at_ms)?;
    Ok((StatusCode::CREATED, Json(CreateTenantResponse { tenant_id: tenant.id, created_at_ms: tenant.created_at_ms })))
}

/// `GET /v1/tenants/:id/settings`.
pub async fn get_settings(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = state.tenants.get(&tenant_id)?;
    Ok(Json(tenant.settings))
}

/// `PUT /v1/tenants/:id/settings`.
///
/// Per spec.md §5, settings writes are serialized per tenant under a full
/// read-modify-write lock; [`settld_core::tenant::TenantStore::update_settings`]
/// holds its write guard across the whole closure, giving last-writer-wins.
pub async fn put_settings(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
    Json(mut new_settings): Json<settld_core::tenant::TenantSettings>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = state.tenants.get(&tenant_id)?;
    if new_settings.webhook_url.is_some() && tenant.settings.webhook_url.is_none() {
        state.entitlements.check_webhook_quota(tenant.plan, 0)?;
    }
    // Sealed secrets are never accepted verbatim from the wire; callers set
    // `webhookSecret` via a side channel this crate doesn't expose over
    // HTTP, so preserve whatever is already sealed on the tenant.
    new_settings.sealed_webhook_secret = tenant.settings.sealed_webhook_secret.clone();
    let updated = state.tenants.update_settings(&tenant_id, |s| *s = new_settings)?;
    Ok(Json(updated.settings))
}

#[derive(Serialize)]
struct EntitlementsResponse {
    plan: Plan,
    #[serde(rename = "monthlyRunsUsed")]
    monthly_runs_used: u64,
    #[serde(rename = "monthlyRunsLimit")]
    monthly_runs_limit: u64,
}

/// `GET /v1/tenants/:id/entitlements`.
pub async fn get_entitlements(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = state.tenants.get(&tenant_id)?;
    let limits = settld_core::entitlements::limits_for(tenant.plan);
    Ok(Json(EntitlementsResponse {
        plan: tenant.plan,
        monthly_runs_used: state.entitlements.monthly_runs_used(&tenant_id),
        monthly_runs_limit: limits.monthly_runs,
    }))
}

/// `POST /v1/tenants/:id/plan`.
#[derive(Deserialize)]
pub struct PlanRequest {
    plan: String,
}

pub async fn post_plan(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<PlanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = parse_plan(&req.plan)?;
    let tenant = state.tenants.set_plan(&tenant_id, plan)?;
    Ok(Json(tenant))
}

// ---- ingest / upload ---------------------------------------------------

/// Query parameters accepted by `POST /v1/ingest/:tenantId` (spec.md §6).
#[derive(Deserialize, Default)]
pub struct IngestQuery {
    mode: Option<String>,
    #[serde(rename = "vendorId")]
    vendor_id: Option<String>,
}

#[derive(Serialize)]
struct IngestResponse {
    token: String,
    #[serde(rename = "modeResolved")]
    mode_resolved: VerificationMode,
    status: RunStatus,
    deduped: bool,
    /// Set when a deduped upload was re-verified because the tenant's
    /// settings changed since the cached bundle was last verified
    /// (spec.md §3, §4.4 step 3), rather than served straight from cache.
    rerun: bool,
}

/// Enforce the sliding 1-hour `(tenantId, verb)` rate limit (spec.md §4.7).
fn check_rate_limit(state: &SharedState, tenant_id: &str, verb: &str) -> Result<(), ApiError> {
    state.rate_limiter.check(tenant_id, verb).map_err(|retry_after_secs| {
        state.metrics.rate_limited_total.inc();
        ApiError::RateLimited { retry_after_secs }
    })
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let raw = headers.get(axum::http::header::AUTHORIZATION).ok_or(ApiError::Unauthorized)?;
    let raw = raw.to_str().map_err(|_| ApiError::Unauthorized)?;
    raw.strip_prefix("Bearer ").ok_or(ApiError::Unauthorized)
}

/// Ingest a settlement bundle on behalf of a vendor (spec.md §4.4).
///
/// The request body is treated as the canonical bundle JSON directly — this
/// crate does not unzip a real ZIP or invoke an external verifier binary,
/// since `settld-verify` itself is an explicit Non-goal. `vendorId` may be
/// supplied either via the bearer ingest key's own binding or the query
/// string; the ingest key's binding always wins.
pub async fn post_ingest(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<IngestQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let (bound_tenant, vendor_id) = state.ingest_keys.authenticate(token)?;
    if bound_tenant != tenant_id {
        return Err(ApiError::Unauthorized);
    }
    let vendor_id = query.vendor_id.unwrap_or(vendor_id);

    let tenant = state.tenants.get(&tenant_id)?;
    let mode = VerificationMode::parse_opt(query.mode.as_deref())?;
    let stamped = settld_spec::canon::stamp_artifact_hash(&body)?;
    let artifact_hash = stamped["artifactHash"].as_str().expect("just stamped").to_string();

    if let Some(existing) = state.existing_upload_token(&tenant_id, &artifact_hash) {
        let mut bundle = state.artifacts.get(&artifact_hash)?;
        // A settings change since this bundle was last verified (e.g. a new
        // governance trust root) can flip the outcome, so a deduped upload
        // is rerun rather than served stale (spec.md §3, §4.4 step 3).
        let rerun = bundle.verified_settings_version != tenant.settings_version;
        let outcome = run_verification(&bundle.body, bundle.mode, &tenant.settings.governance_trust_root_key_ids);
        if rerun {
            bundle.verified_settings_version = tenant.settings_version;
            state.artifacts.put(artifact_hash.clone(), bundle.clone());
        }
        state.metrics.uploads_total.with_label_values(&["deduped"]).inc();
        return Ok(Json(IngestResponse {
            token: existing.to_string(),
            mode_resolved: bundle.mode,
            status: outcome.status,
            deduped: true,
            rerun,
        }));
    }

    check_rate_limit(&state, &tenant_id, "upload")?;
    state.entitlements.record_run(&tenant_id, tenant.plan)?;

    let outcome = run_verification(&stamped, mode, &tenant.settings.governance_trust_root_key_ids);
    state.artifacts.put(
        artifact_hash.clone(),
        StoredBundle {
            tenant_id: tenant_id.clone(),
            vendor_id,
            mode,
            body: stamped,
            uploaded_at_ms: now_ms(),
            verified_settings_version: tenant.settings_version,
        },
    );

    let buyer_email = body.get("buyerEmail").and_then(Value::as_str).unwrap_or("buyer@unknown").to_string();
    let issued = state.magic_links.issue(tenant_id.clone(), artifact_hash.clone(), buyer_email);
    state.record_upload_token(&tenant_id, &artifact_hash, issued.clone());

    state.metrics.uploads_total.with_label_values(&[status_label(outcome.status)]).inc();

    let log = state.audit_log_for(&tenant_id).map_err(|e| ApiError::Internal(e.to_string()))?;
    let prev = log.head();
    log.append(
        prev.as_deref(),
        settld_core::audit::AuditLogRow {
            kind: "upload".into(),
            at_ms: now_ms(),
            payload: serde_json::json!({"runId": artifact_hash, "status": outcome.status}),
        },
    )?;

    if let Some(url) = tenant.settings.webhook_url.clone() {
        let kind = if outcome.status == RunStatus::Red { "verification.failed" } else { "verification.completed" };
        state.outbox.enqueue(NewOutboxEntry {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            tenant_id: tenant_id.clone(),
            provider: Provider::Webhook,
            token: Some(issued.as_str().to_string()),
            url,
            body: serde_json::json!({"type": kind, "runId": artifact_hash, "status": outcome.status}),
            headers: std::collections::HashMap::new(),
            encrypted_secret: tenant.settings.sealed_webhook_secret.clone(),
            idempotency_key: format!("{kind}:{artifact_hash}"),
        });
    }

    Ok(Json(IngestResponse {
        token: issued.to_string(),
        mode_resolved: mode,
        status: outcome.status,
        deduped: false,
        rerun: false,
    }))
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Green => "green",
        RunStatus::Amber => "amber",
        RunStatus::Red => "red",
        RunStatus::Processing => "processing",
    }
}

// ---- receipt views / decision -----------------------------------------

#[derive(Serialize)]
struct VerifyJsonResponse {
    #[serde(rename = "schemaVersion")]
    schema_version: &'static str,
    ok: bool,
    status: RunStatus,
    findings: Vec<settld_core::pipeline::Finding>,
}

/// `GET /r/:token/verify.json`.
pub async fn get_verify_json(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (tenant_id, run_id, _email) = state.magic_links.resolve(&token)?;
    check_rate_limit(&state, &tenant_id, "view")?;
    let tenant = state.tenants.get(&tenant_id)?;
    let bundle = state.artifacts.get(&run_id)?;
    let outcome = run_verification(&bundle.body, bundle.mode, &tenant.settings.governance_trust_root_key_ids);
    Ok(Json(VerifyJsonResponse {
        schema_version: "VerifyCliOutput.v1",
        ok: outcome.status != RunStatus::Red,
        status: outcome.status,
        findings: outcome.findings,
    }))
}

/// `GET /r/:token/receipt.json`.
pub async fn get_receipt_json(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (tenant_id, run_id, _email) = state.magic_links.resolve(&token)?;
    check_rate_limit(&state, &tenant_id, "view")?;
    let decision = state.decisions.get(&run_id).ok_or(ApiError::NotFound { code: "RUN_NOT_FOUND" })?;
    Ok(Json(decision))
}

/// `POST /r/:token/otp/request`.
#[derive(Deserialize)]
pub struct OtpRequestBody {
    email: String,
}

#[derive(Serialize)]
struct OtpRequestResponse {
    sent: bool,
}

pub async fn post_otp_request(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Json(req): Json<OtpRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (tenant_id, run_id, _email) = state.magic_links.resolve(&token)?;
    let code = state.otp.request(tenant_id.clone(), run_id.clone(), req.email.clone());
    // "email" delivery mode (spec.md §4.6): write to the outbox for an
    // external mailer rather than performing HTTP here.
    state.outbox.enqueue(NewOutboxEntry {
        id: format!("otp_{}", uuid::Uuid::new_v4()),
        tenant_id,
        provider: Provider::BuyerNotification,
        token: Some(token),
        url: format!("mailto:{}", req.email),
        body: serde_json::json!({"type": "decision.otp", "runId": run_id, "code": code}),
        headers: std::collections::HashMap::new(),
        encrypted_secret: None,
        idempotency_key: format!("otp:{run_id}:{}", req.email),
    });
    Ok(Json(OtpRequestResponse { sent: true }))
}

/// `POST /r/:token/decision`.
#[derive(Deserialize)]
pub struct DecisionRequestBody {
    decision: String,
    email: Option<String>,
    otp: Option<String>,
}

/// Resolve which auth method a decision request satisfies, following the
/// precedence spec.md §4.5 defines for a non-empty `decisionAuthEmailDomains`
/// allowlist. This crate has no buyer-session cookie layer, so step 1
/// (`buyer_session`) never applies here — only the OTP and unauthenticated
/// paths are reachable, which is recorded as an Open Question decision.
fn resolve_auth_method(
    state: &SharedState,
    allowlist: &[String],
    tenant_id: &str,
    run_id: &str,
    req: &DecisionRequestBody,
) -> Result<(AuthMethod, String), ApiError> {
    if allowlist.is_empty() {
        return Ok((AuthMethod::Unauthenticated, req.email.clone().unwrap_or_default()));
    }
    let email = req.email.as_deref().ok_or(ApiError::BadRequest { code: "OTP_REQUIRED", message: "email required".into() })?;
    let domain_allowed = allowlist.iter().any(|d| email.ends_with(d.as_str()));
    let otp = req.otp.as_deref().ok_or(ApiError::BadRequest { code: "OTP_REQUIRED", message: "otp required".into() })?;
    if !domain_allowed {
        return Err(ApiError::BadRequest { code: "OTP_REQUIRED", message: "email domain not allowed".into() });
    }
    state.otp.verify(tenant_id, run_id, email, otp)?;
    Ok((AuthMethod::EmailOtp, email.to_string()))
}

pub async fn post_decision(
    State(state): State<SharedState>,
    Path(token): Path<String>,
    Json(req): Json<DecisionRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (tenant_id, run_id, _issued_email) = state.magic_links.resolve(&token)?;
    check_rate_limit(&state, &tenant_id, "decision")?;
    let tenant = state.tenants.get(&tenant_id)?;
    let bundle = state.artifacts.get(&run_id)?;
    let outcome = run_verification(&bundle.body, bundle.mode, &tenant.settings.governance_trust_root_key_ids);

    let (auth_method, actor) =
        resolve_auth_method(&state, &tenant.settings.buyer_email_allowlist, &tenant_id, &run_id, &req)?;

    let verb = match req.decision.as_str() {
        "approve" => DecisionVerb::Approve,
        "hold" => DecisionVerb::Hold,
        other => return Err(ApiError::BadRequest { code: "INVALID_JSON", message: format!("unknown decision `{other}`") }),
    };

    let policy = tenant.settings.vendor_policies.get(&bundle.vendor_id).cloned().unwrap_or_else(VendorPolicy::default);
    let decision = decide(&policy, run_id.clone(), verb, outcome.status, auth_method, actor, now_ms(), state.decision_signer())?;
    let recorded = state.decisions.record(decision)?;

    state.metrics.decisions_total.with_label_values(&[verb_label(verb)]).inc();

    let log = state.audit_log_for(&tenant_id).map_err(|e| ApiError::Internal(e.to_string()))?;
    let prev = log.head();
    log.append(
        prev.as_deref(),
        settld_core::audit::AuditLogRow {
            kind: "decision".into(),
            at_ms: now_ms(),
            payload: serde_json::to_value(&recorded).map_err(|e| ApiError::Internal(e.to_string()))?,
        },
    )?;

    if let Some(url) = tenant.settings.webhook_url.clone() {
        let kind = if recorded.verb == DecisionVerb::Approve { "decision.approved" } else { "decision.held" };
        state.outbox.enqueue(NewOutboxEntry {
            id: format!("evt_{}", uuid::Uuid::new_v4()),
            tenant_id,
            provider: Provider::Webhook,
            token: Some(token),
            url,
            body: serde_json::json!({"type": kind, "runId": run_id}),
            headers: std::collections::HashMap::new(),
            encrypted_secret: tenant.settings.sealed_webhook_secret.clone(),
            idempotency_key: format!("{kind}:{run_id}"),
        });
    }

    Ok(Json(recorded))
}

fn verb_label(verb: DecisionVerb) -> &'static str {
    match verb {
        DecisionVerb::Approve => "approve",
        DecisionVerb::Hold => "hold",
    }
}

/// `POST /v1/revoke`.
#[derive(Deserialize)]
pub struct RevokeBody {
    token: String,
}

pub async fn post_revoke(State(state): State<SharedState>, Json(req): Json<RevokeBody>) -> Result<impl IntoResponse, ApiError> {
    state.magic_links.revoke(&req.token)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- outbox operator endpoints ------------------------------------------

/// `GET /v1/tenants/:id/webhook-retries?state=pending|dead-letter`.
#[derive(Deserialize, Default)]
pub struct WebhookRetriesQuery {
    state: Option<String>,
}

pub async fn get_webhook_retries(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<WebhookRetriesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.tenants.get(&tenant_id)?;
    let records = match query.state.as_deref() {
        Some("dead-letter") => state.outbox.dead_letters_for(&tenant_id),
        _ => state.outbox.due_records().into_iter().filter(|r| r.tenant_id == tenant_id).collect(),
    };
    Ok(Json(records))
}

#[derive(Serialize)]
struct RunOnceResponse {
    delivered: u64,
    #[serde(rename = "deadLettered")]
    dead_lettered: u64,
}

/// `POST /v1/tenants/:id/webhook-retries/run-once`.
///
/// Drains at most one wave of due entries for the tenant, performing real
/// HMAC-signed HTTP delivery via `settld-transport`, grounded in spec.md
/// §4.6 step 2's "cooperative worker polls due entries" algorithm. Tests
/// drive this explicitly rather than relying on a background tick loop.
pub async fn post_run_once(
    State(state): State<SharedState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = state.tenants.get(&tenant_id)?;
    let secret = match &tenant.settings.sealed_webhook_secret {
        Some(sealed) => unseal_secret(&state.config.seal_key, sealed).map_err(|e| ApiError::Internal(e.to_string()))?,
        None => String::new(),
    };
    let due: Vec<_> = state.outbox.due_records().into_iter().filter(|r| r.tenant_id == tenant_id).collect();
    let mut delivered = 0u64;
    let mut dead_lettered = 0u64;
    for record in due {
        match settld_transport::webhook::deliver(&record.url, &secret, &record.body).await {
            Ok(()) => {
                state.outbox.mark_delivered(&record.id);
                state.metrics.outbox_delivered_total.inc();
                delivered += 1;
            }
            Err(err) => {
                if let Some((updated, should_alert)) = state.outbox.mark_failed(&record.id, err.to_string()) {
                    if updated.stage == DeliveryStage::DeadLettered {
                        dead_lettered += 1;
                        if should_alert {
                            state.metrics.outbox_dead_letter_total.inc();
                        }
                    }
                }
            }
        }
    }
    Ok(Json(RunOnceResponse { delivered, dead_lettered }))
}

/// `POST /v1/tenants/:id/webhook-retries/:recordId/replay`.
#[derive(Deserialize, Default)]
pub struct ReplayBody {
    /// Unused: a requeued record always restarts at attempt 0, so an
    /// explicit "don't reset" mode has no effect to model.
    #[serde(default, rename = "resetAttempts")]
    #[allow(dead_code)]
    reset_attempts: bool,
    /// Provider the caller asserts this record belongs to. When present and
    /// it doesn't match the stored record, the replay is rejected with
    /// `409 PROVIDER_MISMATCH` (spec.md §4.6.5, §7) instead of silently
    /// requeuing a different provider's entry.
    #[serde(default)]
    provider: Option<String>,
}

fn parse_provider(raw: &str) -> Result<Provider, ApiError> {
    match raw {
        "webhook" => Ok(Provider::Webhook),
        "slack" => Ok(Provider::Slack),
        "zapier" => Ok(Provider::Zapier),
        "buyer_notification" => Ok(Provider::BuyerNotification),
        "payment_trigger" => Ok(Provider::PaymentTrigger),
        other => Err(ApiError::BadRequest { code: "INVALID_JSON", message: format!("unknown provider `{other}`") }),
    }
}

pub async fn post_replay(
    State(state): State<SharedState>,
    Path((tenant_id, record_id)): Path<(String, String)>,
    Json(req): Json<ReplayBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.tenants.get(&tenant_id)?;
    let requested_provider = req.provider.as_deref().map(parse_provider).transpose()?;
    let requeued = state.outbox.requeue(&record_id, requested_provider)?;
    Ok(Json(requeued))
}

// ---- system --------------------------------------------------------------

const PROTOCOL_VERSION: &str = "1.0";

/// `GET /metrics`.
pub async fn get_metrics(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render().map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
    Ok(response)
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
}

/// `GET /healthz`. Advertises the runtime-coupling protocol version clients
/// must echo back as `x-settld-protocol` on writes (spec.md §4.8).
pub async fn get_healthz() -> impl IntoResponse {
    let mut response = Json(HealthReport { status: "ok" }).into_response();
    response.headers_mut().insert("x-settld-protocol", HeaderValue::from_static(PROTOCOL_VERSION));
    response
}

#[derive(Serialize)]
struct ReadyReport {
    status: &'static str,
}

/// `GET /readyz`.
pub async fn get_readyz() -> impl IntoResponse {
    Json(ReadyReport { status: "ready" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_label_covers_every_run_status() {
        assert_eq!(status_label(RunStatus::Green), "green");
        assert_eq!(status_label(RunStatus::Amber), "amber");
        assert_eq!(status_label(RunStatus::Red), "red");
        assert_eq!(status_label(RunStatus::Processing), "processing");
    }

    #[test]
    fn parse_plan_rejects_unknown() {
        assert!(parse_plan("bogus").is_err());
        assert!(parse_plan("growth").is_ok());
    }

    #[test]
    fn verb_label_round_trips() {
        assert_eq!(verb_label(DecisionVerb::Approve), "approve");
        assert_eq!(verb_label(DecisionVerb::Hold), "hold");
    }

    #[test]
    fn parse_provider_rejects_unknown() {
        assert!(matches!(parse_provider("webhook"), Ok(Provider::Webhook)));
        assert!(matches!(parse_provider("payment_trigger"), Ok(Provider::PaymentTrigger)));
        assert!(parse_provider("bogus").is_err());
    }
}
