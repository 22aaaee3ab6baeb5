//! First-paid-call demo harness (spec.md §4.8): registers payer and payee,
//! credits the payer, creates an RFQ, submits and accepts a bid, appends a
//! `RUN_COMPLETED` event against the ops API under the correct previous
//! chain hash, then polls the control plane until the run's verification
//! goes green and a decision is recorded.
//!
//! Grounded in `ArdaOrchestrator`'s shape: a single stateful client that
//! is replay-safe by construction. There, replay safety comes from
//! hydrating a local append log before acting; here the ops API (not this
//! crate) owns the durable ledger, so replay safety instead comes from
//! keying every attempt by a caller-supplied `attemptId` and resuming from
//! whatever [`Stage`] that attempt last reached rather than repeating
//! completed steps.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub use settld_transport::runtime_coupling::{RuntimeCouplingClient, RuntimeCouplingError};
use settld_spec::chain::ChainState;

/// Stages a demo attempt walks through, in order. Stored per `attemptId` so
/// `{replayAttemptId}` resumes instead of repeating completed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Payer and payee accounts registered.
    Registered,
    /// Payer account credited.
    Credited,
    /// RFQ opened against the payer.
    RfqCreated,
    /// Payee bid submitted.
    BidSubmitted,
    /// Bid accepted; a run id was minted.
    BidAccepted,
    /// `RUN_COMPLETED` event appended to the ops API event stream.
    RunCompleted,
    /// Bundle ingested and a buyer receipt token issued.
    Ingested,
    /// Verification reached `green` and a decision was recorded.
    Settled,
}

/// Snapshot of one attempt's progress, keyed by `attemptId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Caller-supplied idempotency key for the whole attempt.
    pub attempt_id: String,
    /// Furthest stage this attempt has reached.
    pub stage: Stage,
    /// Payer account id, once registered.
    pub payer_id: Option<String>,
    /// Payee account id, once registered.
    pub payee_id: Option<String>,
    /// RFQ id, once created.
    pub rfq_id: Option<String>,
    /// Bid id, once submitted.
    pub bid_id: Option<String>,
    /// Run id, once the bid is accepted.
    pub run_id: Option<String>,
    /// Buyer receipt token, once the settlement bundle is ingested.
    pub receipt_token: Option<String>,
}

impl AttemptRecord {
    fn new(attempt_id: String) -> Self {
        Self {
            attempt_id,
            stage: Stage::Registered,
            payer_id: None,
            payee_id: None,
            rfq_id: None,
            bid_id: None,
            run_id: None,
            receipt_token: None,
        }
    }
}

/// Errors raised while driving an attempt to completion.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Underlying HTTP transport failure.
    #[error(transparent)]
    Transport(#[from] settld_transport::TransportError),
    /// The ops API's chained-event write was rejected on a stale prev-hash.
    #[error(transparent)]
    RuntimeCoupling(#[from] RuntimeCouplingError),
    /// The demo ops API or control plane returned a non-success response.
    #[error("call failed: {0}")]
    Ops(String),
    /// The run never reached `green`/decided after the configured poll budget.
    #[error("run {0} did not settle within the poll budget")]
    PollBudgetExhausted(String),
}

/// Thin client over the demo ops API (payer/payee/credit/RFQ/bid, a stand-in
/// for the real billing/marketplace backend spec.md §1 scopes out of this
/// crate) plus the control plane's own ingest/receipt endpoints.
pub struct OpsApiClient {
    http: reqwest::Client,
    ops_base_url: String,
    control_plane_base_url: String,
    tenant_id: String,
    ingest_key: String,
}

impl OpsApiClient {
    /// Construct a client against a demo ops API and a control plane instance.
    pub fn new(ops_base_url: String, control_plane_base_url: String, tenant_id: String, ingest_key: String) -> Self {
        Self { http: reqwest::Client::new(), ops_base_url, control_plane_base_url, tenant_id, ingest_key }
    }

    /// The control plane base URL this client was constructed with.
    pub fn control_plane_base_url(&self) -> &str {
        &self.control_plane_base_url
    }

    async fn post_json(&self, base: &str, path: &str, body: Value) -> Result<Value, HarnessError> {
        let url = format!("{base}{path}");
        let response = self.http.post(&url).json(&body).send().await.map_err(settld_transport::TransportError::Request)?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(HarnessError::Ops(format!("{path} -> {status}: {text}")));
        }
        serde_json::from_str(&text).map_err(|e| HarnessError::Ops(e.to_string()))
    }

    /// Register a fresh payer/payee pair.
    pub async fn register_accounts(&self) -> Result<(String, String), HarnessError> {
        let body = self.post_json(&self.ops_base_url.clone(), "/demo/accounts", json!({})).await?;
        Ok((body["payerId"].as_str().unwrap_or_default().to_string(), body["payeeId"].as_str().unwrap_or_default().to_string()))
    }

    /// Credit the payer account ahead of the RFQ.
    pub async fn credit_payer(&self, payer_id: &str, amount_cents: u64) -> Result<(), HarnessError> {
        self.post_json(&self.ops_base_url.clone(), &format!("/demo/accounts/{payer_id}/credit"), json!({"amountCents": amount_cents}))
            .await?;
        Ok(())
    }

    /// Open an RFQ against the payer.
    pub async fn create_rfq(&self, payer_id: &str) -> Result<String, HarnessError> {
        let body = self.post_json(&self.ops_base_url.clone(), "/demo/rfqs", json!({"payerId": payer_id})).await?;
        Ok(body["rfqId"].as_str().unwrap_or_default().to_string())
    }

    /// Submit a payee bid against the RFQ.
    pub async fn submit_bid(&self, rfq_id: &str, payee_id: &str) -> Result<String, HarnessError> {
        let body =
            self.post_json(&self.ops_base_url.clone(), &format!("/demo/rfqs/{rfq_id}/bids"), json!({"payeeId": payee_id})).await?;
        Ok(body["bidId"].as_str().unwrap_or_default().to_string())
    }

    /// Accept the bid, minting a run id.
    pub async fn accept_bid(&self, rfq_id: &str, bid_id: &str) -> Result<String, HarnessError> {
        let body = self.post_json(&self.ops_base_url.clone(), &format!("/demo/rfqs/{rfq_id}/bids/{bid_id}/accept"), json!({})).await?;
        Ok(body["runId"].as_str().unwrap_or_default().to_string())
    }

    /// Upload the completed run's settlement bundle to the control plane,
    /// returning the buyer receipt token.
    pub async fn ingest_run_bundle(&self, run_id: &str, bundle: Value) -> Result<String, HarnessError> {
        let url = format!("{}/v1/ingest/{}", self.control_plane_base_url, self.tenant_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.ingest_key)
            .query(&[("vendorId", "first-paid-call-harness")])
            .json(&bundle)
            .send()
            .await
            .map_err(settld_transport::TransportError::Request)?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(HarnessError::Ops(format!("ingest {run_id} -> {status}: {text}")));
        }
        let body: Value = serde_json::from_str(&text).map_err(|e| HarnessError::Ops(e.to_string()))?;
        Ok(body["token"].as_str().unwrap_or_default().to_string())
    }

    /// Poll the buyer receipt token's verify view for its resolved status.
    pub async fn poll_verify_status(&self, token: &str) -> Result<String, HarnessError> {
        let url = format!("{}/r/{}/verify.json", self.control_plane_base_url, token);
        let response = self.http.get(&url).send().await.map_err(settld_transport::TransportError::Request)?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(HarnessError::Ops(format!("verify.json -> {status}: {text}")));
        }
        let body: Value = serde_json::from_str(&text).map_err(|e| HarnessError::Ops(e.to_string()))?;
        Ok(body["status"].as_str().unwrap_or_default().to_string())
    }

    /// Poll the buyer receipt token's decision view, if one has been recorded.
    pub async fn poll_decision(&self, token: &str) -> Result<Option<Value>, HarnessError> {
        let url = format!("{}/r/{}/receipt.json", self.control_plane_base_url, token);
        let response = self.http.get(&url).send().await.map_err(settld_transport::TransportError::Request)?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let text = response.text().await.unwrap_or_default();
        Ok(Some(serde_json::from_str(&text).map_err(|e| HarnessError::Ops(e.to_string()))?))
    }
}

/// Orchestrates one first-paid-call attempt end to end, idempotently.
pub struct FirstPaidCallHarness {
    ops: OpsApiClient,
    runtime_coupling: RuntimeCouplingClient,
    attempts: RwLock<HashMap<String, AttemptRecord>>,
}

impl FirstPaidCallHarness {
    /// Construct a harness driving `ops` and appending chained events via
    /// `runtime_coupling`.
    pub fn new(ops: OpsApiClient, runtime_coupling: RuntimeCouplingClient) -> Self {
        Self { ops, runtime_coupling, attempts: RwLock::new(HashMap::new()) }
    }

    /// Run (or resume) an attempt through to settlement.
    ///
    /// Calling this twice with the same `attempt_id` does not repeat any
    /// step already recorded against it — it picks up at the attempt's
    /// current [`Stage`], the harness equivalent of `{replayAttemptId}`.
    pub async fn run_attempt(&self, attempt_id: &str, chain: &mut ChainState, poll_budget: u32) -> Result<AttemptRecord, HarnessError> {
        let mut record = self
            .attempts
            .read()
            .get(attempt_id)
            .cloned()
            .unwrap_or_else(|| AttemptRecord::new(attempt_id.to_string()));

        if record.stage == Stage::Registered && record.payer_id.is_none() {
            let (payer_id, payee_id) = self.ops.register_accounts().await?;
            record.payer_id = Some(payer_id);
            record.payee_id = Some(payee_id);
            record.stage = Stage::Credited;
            self.checkpoint(record.clone());
        }
        let payer_id = record.payer_id.clone().expect("set above");
        let payee_id = record.payee_id.clone().expect("set above");

        if record.stage == Stage::Credited {
            self.ops.credit_payer(&payer_id, 10_000).await?;
            record.stage = Stage::RfqCreated;
            self.checkpoint(record.clone());
        }

        if record.rfq_id.is_none() {
            record.rfq_id = Some(self.ops.create_rfq(&payer_id).await?);
            record.stage = Stage::BidSubmitted;
            self.checkpoint(record.clone());
        }
        let rfq_id = record.rfq_id.clone().expect("set above");

        if record.bid_id.is_none() {
            record.bid_id = Some(self.ops.submit_bid(&rfq_id, &payee_id).await?);
            record.stage = Stage::BidAccepted;
            self.checkpoint(record.clone());
        }
        let bid_id = record.bid_id.clone().expect("set above");

        if record.run_id.is_none() {
            record.run_id = Some(self.ops.accept_bid(&rfq_id, &bid_id).await?);
            record.stage = Stage::RunCompleted;
            self.checkpoint(record.clone());
        }
        let run_id = record.run_id.clone().expect("set above");

        if record.stage == Stage::RunCompleted && record.receipt_token.is_none() {
            self.runtime_coupling
                .write_event(
                    "/v1/events",
                    chain,
                    &json!({"type": "RUN_COMPLETED", "runId": run_id, "attemptId": attempt_id}),
                )
                .await?;
            let bundle = json!({"runId": run_id, "vendorId": "first-paid-call-harness", "attemptId": attempt_id});
            record.receipt_token = Some(self.ops.ingest_run_bundle(&run_id, bundle).await?);
            record.stage = Stage::Ingested;
            self.checkpoint(record.clone());
        }
        let token = record.receipt_token.clone().expect("set above");

        if record.stage != Stage::Settled {
            for _ in 0..poll_budget {
                let status = self.ops.poll_verify_status(&token).await?;
                if status == "green" {
                    if self.ops.poll_decision(&token).await?.is_some() {
                        record.stage = Stage::Settled;
                        self.checkpoint(record.clone());
                        break;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
            if record.stage != Stage::Settled {
                return Err(HarnessError::PollBudgetExhausted(run_id));
            }
        }

        Ok(record)
    }

    fn checkpoint(&self, record: AttemptRecord) {
        self.attempts.write().insert(record.attempt_id.clone(), record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_record_starts_at_registered() {
        let record = AttemptRecord::new("attempt_1".into());
        assert_eq!(record.stage, Stage::Registered);
        assert!(record.run_id.is_none());
    }
}
