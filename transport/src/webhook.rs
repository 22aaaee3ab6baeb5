//! Signed webhook delivery (spec.md §4.6).

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::{as_json, client, sign_webhook_body, status_or_err, TransportError};

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Deliver a single webhook notification, signing `ts + "." + body` with
/// the tenant's sealed HMAC secret and attaching the result as
/// `x-settld-signature: v1=<hex>` alongside the `ts` it was computed over
/// as `x-settld-timestamp`, per spec.md §4.6.1/§6.
pub async fn deliver(url: &str, secret: &str, body: &Value) -> Result<(), TransportError> {
    let bytes = as_json(body);
    let timestamp_secs = now_secs();
    let signature = sign_webhook_body(secret, timestamp_secs, &bytes);
    let response = client()
        .post(url)
        .header("content-type", "application/json")
        .header("x-settld-signature", signature)
        .header("x-settld-timestamp", timestamp_secs.to_string())
        .body(bytes)
        .send()
        .await?;
    let status = response.status();
    let body_text = response.text().await.unwrap_or_default();
    status_or_err(status, body_text).await
}
