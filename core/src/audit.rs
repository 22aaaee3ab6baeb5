//! Tenant audit trail and export packaging.
//!
//! `AuditLogRow` is the generic row type [`crate::AuditLog`] chains; export
//! packaging is grounded in `AuditTerminal::export_with_proofs`, which
//! requests a ledger slice, bundles it with its Merkle receipts, and
//! emits a single artifact. Here the artifact is a deterministic ZIP rather
//! than a bincode blob, built with `settld_spec::zipfile`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use settld_spec::chain::ChainLink;
use settld_spec::zipfile::{build_deterministic_zip, ZipBuildError, ZipEntry};

use crate::{AuditLog, MerkleReceipt};

/// A single hash-chained audit trail row (spec.md SPEC_FULL.md §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogRow {
    /// Event kind, e.g. `"upload"`, `"decision"`, `"outbox_delivered"`.
    pub kind: String,
    /// Unix millis event timestamp.
    pub at_ms: u64,
    /// Event-specific payload.
    pub payload: Value,
}

impl ChainLink for AuditLogRow {
    fn body(&self) -> &Value {
        &self.payload
    }
}

/// Per-tenant audit trail: a hash-chained [`AuditLog`] of [`AuditLogRow`]s.
pub type TenantAuditLog = AuditLog<AuditLogRow>;

/// Errors raised while building an export packet.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Failed to serialize a manifest or receipt entry.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Failed to build the deterministic ZIP.
    #[error(transparent)]
    Zip(#[from] ZipBuildError),
}

/// Build a monthly audit packet: all audit rows in `[from, from+limit)`, each
/// paired with its Merkle inclusion receipt, packaged as a deterministic ZIP
/// with a top-level `manifest.json` (spec.md §4.10).
pub fn build_audit_packet(log: &TenantAuditLog, from: usize, limit: usize) -> Result<Vec<u8>, ExportError> {
    let rows = log.read(from, limit);
    let mut manifest_entries = Vec::with_capacity(rows.len());
    let mut owned_entries: Vec<(String, Vec<u8>)> = Vec::new();

    for (offset, row) in rows.iter().enumerate() {
        let index = from + offset;
        let row_bytes = serde_json::to_vec_pretty(row)?;
        let row_path = format!("rows/{index:010}.json");
        manifest_entries.push(serde_json::json!({
            "index": index,
            "kind": row.kind,
            "path": row_path,
        }));
        owned_entries.push((row_path, row_bytes));

        if let Some(receipt) = log.receipt_for(index) {
            let receipt_path = format!("receipts/{index:010}.json");
            owned_entries.push((receipt_path, serde_json::to_vec_pretty(&receipt)?));
        }
    }

    let manifest = serde_json::json!({
        "from": from,
        "count": rows.len(),
        "chainHeadAtExport": log.head(),
        "rows": manifest_entries,
    });
    owned_entries.push(("manifest.json".to_string(), serde_json::to_vec_pretty(&manifest)?));

    let entries = owned_entries
        .iter()
        .map(|(path, bytes)| ZipEntry { path: path.clone(), bytes })
        .collect();
    Ok(build_deterministic_zip(entries)?)
}

/// Prove that a single audit row is included in the tenant's log, without
/// exporting the full packet (SPEC_FULL.md §1.2).
pub fn prove_inclusion(log: &TenantAuditLog, index: usize) -> Option<MerkleReceipt> {
    log.receipt_for(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        let id = uuid::Uuid::new_v4();
        path.push(format!("settld-audit-{prefix}-{id}"));
        let _ = fs::remove_dir_all(&path);
        path
    }

    #[test]
    fn audit_packet_is_byte_identical_across_builds() {
        let dir = temp_dir("packet");
        let log: TenantAuditLog = AuditLog::open(&dir).unwrap();
        let mut prev = None;
        for n in 0..3 {
            let (_, head) = log
                .append(
                    prev.as_deref(),
                    AuditLogRow { kind: "upload".into(), at_ms: n, payload: serde_json::json!({"n": n}) },
                )
                .unwrap();
            prev = Some(head);
        }
        let a = build_audit_packet(&log, 0, 10).unwrap();
        let b = build_audit_packet(&log, 0, 10).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn prove_inclusion_returns_a_verifiable_receipt() {
        let dir = temp_dir("prove");
        let log: TenantAuditLog = AuditLog::open(&dir).unwrap();
        log.append(None, AuditLogRow { kind: "upload".into(), at_ms: 0, payload: serde_json::json!({}) })
            .unwrap();
        let receipt = prove_inclusion(&log, 0).unwrap();
        assert!(receipt.verify());
    }
}
