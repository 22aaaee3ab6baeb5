//! Settld control-plane core: tenant store, token/artifact vault,
//! verification pipeline, decision engine, outbox, entitlements, and the
//! audit/export packager.
//!
//! The hash-chained [`AuditLog`] below is the one piece of this crate kept
//! closest to its origin: a disk-backed, checksummed, WAL-then-segment
//! append log with Merkle receipts, the same shape the ledger daemon this
//! workspace grew from uses for its envelope log. Here it is genericized
//! over any row that can report its own canonical body, and backs both the
//! per-tenant audit trail (SPEC_FULL.md §3.1) and the outbox delivery log a
//! Merkle receipt can be issued against (SPEC_FULL.md §1.2).
#![deny(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{Read as IoRead, Seek, SeekFrom, Write as IoWrite};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use settld_spec::chain::{ChainError, ChainLink, ChainState};
use settld_spec::canon::sha256_hex;

/// Tenant store: tenant records, vendor/role accounts, settings, sealed secrets.
pub mod tenant;
/// Token and artifact vault: magic links, ingest keys, uploaded bundle storage.
pub mod vault;
/// Verification pipeline and decision engine.
pub mod pipeline;
/// Outbox delivery engine: queueing, retry backoff, dead-lettering.
pub mod outbox;
/// Entitlements and quota tracking against the plan catalog.
pub mod entitlements;
/// Audit trail rows and export packaging (monthly packet, support bundle).
pub mod audit;
/// Sliding-window rate limiting per tenant and verb.
pub mod ratelimit;

/// Errors raised appending to or reading an [`AuditLog`].
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// The claimed prev-hash didn't match the chain head.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Storage or I/O failure.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

const CHECKSUM_DOMAIN: &[u8] = b"settld:wal:v1";
const DEFAULT_SEGMENT_SIZE: usize = 1024;

fn record_checksum(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(CHECKSUM_DOMAIN);
    hasher.update(bytes);
    hasher.finalize().into()
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct AuditLogMetadata {
    length: usize,
    head: Option<String>,
}

struct AuditLogState<T> {
    entries: Vec<T>,
    head: Option<String>,
    wal_entries: usize,
}

/// Disk-backed, hash-chained append log with checksummed WAL and segment
/// compaction. Every row must implement [`ChainLink`] so the chain head can
/// be recomputed on append and verified on recovery.
pub struct AuditLog<T> {
    state: Arc<RwLock<AuditLogState<T>>>,
    wal: Arc<Mutex<File>>,
    segments: Arc<Mutex<File>>,
    meta_path: PathBuf,
    wal_path: PathBuf,
    dir: PathBuf,
    segment_size: usize,
    _row: PhantomData<T>,
}

impl<T> AuditLog<T>
where
    T: Serialize + DeserializeOwned + ChainLink + Clone,
{
    /// Open (or create) a hash-chained log at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, AppendError> {
        Self::open_with_segment_size(dir, DEFAULT_SEGMENT_SIZE)
    }

    /// Open (or create) a hash-chained log at `dir` with a custom segment size.
    pub fn open_with_segment_size<P: AsRef<Path>>(
        dir: P,
        segment_size: usize,
    ) -> Result<Self, AppendError> {
        let dir = dir.as_ref();
        let segment_size = segment_size.max(1);
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let wal_path = dir.join("append.wal");
        let segments_path = dir.join("segments.bin");
        let meta_path = dir.join("meta.json");

        let mut entries: Vec<T> = read_records(&segments_path)?;
        let wal_entries = read_records(&wal_path)?;
        let wal_count = wal_entries.len();
        entries.extend(wal_entries);

        let head = recompute_head(&entries)?;
        let current_meta = AuditLogMetadata {
            length: entries.len(),
            head: head.clone(),
        };
        if let Some(on_disk) = read_metadata_file(&meta_path) {
            if on_disk != current_meta {
                return Err(anyhow::anyhow!("audit log metadata mismatch during recovery").into());
            }
        }

        let wal = Arc::new(Mutex::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .read(true)
                .open(&wal_path)
                .with_context(|| format!("failed to open wal {}", wal_path.display()))?,
        ));
        let segments = Arc::new(Mutex::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .read(true)
                .open(&segments_path)
                .with_context(|| format!("failed to open segments {}", segments_path.display()))?,
        ));

        let log = Self {
            state: Arc::new(RwLock::new(AuditLogState {
                entries,
                head,
                wal_entries: wal_count,
            })),
            wal,
            segments,
            meta_path,
            wal_path,
            dir: dir.to_path_buf(),
            segment_size,
            _row: PhantomData,
        };
        log.persist_metadata_if_needed()?;
        Ok(log)
    }

    fn persist_metadata_if_needed(&self) -> Result<(), AppendError> {
        let state = self.state.read();
        let expected = AuditLogMetadata {
            length: state.entries.len(),
            head: state.head.clone(),
        };
        match read_metadata_file(&self.meta_path) {
            Some(on_disk) if on_disk == expected => Ok(()),
            _ => self.persist_metadata(&expected),
        }
    }

    fn persist_metadata(&self, meta: &AuditLogMetadata) -> Result<(), AppendError> {
        let tmp = self.meta_path.with_extension("tmp");
        let encoded = serde_json::to_vec(meta).context("failed to serialize audit log metadata")?;
        fs::write(&tmp, encoded).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.meta_path)
            .with_context(|| format!("failed to publish {}", self.meta_path.display()))?;
        Ok(())
    }

    fn write_wal(&self, row: &T) -> Result<(), AppendError> {
        let mut wal = self.wal.lock();
        let bytes = serde_json::to_vec(row).context("failed to serialize row")?;
        let checksum = record_checksum(&bytes);
        let len = (bytes.len() as u32).to_be_bytes();
        wal.write_all(&len).context("failed to write wal length prefix")?;
        wal.write_all(&checksum).context("failed to write wal checksum")?;
        wal.write_all(&bytes).context("failed to write wal body")?;
        wal.flush().context("failed to flush wal")?;
        wal.sync_all().context("failed to sync wal")?;
        Ok(())
    }

    fn compact_segments(&self) -> Result<(), AppendError> {
        let wal_bytes = fs::read(&self.wal_path).unwrap_or_default();
        if wal_bytes.is_empty() {
            return Ok(());
        }
        {
            let mut segments = self.segments.lock();
            segments
                .write_all(&wal_bytes)
                .context("failed to append compacted wal into segments")?;
            segments.sync_all().context("failed to sync segments")?;
        }
        {
            let mut wal = self.wal.lock();
            wal.set_len(0).context("failed to truncate wal")?;
            wal.seek(SeekFrom::End(0)).context("failed to reset wal cursor")?;
            wal.sync_all().context("failed to sync truncated wal")?;
        }
        self.state.write().wal_entries = 0;
        Ok(())
    }

    /// Append a row, validating its claimed prev-hash against the chain head.
    /// Returns the row's index and the new chain head.
    pub fn append(&self, claimed_prev: Option<&str>, row: T) -> Result<(usize, String), AppendError> {
        let span = tracing::info_span!("audit_log_append", dir = %self.dir.display());
        let _guard = span.enter();
        let mut state = self.state.write();
        let chain = ChainState { head: state.head.clone() };
        let new_head = chain.try_append(claimed_prev, &row)?;
        let index = state.entries.len();
        self.write_wal(&row)?;
        state.entries.push(row);
        state.head = Some(new_head.clone());
        state.wal_entries += 1;
        let meta = AuditLogMetadata {
            length: state.entries.len(),
            head: state.head.clone(),
        };
        let should_compact = meta.length % self.segment_size == 0;
        drop(state);
        self.persist_metadata(&meta)?;
        if should_compact {
            self.compact_segments()?;
        }
        tracing::debug!(offset = index, "audit log row appended");
        Ok((index, new_head))
    }

    /// Current chain head, or `None` if the log is empty.
    pub fn head(&self) -> Option<String> {
        self.state.read().head.clone()
    }

    /// Read a slice of rows.
    pub fn read(&self, offset: usize, limit: usize) -> Vec<T> {
        self.state.read().entries.iter().skip(offset).take(limit).cloned().collect()
    }

    /// Row count.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the log has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compute a Merkle root over the canonical bodies of all current rows.
    pub fn merkle_root(&self) -> Option<[u8; 32]> {
        let state = self.state.read();
        merkle_root_for(&state.entries)
    }

    /// Produce a Merkle inclusion receipt for the row at `index`.
    pub fn receipt_for(&self, index: usize) -> Option<MerkleReceipt> {
        let state = self.state.read();
        if index >= state.entries.len() {
            return None;
        }
        let leaves = leaf_hashes(&state.entries);
        MerkleReceipt::from_leaves(&leaves, index)
    }

    /// Approximate on-disk footprint in bytes.
    pub fn storage_usage_bytes(&self) -> u64 {
        let wal = fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);
        let seg = fs::metadata(self.dir.join("segments.bin")).map(|m| m.len()).unwrap_or(0);
        let meta = fs::metadata(&self.meta_path).map(|m| m.len()).unwrap_or(0);
        wal + seg + meta
    }
}

fn leaf_hash<T: ChainLink>(row: &T) -> [u8; 32] {
    let bytes = settld_spec::canon::canonical_json(row.body()).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hasher.finalize().into()
}

fn leaf_hashes<T: ChainLink>(entries: &[T]) -> Vec<[u8; 32]> {
    entries.iter().map(leaf_hash).collect()
}

fn merkle_root_for<T: ChainLink>(entries: &[T]) -> Option<[u8; 32]> {
    if entries.is_empty() {
        return None;
    }
    compute_merkle_root(&leaf_hashes(entries))
}

fn recompute_head<T: ChainLink>(entries: &[T]) -> Result<Option<String>, AppendError> {
    let mut chain = ChainState::default();
    for row in entries {
        let head_before = chain.head.clone();
        let new_head = chain.try_append(head_before.as_deref(), row)?;
        chain.advance(new_head);
    }
    Ok(chain.head)
}

fn read_metadata_file(path: &Path) -> Option<AuditLogMetadata> {
    fs::read(path).ok().and_then(|bytes| serde_json::from_slice(&bytes).ok())
}

fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, AppendError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).with_context(|| format!("failed to read {}", path.display()))?;
    let mut cursor = 0usize;
    let mut items = Vec::new();
    while cursor < buf.len() {
        if cursor + 4 > buf.len() {
            return Err(anyhow::anyhow!("truncated record length in {}", path.display()).into());
        }
        let len = u32::from_be_bytes(buf[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + 32 + len > buf.len() {
            return Err(anyhow::anyhow!("truncated record body in {}", path.display()).into());
        }
        let checksum: [u8; 32] = buf[cursor..cursor + 32].try_into().unwrap();
        cursor += 32;
        let payload = &buf[cursor..cursor + len];
        cursor += len;
        if record_checksum(payload) != checksum {
            return Err(anyhow::anyhow!("checksum mismatch in {}", path.display()).into());
        }
        let row: T = serde_json::from_slice(payload).context("failed to decode row")?;
        items.push(row);
    }
    Ok(items)
}

fn merkle_parent(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"settld:merkle");
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn compute_merkle_root(items: &[[u8; 32]]) -> Option<[u8; 32]> {
    let mut level = items.to_vec();
    if level.is_empty() {
        return None;
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|chunk| match chunk {
                [left, right] => merkle_parent(left, right),
                [solo] => merkle_parent(solo, solo),
                _ => unreachable!(),
            })
            .collect();
    }
    level.into_iter().next()
}

/// Which side of a proof node the sibling hash sits on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProofPosition {
    /// Sibling sits to the left of the node being proven.
    Left,
    /// Sibling sits to the right of the node being proven.
    Right,
}

/// A node along a Merkle proof path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofNode {
    /// Sibling hash at this level.
    pub sibling: [u8; 32],
    /// Side the sibling sits on.
    pub position: ProofPosition,
}

/// Receipt proving inclusion of a row in an [`AuditLog`] at a point in time.
/// Surfaced to tenants as the "prove inclusion" view over the outbox
/// delivery log and the audit trail (SPEC_FULL.md §1.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MerkleReceipt {
    /// Index of the leaf within the log.
    pub index: usize,
    /// Total leaf count when the receipt was generated.
    pub leaf_count: usize,
    /// Hash of the leaf being proven.
    pub leaf: [u8; 32],
    /// Merkle root over the log at generation time.
    pub root: [u8; 32],
    /// Proof path from leaf to root.
    pub path: Vec<ProofNode>,
}

impl MerkleReceipt {
    /// Build a receipt from a leaf set and a target index.
    pub fn from_leaves(leaves: &[[u8; 32]], index: usize) -> Option<Self> {
        if leaves.is_empty() || index >= leaves.len() {
            return None;
        }
        let mut path = Vec::new();
        let mut current_index = index;
        let mut level = leaves.to_vec();
        while level.len() > 1 {
            let sibling_index = if current_index % 2 == 0 { current_index + 1 } else { current_index - 1 };
            let sibling = if sibling_index < level.len() { level[sibling_index] } else { level[current_index] };
            let position = if current_index % 2 == 0 { ProofPosition::Right } else { ProofPosition::Left };
            path.push(ProofNode { sibling, position });
            let mut next_level = Vec::with_capacity((level.len() + 1) / 2);
            for chunk in level.chunks(2) {
                match chunk {
                    [left, right] => next_level.push(merkle_parent(left, right)),
                    [solo] => next_level.push(merkle_parent(solo, solo)),
                    _ => unreachable!(),
                }
            }
            current_index /= 2;
            level = next_level;
        }
        Some(MerkleReceipt { index, leaf_count: leaves.len(), leaf: leaves[index], root: level[0], path })
    }

    /// Verify this receipt reconstructs its own embedded root.
    pub fn verify(&self) -> bool {
        if self.path.is_empty() && self.leaf_count != 1 {
            return false;
        }
        let mut hash = self.leaf;
        for node in &self.path {
            hash = match node.position {
                ProofPosition::Left => merkle_parent(&node.sibling, &hash),
                ProofPosition::Right => merkle_parent(&hash, &node.sibling),
            };
        }
        hash == self.root
    }
}

/// Shorthand: the hex sha256 digest of an arbitrary byte slice.
pub fn digest_hex(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Row {
        body: Value,
    }

    impl ChainLink for Row {
        fn body(&self) -> &Value {
            &self.body
        }
    }

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        let id = uuid::Uuid::new_v4();
        path.push(format!("settld-core-{prefix}-{id}"));
        let _ = fs::remove_dir_all(&path);
        path
    }

    #[test]
    fn append_rejects_wrong_prev_hash() {
        let dir = temp_dir("chain-mismatch");
        let log: AuditLog<Row> = AuditLog::open(&dir).unwrap();
        log.append(None, Row { body: json!({"n": 1}) }).unwrap();
        let err = log.append(Some("not-the-real-head"), Row { body: json!({"n": 2}) }).unwrap_err();
        assert!(matches!(err, AppendError::Chain(_)));
    }

    #[test]
    fn recovers_chain_head_and_merkle_root_after_reopen() {
        let dir = temp_dir("recover");
        let log: AuditLog<Row> = AuditLog::open(&dir).unwrap();
        let mut prev = None;
        for n in 1..=4 {
            let (_, head) = log.append(prev.as_deref(), Row { body: json!({"n": n}) }).unwrap();
            prev = Some(head);
        }
        let root = log.merkle_root().unwrap();
        let head = log.head();
        drop(log);
        let reopened: AuditLog<Row> = AuditLog::open(&dir).unwrap();
        assert_eq!(reopened.len(), 4);
        assert_eq!(reopened.merkle_root(), Some(root));
        assert_eq!(reopened.head(), head);
        assert!(reopened.receipt_for(2).unwrap().verify());
    }

    #[test]
    fn compacts_wal_into_segments_at_segment_boundary() {
        let dir = temp_dir("compact");
        let log: AuditLog<Row> = AuditLog::open_with_segment_size(&dir, 2).unwrap();
        let mut prev = None;
        for n in 1..=4 {
            let (_, head) = log.append(prev.as_deref(), Row { body: json!({"n": n}) }).unwrap();
            prev = Some(head);
        }
        let wal_bytes = fs::read(dir.join("append.wal")).unwrap_or_default();
        assert!(wal_bytes.is_empty(), "wal should be empty after compaction");
        assert_eq!(log.len(), 4);
    }
}
