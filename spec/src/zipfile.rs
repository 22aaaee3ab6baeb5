//! Deterministic ZIP building for audit packets and export bundles (spec.md
//! §4.1, §4.10).
//!
//! Two uploads with the same logical content must produce byte-identical
//! archives: entries are written in sorted path order, every entry carries
//! the fixed mtime `2000-01-01T00:00:00Z`, and compression is always STORE
//! (no deflate), so the only thing that changes between runs is content.

use std::io::{Cursor, Write as _};

use thiserror::Error;
use zip::write::FileOptions;
use zip::{DateTime, ZipWriter};

/// Errors raised while building a deterministic ZIP archive.
#[derive(Debug, Error)]
pub enum ZipBuildError {
    /// Underlying `zip` crate error.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// I/O error while writing entry bytes.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single file to be written into a deterministic archive.
pub struct ZipEntry<'a> {
    /// Path within the archive, using `/` separators.
    pub path: String,
    /// Raw bytes of the entry.
    pub bytes: &'a [u8],
}

/// Build a deterministic ZIP archive from `entries`, returning the archive
/// bytes. Entries are sorted by path before writing regardless of the order
/// passed in, so callers never need to pre-sort.
pub fn build_deterministic_zip(mut entries: Vec<ZipEntry<'_>>) -> Result<Vec<u8>, ZipBuildError> {
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let fixed_mtime = DateTime::from_date_and_time(2000, 1, 1, 0, 0, 0)
        .expect("2000-01-01T00:00:00 is a valid zip DateTime");

    let buffer = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(buffer);
    let options: FileOptions = FileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .last_modified_time(fixed_mtime)
        .unix_permissions(0o644);

    for entry in &entries {
        writer.start_file(entry.path.clone(), options)?;
        writer.write_all(entry.bytes)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_produces_identical_bytes_regardless_of_input_order() {
        let a = vec![
            ZipEntry { path: "b.json".into(), bytes: b"B" },
            ZipEntry { path: "a.json".into(), bytes: b"A" },
        ];
        let b = vec![
            ZipEntry { path: "a.json".into(), bytes: b"A" },
            ZipEntry { path: "b.json".into(), bytes: b"B" },
        ];
        let zip_a = build_deterministic_zip(a).unwrap();
        let zip_b = build_deterministic_zip(b).unwrap();
        assert_eq!(zip_a, zip_b);
    }

    #[test]
    fn two_builds_of_the_same_content_are_byte_identical() {
        let entries = || vec![ZipEntry { path: "manifest.json".into(), bytes: b"{}" }];
        let first = build_deterministic_zip(entries()).unwrap();
        let second = build_deterministic_zip(entries()).unwrap();
        assert_eq!(first, second);
    }
}
