// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Content-hash change detection.
//!
//! Compares the walked tree against the persisted `file_hashes` map to
//! produce the changed-set driving an incremental run. Leaves are
//! SHA-256 of file bytes, computed over a streaming read so large files
//! are never loaded whole; the root hash is a cheap "anything changed?"
//! probe over the sorted leaf set.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::IndexError;

use super::walker::WalkedFile;

/// Streaming read buffer size.
const HASH_BUF_LEN: usize = 64 * 1024;

/// How a run selects files to reindex.
#[derive(Debug, Clone, Default)]
pub enum ReindexMode {
    /// Only files whose hash differs from the persisted map.
    #[default]
    Incremental,
    /// Every walked file is treated as modified.
    Force,
    /// Incremental, restricted to the given root-relative paths.
    Paths(HashSet<String>),
}

/// A file plus its current content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHash {
    pub rel_path: String,
    pub hash: String,
}

/// The three disjoint change sets of one scan.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<FileHash>,
    pub modified: Vec<FileHash>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Files that need chunking: added plus modified.
    pub fn work_items(&self) -> Vec<FileHash> {
        let mut items = self.added.clone();
        items.extend(self.modified.iter().cloned());
        items
    }
}

/// SHA-256 of a file's bytes via a streaming read.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_LEN];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Diff the walked tree against the persisted hashes.
///
/// Hashing failures on individual files are logged and the file is
/// dropped from the run; it will be retried on the next scan.
pub fn diff(
    walked: &[WalkedFile],
    prior: &HashMap<String, String>,
    mode: &ReindexMode,
) -> Result<ChangeSet, IndexError> {
    let restrict: Option<&HashSet<String>> = match mode {
        ReindexMode::Paths(paths) => Some(paths),
        _ => None,
    };
    let force = matches!(mode, ReindexMode::Force);

    let mut changes = ChangeSet::default();
    let mut current_paths: HashSet<&str> = HashSet::with_capacity(walked.len());

    for file in walked {
        current_paths.insert(file.rel_path.as_str());
        if let Some(restrict) = restrict {
            if !restrict.contains(&file.rel_path) {
                continue;
            }
        }

        let hash = match hash_file(&file.path) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(path = %file.rel_path, error = %e, "failed to hash file");
                continue;
            }
        };

        match prior.get(&file.rel_path) {
            None => changes.added.push(FileHash {
                rel_path: file.rel_path.clone(),
                hash,
            }),
            Some(old) if force || *old != hash => changes.modified.push(FileHash {
                rel_path: file.rel_path.clone(),
                hash,
            }),
            Some(_) => changes.unchanged += 1,
        }
    }

    for path in prior.keys() {
        if current_paths.contains(path.as_str()) {
            continue;
        }
        if let Some(restrict) = restrict {
            if !restrict.contains(path) {
                continue;
            }
        }
        changes.deleted.push(path.clone());
    }
    changes.deleted.sort();

    Ok(changes)
}

/// Root hash: SHA-256 over the sorted `(path, hash)` concatenation.
pub fn root_hash(hashes: &HashMap<String, String>) -> String {
    let mut entries: Vec<(&String, &String)> = hashes.iter().collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for (path, hash) in entries {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(hash.as_bytes());
        hasher.update([b'\n']);
    }
    format!("{:x}", hasher.finalize())
}
