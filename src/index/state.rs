// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent indexer state.
//!
//! The state file survives restarts and is what makes runs incremental:
//! `file_hashes` records every fully persisted file, `root_hash` is the
//! cheap whole-tree probe. Writes are atomic (write temp, rename) so a
//! crash never leaves a torn file.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// Counters persisted across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateMetrics {
    pub files_processed: u64,
    pub files_failed: u64,
    pub chunks_created: u64,
    pub runs_completed: u64,
}

/// The persisted indexer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerState {
    pub version: u32,
    /// Merkle leaves: root-relative path to SHA-256 of file bytes.
    pub file_hashes: HashMap<String, String>,
    /// Hash over the sorted leaf set.
    pub root_hash: String,
    pub last_full_index: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub metrics: StateMetrics,
}

impl Default for IndexerState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            file_hashes: HashMap::new(),
            root_hash: String::new(),
            last_full_index: None,
            last_error: None,
            metrics: StateMetrics::default(),
        }
    }
}

/// Atomic reader/writer for the state file.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the persisted state; a missing file yields the default.
    pub fn load(&self) -> Result<IndexerState, IndexError> {
        if !self.path.exists() {
            return Ok(IndexerState::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let state: IndexerState = serde_json::from_str(&content)
            .map_err(|e| IndexError::State(format!("corrupt state file: {}", e)))?;
        if state.version > STATE_VERSION {
            return Err(IndexError::State(format!(
                "state file version {} is newer than supported {}",
                state.version, STATE_VERSION
            )));
        }
        Ok(state)
    }

    /// Persist the state atomically: write a temp file, then rename.
    pub fn save(&self, state: &IndexerState) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| IndexError::State(format!("failed to serialize state: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
