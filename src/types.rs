// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core domain types shared across the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Type of code chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Struct,
    Class,
    Interface,
    Impl,
    Unknown,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Struct => "struct",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Impl => "impl",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "function" | "func" | "fn" | "method" => Self::Function,
            "struct" => Self::Struct,
            "class" => Self::Class,
            "interface" | "trait" => Self::Interface,
            "impl" => Self::Impl,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Known source types carried in document metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    File,
    GithubIssue,
    GithubPr,
    Slack,
    Jira,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::GithubIssue => "github_issue",
            Self::GithubPr => "github_pr",
            Self::Slack => "slack",
            Self::Jira => "jira",
        }
    }
}

/// The unit of indexing and retrieval: a contiguous span of source text
/// with its location, content hash, and optional embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable id of the form `{file_path}:{chunk_type}:{symbol}:{start_line}`.
    pub id: String,
    /// The raw text content.
    pub content: String,
    /// SHA-256 of content, hex-encoded.
    pub content_hash: String,
    /// Root-relative, validated file path.
    pub file_path: String,
    /// Detected programming language.
    pub language: String,
    /// Type of code unit.
    pub chunk_type: ChunkType,
    /// Start line (1-indexed).
    pub start_line: u32,
    /// End line (1-indexed, inclusive).
    pub end_line: u32,
    /// Free-form metadata (`source_type`, `symbol`, `receiver`,
    /// `pr_number`, `ticket_ids`, `git_branch`, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Timestamp of the last upsert; set by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    /// Dense vector of the store's fixed dimension, when embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Create a new document; the id is derived from location and symbol.
    pub fn new(
        content: String,
        file_path: String,
        language: String,
        chunk_type: ChunkType,
        symbol: &str,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        debug_assert!(end_line >= start_line);
        let id = Self::make_id(&file_path, chunk_type, symbol, start_line);
        let content_hash = Self::hash_content(&content);
        let mut metadata = HashMap::new();
        if !symbol.is_empty() {
            metadata.insert(
                "symbol".to_string(),
                serde_json::Value::String(symbol.to_string()),
            );
        }
        Self {
            id,
            content,
            content_hash,
            file_path,
            language,
            chunk_type,
            start_line,
            end_line,
            metadata,
            indexed_at: None,
            embedding: None,
        }
    }

    /// Build the deterministic document id.
    pub fn make_id(file_path: &str, chunk_type: ChunkType, symbol: &str, start_line: u32) -> String {
        format!("{}:{}:{}:{}", file_path, chunk_type.as_str(), symbol, start_line)
    }

    /// SHA-256 of the content, hex-encoded.
    pub fn hash_content(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// The `source_type` metadata value, if present.
    pub fn source_type(&self) -> Option<&str> {
        self.metadata.get("source_type").and_then(|v| v.as_str())
    }

    /// The `ticket_ids` metadata values, if present.
    pub fn ticket_ids(&self) -> Vec<String> {
        self.metadata
            .get("ticket_ids")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The `git_branch` metadata value, if present.
    pub fn git_branch(&self) -> Option<&str> {
        self.metadata.get("git_branch").and_then(|v| v.as_str())
    }

    /// Number of lines spanned by this document.
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// Cooperative cancellation token checked at batch boundaries.
///
/// Cloned tokens observe the same flag; cancelling any clone cancels all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every holder of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
