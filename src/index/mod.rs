// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Incremental indexing: traversal, change detection, chunking, and the
//! controller state machine.
//!
//! ```text
//! Walker ──> Merkle diff ──> Chunker workers ──> Embedder ──> Store
//!                 │                                            │
//!                 └──────────── indexer_state.json <───────────┘
//! ```
//!
//! The walker produces candidate files, the merkle layer filters out
//! unchanged ones, chunker workers split the remainder into documents,
//! a single embedding worker annotates them with vectors, and the
//! persister commits whole-file batches with an atomic checkpoint after
//! each. The controller exposes the run lifecycle over this pipeline.

pub mod chunker;
pub mod controller;
pub mod merkle;
pub mod state;
pub mod walker;

pub use chunker::{Chunker, ChunkerConfig};
pub use controller::{IndexController, IndexOptions, IndexPhase, IndexStatus};
pub use merkle::{diff, hash_bytes, hash_file, root_hash, ChangeSet, FileHash, ReindexMode};
pub use state::{IndexerState, StateFile, StateMetrics, STATE_VERSION};
pub use walker::{SkipReason, SkippedFile, WalkOutcome, WalkedFile, Walker};
