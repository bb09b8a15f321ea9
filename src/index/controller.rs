// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Indexing controller: the state machine binding walker, chunker,
//! embedder, and store into one cancellable pipeline.
//!
//! One run at a time. The pipeline is staged over bounded channels:
//! several chunking workers drain the file queue, a single embedding
//! worker batches chunks, and a single persister writes transactional
//! batches and checkpoints the state file. A file's hash enters the
//! persisted state only after all of its chunks are stored, which is
//! what makes interrupted runs resume exactly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::config::IndexerConfig;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::safety::PathValidator;
use crate::store::DocumentStore;
use crate::types::{CancelToken, Document};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::chunker::{Chunker, ChunkerConfig};
use super::merkle::{self, FileHash, ReindexMode};
use super::state::{IndexerState, StateFile};
use super::walker::Walker;

/// Chunks per embedding batch.
const EMBED_BATCH: usize = 32;

/// Pipeline phase, observable through `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPhase {
    Idle,
    Scanning,
    Chunking,
    Embedding,
    Persisting,
    Stopping,
    Error,
}

impl IndexPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Persisting => "persisting",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl Default for IndexPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for IndexPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of an indexing run.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub is_indexing: bool,
    pub phase: IndexPhase,
    /// Completion ratio in 0..=1.
    pub progress: f32,
    pub files_processed: u32,
    pub total_files: u32,
    pub chunks_created: u32,
    pub files_failed: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub estimated_end: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Options for starting a run.
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Treat every walked file as modified.
    pub force: bool,
    /// Restrict the run to these paths (root-relative or absolute
    /// inside the root).
    pub paths: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct StatusInner {
    phase: IndexPhase,
    files_processed: u32,
    total_files: u32,
    chunks_created: u32,
    files_failed: u32,
    start_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// The indexing controller.
pub struct IndexController {
    config: IndexerConfig,
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    state_file: StateFile,
    validator: Arc<PathValidator>,
    running: Arc<AtomicBool>,
    cancel: Mutex<CancelToken>,
    status: Arc<Mutex<StatusInner>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    grace: Duration,
}

impl IndexController {
    pub fn new(
        config: &Config,
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        let validator = Arc::new(PathValidator::new(&config.indexer.root_path)?);
        Ok(Self {
            config: config.indexer.clone(),
            store,
            embedder,
            state_file: StateFile::new(config.indexer_state_path()),
            validator,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancelToken::new()),
            status: Arc::new(Mutex::new(StatusInner::default())),
            handle: Mutex::new(None),
            grace: Duration::from_millis(config.indexer.stop_grace_ms),
        })
    }

    /// The path validator confining this controller's run.
    pub fn validator(&self) -> &Arc<PathValidator> {
        &self.validator
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a run. Fails with `AlreadyRunning` when one is active.
    pub fn start(&self, opts: IndexOptions) -> Result<(), IndexError> {
        // Validate requested paths before claiming the run slot.
        let mode = match (&opts.paths, opts.force) {
            (Some(paths), _) => {
                let mut set = HashSet::new();
                for p in paths {
                    set.insert(self.validator.relativize(Path::new(p))?);
                }
                ReindexMode::Paths(set)
            }
            (None, true) => ReindexMode::Force,
            (None, false) => ReindexMode::Incremental,
        };

        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| IndexError::AlreadyRunning)?;

        let cancel = CancelToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();
        {
            let mut st = self.status.lock().unwrap();
            *st = StatusInner {
                phase: IndexPhase::Scanning,
                start_time: Some(Utc::now()),
                ..StatusInner::default()
            };
        }

        let ctx = PipelineCtx {
            config: self.config.clone(),
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            state_file: self.state_file.clone(),
            validator: self.validator.clone(),
            status: self.status.clone(),
            mode,
        };
        let running = self.running.clone();
        let status = self.status.clone();

        let handle = tokio::spawn(async move {
            let result = run_pipeline(ctx, cancel).await;
            {
                let mut st = status.lock().unwrap();
                match result {
                    Ok(()) => {
                        st.phase = IndexPhase::Idle;
                    }
                    Err(IndexError::Cancelled) => {
                        tracing::info!("indexing run cancelled");
                        st.phase = IndexPhase::Idle;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "indexing run failed");
                        st.last_error = Some(e.to_string());
                        st.phase = IndexPhase::Error;
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Start with every file marked modified.
    pub fn force_reindex(&self) -> Result<(), IndexError> {
        self.start(IndexOptions {
            force: true,
            paths: None,
        })
    }

    /// Start restricted to the given paths.
    pub fn reindex_paths(&self, paths: Vec<String>) -> Result<(), IndexError> {
        self.start(IndexOptions {
            force: false,
            paths: Some(paths),
        })
    }

    /// Signal cancellation and wait up to the grace period, then abort.
    /// Stopping an idle controller is a no-op.
    pub async fn stop(&self) -> Result<(), IndexError> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        {
            self.status.lock().unwrap().phase = IndexPhase::Stopping;
        }
        self.cancel.lock().unwrap().cancel();

        let deadline = tokio::time::Instant::now() + self.grace;
        while self.running.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        if self.running.load(Ordering::SeqCst) {
            tracing::warn!("grace period expired, aborting indexing task");
            if let Some(handle) = self.handle.lock().unwrap().take() {
                handle.abort();
            }
            self.running.store(false, Ordering::SeqCst);
            self.status.lock().unwrap().phase = IndexPhase::Idle;
        }
        Ok(())
    }

    /// Block until no run is active.
    pub async fn wait_until_idle(&self) {
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Always-readable status snapshot.
    pub fn status(&self) -> IndexStatus {
        let st = self.status.lock().unwrap();
        let is_indexing = self.running.load(Ordering::SeqCst);
        let progress = if st.total_files == 0 {
            if is_indexing {
                0.0
            } else {
                1.0
            }
        } else {
            (st.files_processed as f32 / st.total_files as f32).min(1.0)
        };

        let estimated_end = match (st.start_time, is_indexing) {
            (Some(start), true) if progress > 0.01 => {
                let elapsed_ms = (Utc::now() - start).num_milliseconds().max(0) as f64;
                let total_ms = elapsed_ms / progress as f64;
                Some(start + chrono::Duration::milliseconds(total_ms as i64))
            }
            _ => None,
        };

        IndexStatus {
            is_indexing,
            phase: st.phase,
            progress,
            files_processed: st.files_processed,
            total_files: st.total_files,
            chunks_created: st.chunks_created,
            files_failed: st.files_failed,
            start_time: st.start_time,
            estimated_end,
            last_error: st.last_error.clone(),
        }
    }
}

// ----------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------

struct PipelineCtx {
    config: IndexerConfig,
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    state_file: StateFile,
    validator: Arc<PathValidator>,
    status: Arc<Mutex<StatusInner>>,
    mode: ReindexMode,
}

enum PipelineItem {
    Doc(Document),
    FileDone {
        rel_path: String,
        hash: String,
        chunk_ids: Vec<String>,
    },
}

fn set_phase(status: &Arc<Mutex<StatusInner>>, phase: IndexPhase) {
    let mut st = status.lock().unwrap();
    if st.phase != IndexPhase::Stopping {
        st.phase = phase;
    }
}

fn record_failure(status: &Arc<Mutex<StatusInner>>, message: &str) {
    let mut st = status.lock().unwrap();
    st.files_failed += 1;
    st.last_error = Some(message.to_string());
    #[cfg(feature = "telemetry")]
    GLOBAL_METRICS.increment("indexer.files_failed");
}

async fn run_pipeline(ctx: PipelineCtx, cancel: CancelToken) -> Result<(), IndexError> {
    let result = run_pipeline_inner(&ctx, &cancel).await;
    if let Err(e) = &result {
        if !matches!(e, IndexError::Cancelled) {
            // Record the failure so the next run resumes after the last
            // checkpoint with the error visible.
            if let Ok(mut state) = ctx.state_file.load() {
                state.last_error = Some(e.to_string());
                let _ = ctx.state_file.save(&state);
            }
        }
    }
    result
}

async fn run_pipeline_inner(ctx: &PipelineCtx, cancel: &CancelToken) -> Result<(), IndexError> {
    let mut state = ctx.state_file.load()?;
    state.last_error = None;

    // Scan: walk the tree and diff against the persisted hashes.
    set_phase(&ctx.status, IndexPhase::Scanning);
    let root = ctx.validator.root().to_path_buf();
    let patterns = ctx.config.ignore_patterns.clone();
    let max_size = ctx.config.max_file_size_bytes;
    let outcome =
        tokio::task::spawn_blocking(move || Walker::new(&root, &patterns, max_size)?.walk())
            .await
            .map_err(|e| IndexError::State(format!("walk task failed: {}", e)))??;
    if !outcome.skipped.is_empty() {
        tracing::debug!(count = outcome.skipped.len(), "files skipped by walker");
    }
    if cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }

    let prior = state.file_hashes.clone();
    let mode = ctx.mode.clone();
    let files = outcome.files;
    let changes = tokio::task::spawn_blocking(move || merkle::diff(&files, &prior, &mode))
        .await
        .map_err(|e| IndexError::State(format!("diff task failed: {}", e)))??;
    if cancel.is_cancelled() {
        return Err(IndexError::Cancelled);
    }

    // Deletions first: their chunks must not survive the run.
    for path in &changes.deleted {
        let removed = ctx.store.delete_by_file(path)?;
        state.file_hashes.remove(path);
        tracing::debug!(path = %path, removed, "removed deleted file");
    }

    let work = changes.work_items();
    {
        let mut st = ctx.status.lock().unwrap();
        st.total_files = work.len() as u32;
    }
    tracing::info!(
        added = changes.added.len(),
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        unchanged = changes.unchanged,
        "scan complete"
    );

    if work.is_empty() {
        state.root_hash = merkle::root_hash(&state.file_hashes);
        return finish_run(ctx, &mut state);
    }

    set_phase(&ctx.status, IndexPhase::Chunking);

    // Stage channels: bounded, so slow consumers block producers.
    let (file_tx, file_rx) = mpsc::channel::<FileHash>(ctx.config.workers.max(1) * 2);
    let file_rx = Arc::new(tokio::sync::Mutex::new(file_rx));
    let (chunk_tx, chunk_rx) = mpsc::channel::<PipelineItem>(1024);
    let (embedded_tx, mut embedded_rx) = mpsc::channel::<PipelineItem>(1024);

    let feeder = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for item in work {
                if cancel.is_cancelled() {
                    break;
                }
                if file_tx.send(item).await.is_err() {
                    break;
                }
            }
        })
    };

    let mut workers = Vec::new();
    for _ in 0..ctx.config.workers.max(1) {
        let file_rx = file_rx.clone();
        let chunk_tx = chunk_tx.clone();
        let cancel = cancel.clone();
        let root = ctx.validator.root().to_path_buf();
        let chunker_config = ChunkerConfig::from(&ctx.config);
        let status = ctx.status.clone();
        workers.push(tokio::spawn(async move {
            let mut chunker = Chunker::new(chunker_config);
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = { file_rx.lock().await.recv().await };
                let Some(file) = next else { break };

                let abs = root.join(&file.rel_path);
                let content = match tokio::fs::read_to_string(&abs).await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(path = %file.rel_path, error = %e, "failed to read file");
                        record_failure(&status, &format!("read {}: {}", file.rel_path, e));
                        continue;
                    }
                };

                let docs = chunker.chunk(&content, &file.rel_path);
                let chunk_ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
                let mut closed = false;
                for doc in docs {
                    if chunk_tx.send(PipelineItem::Doc(doc)).await.is_err() {
                        closed = true;
                        break;
                    }
                }
                if closed {
                    break;
                }
                let done = PipelineItem::FileDone {
                    rel_path: file.rel_path,
                    hash: file.hash,
                    chunk_ids,
                };
                if chunk_tx.send(done).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(chunk_tx);

    // Single embedding worker: keeps every file's chunks ordered ahead
    // of its completion marker, which the checkpoint rule depends on.
    let embed_worker = {
        let embedder = ctx.embedder.clone();
        let cancel = cancel.clone();
        let status = ctx.status.clone();
        let mut chunk_rx = chunk_rx;
        tokio::spawn(async move {
            let mut buffer: Vec<PipelineItem> = Vec::with_capacity(EMBED_BATCH);
            loop {
                buffer.clear();
                let received = chunk_rx.recv_many(&mut buffer, EMBED_BATCH).await;
                if received == 0 {
                    break;
                }
                if cancel.is_cancelled() {
                    break;
                }

                let texts: Vec<String> = buffer
                    .iter()
                    .filter_map(|item| match item {
                        PipelineItem::Doc(d) => Some(d.content.clone()),
                        _ => None,
                    })
                    .collect();
                if !texts.is_empty() {
                    match embedder.embed_batch(&texts).await {
                        Ok(vectors) => {
                            let mut it = vectors.into_iter();
                            for item in buffer.iter_mut() {
                                if let PipelineItem::Doc(doc) = item {
                                    if let Some(v) = it.next() {
                                        if !v.is_empty() {
                                            doc.embedding = Some(v);
                                        }
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            // Unembedded chunks still persist; they serve
                            // lexical search and are excluded from vector
                            // search by the store.
                            tracing::warn!(error = %e, "embedding batch failed, persisting chunks unembedded");
                            record_failure(&status, &format!("embed: {}", e));
                        }
                    }
                }

                for item in buffer.drain(..) {
                    if embedded_tx.send(item).await.is_err() {
                        return;
                    }
                }
            }
        })
    };

    // Stage watcher drives the coarse phase transitions.
    let stage_watch = {
        let status = ctx.status.clone();
        tokio::spawn(async move {
            let _ = feeder.await;
            for w in workers {
                let _ = w.await;
            }
            set_phase(&status, IndexPhase::Embedding);
            let _ = embed_worker.await;
            set_phase(&status, IndexPhase::Persisting);
        })
    };

    // Persister: transactional batches of whole files, checkpoint after
    // each. Chunks stay pending until their file's completion marker
    // arrives, so a partially chunked file never reaches the store.
    let mut pending: HashMap<String, Vec<Document>> = HashMap::new();
    let mut ready: VecDeque<(String, String, Vec<String>)> = VecDeque::new();
    let mut ready_docs = 0usize;
    let mut items: Vec<PipelineItem> = Vec::new();
    let mut interval =
        tokio::time::interval(Duration::from_millis(ctx.config.checkpoint_interval_ms.max(50)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let persist_result: Result<(), IndexError> = loop {
        items.clear();
        tokio::select! {
            received = embedded_rx.recv_many(&mut items, 64) => {
                if received == 0 {
                    break flush_batch(ctx, &mut state, &mut pending, &mut ready, &mut ready_docs);
                }
                for item in items.drain(..) {
                    match item {
                        PipelineItem::Doc(doc) => {
                            pending.entry(doc.file_path.clone()).or_default().push(doc);
                        }
                        PipelineItem::FileDone { rel_path, hash, chunk_ids } => {
                            ready_docs += pending.get(&rel_path).map(Vec::len).unwrap_or(0);
                            ready.push_back((rel_path, hash, chunk_ids));
                        }
                    }
                }
                if ready_docs >= ctx.config.batch_size {
                    if let Err(e) = flush_batch(ctx, &mut state, &mut pending, &mut ready, &mut ready_docs) {
                        break Err(e);
                    }
                }
            }
            _ = interval.tick() => {
                if !ready.is_empty() {
                    if let Err(e) = flush_batch(ctx, &mut state, &mut pending, &mut ready, &mut ready_docs) {
                        break Err(e);
                    }
                }
            }
        }
    };

    if let Err(e) = persist_result {
        // Shut the upstream stages down; dropped channels unblock them.
        cancel.cancel();
        return Err(e);
    }

    let _ = stage_watch.await;

    if cancel.is_cancelled() {
        ctx.state_file.save(&state)?;
        return Err(IndexError::Cancelled);
    }

    state.metrics.runs_completed += 1;
    finish_run(ctx, &mut state)
}

/// Final bookkeeping: stamp the full-index time for unrestricted runs
/// and persist the state.
fn finish_run(ctx: &PipelineCtx, state: &mut IndexerState) -> Result<(), IndexError> {
    if !matches!(ctx.mode, ReindexMode::Paths(_)) {
        state.last_full_index = Some(Utc::now());
    }
    {
        let st = ctx.status.lock().unwrap();
        state.metrics.files_failed += st.files_failed as u64;
    }
    ctx.state_file.save(state)?;
    Ok(())
}

/// Upsert every chunk of the completed files in one transaction, drop
/// their stale chunk ids, commit their hashes, and checkpoint.
fn flush_batch(
    ctx: &PipelineCtx,
    state: &mut IndexerState,
    pending: &mut HashMap<String, Vec<Document>>,
    ready: &mut VecDeque<(String, String, Vec<String>)>,
    ready_docs: &mut usize,
) -> Result<(), IndexError> {
    if ready.is_empty() {
        return Ok(());
    }

    let mut batch: Vec<Document> = Vec::new();
    let mut committed: Vec<(String, String, Vec<String>)> = Vec::new();
    while let Some(done) = ready.pop_front() {
        if let Some(docs) = pending.remove(&done.0) {
            batch.extend(docs);
        }
        committed.push(done);
    }

    if !batch.is_empty() {
        ctx.store.upsert_batch(&batch)?;
    }
    for (rel_path, hash, chunk_ids) in &committed {
        ctx.store.delete_stale(rel_path, chunk_ids)?;
        state.file_hashes.insert(rel_path.clone(), hash.clone());
    }

    state.root_hash = merkle::root_hash(&state.file_hashes);
    state.metrics.files_processed += committed.len() as u64;
    state.metrics.chunks_created += batch.len() as u64;
    ctx.state_file.save(state)?;

    {
        let mut st = ctx.status.lock().unwrap();
        st.files_processed += committed.len() as u32;
        st.chunks_created += batch.len() as u32;
    }
    *ready_docs = 0;

    tracing::debug!(
        files = committed.len(),
        chunks = batch.len(),
        "checkpoint committed"
    );
    Ok(())
}
