// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! External source connectors.
//!
//! A connector is a pluggable external search source (GitHub, Slack,
//! Jira, ...) conforming to a small contract: search plus a health
//! probe. The registry persists connector metadata in the store and
//! dispatches queries to the live implementations registered with it;
//! results merge with local search by concatenation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::store::DocumentStore;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Connector lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    Active,
    Disabled,
    Error,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "disabled" => Self::Disabled,
            _ => Self::Error,
        }
    }
}

/// Persisted connector metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorRecord {
    pub id: String,
    /// Connector type, e.g. `github`, `slack`, `jira`.
    pub kind: String,
    pub name: String,
    pub status: ConnectorStatus,
    /// Opaque connector-specific configuration.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

/// One result from an external source.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorResult {
    pub id: String,
    pub title: String,
    pub content: String,
    pub score: f32,
    pub source_type: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Health probe result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorHealth {
    Ok,
    Error(String),
}

/// The connector contract.
#[async_trait]
pub trait Connector: Send + Sync {
    fn id(&self) -> &str;

    /// Connector type name.
    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    /// Query the external source.
    async fn search(&self, query: &str, top_k: usize)
        -> Result<Vec<ConnectorResult>, ConnectorError>;

    /// Probe the source.
    async fn health(&self) -> ConnectorHealth;
}

/// Registry of connector records plus their live implementations.
pub struct ConnectorRegistry {
    store: Arc<DocumentStore>,
    live: RwLock<HashMap<String, Arc<dyn Connector>>>,
}

impl ConnectorRegistry {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            live: RwLock::new(HashMap::new()),
        }
    }

    /// List all persisted connectors.
    pub fn list(&self) -> Result<Vec<ConnectorRecord>, ConnectorError> {
        Ok(self.store.connector_list()?)
    }

    /// Fetch one connector record.
    pub fn get(&self, id: &str) -> Result<Option<ConnectorRecord>, ConnectorError> {
        Ok(self.store.connector_get(id)?)
    }

    /// Add a new connector. An empty id is assigned one; a duplicate id
    /// is a conflict.
    pub fn add(&self, mut record: ConnectorRecord) -> Result<ConnectorRecord, ConnectorError> {
        if record.kind.is_empty() {
            return Err(ConnectorError::InvalidConfig(
                "connector kind is required".to_string(),
            ));
        }
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }
        if self.store.connector_get(&record.id)?.is_some() {
            return Err(ConnectorError::Duplicate(record.id));
        }
        self.store.connector_put(&record)?;
        tracing::info!(id = %record.id, kind = %record.kind, "connector added");
        Ok(record)
    }

    /// Merge new configuration into an existing connector.
    pub fn update(
        &self,
        id: &str,
        config: HashMap<String, serde_json::Value>,
    ) -> Result<ConnectorRecord, ConnectorError> {
        let mut record = self
            .store
            .connector_get(id)?
            .ok_or_else(|| ConnectorError::NotFound(id.to_string()))?;
        record.config.extend(config);
        self.store.connector_put(&record)?;
        Ok(record)
    }

    /// Remove a connector; returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool, ConnectorError> {
        if let Ok(mut live) = self.live.write() {
            live.remove(id);
        }
        Ok(self.store.connector_delete(id)?)
    }

    /// Attach a live implementation for a persisted connector.
    pub fn register_live(&self, connector: Arc<dyn Connector>) {
        if let Ok(mut live) = self.live.write() {
            live.insert(connector.id().to_string(), connector);
        }
    }

    /// Query every active live connector; failures are swallowed into
    /// counters so one bad source never sinks the request.
    pub async fn search_all(&self, query: &str, top_k: usize) -> Vec<ConnectorResult> {
        let connectors: Vec<Arc<dyn Connector>> = match self.live.read() {
            Ok(live) => live.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };

        let mut results = Vec::new();
        for connector in connectors {
            let active = self
                .store
                .connector_get(connector.id())
                .ok()
                .flatten()
                .map(|r| r.status == ConnectorStatus::Active)
                .unwrap_or(false);
            if !active {
                continue;
            }
            match connector.search(query, top_k).await {
                Ok(items) => results.extend(items),
                Err(e) => {
                    tracing::warn!(id = %connector.id(), error = %e, "connector search failed");
                    #[cfg(feature = "telemetry")]
                    GLOBAL_METRICS.increment("connectors.search_failures");
                }
            }
        }
        results
    }
}
