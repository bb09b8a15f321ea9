// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading and validation.
//!
//! Supports YAML and JSON. With no explicit path, `conexus.yaml`,
//! `conexus.yml`, and `conexus.json` are tried in the working directory
//! before falling back to the built-in defaults.

use std::path::Path;

use crate::error::ConfigError;

use super::types::Config;

/// Candidate file names probed when no explicit path is given.
const DEFAULT_CANDIDATES: &[&str] = &["conexus.yaml", "conexus.yml", "conexus.json"];

/// Load configuration from an explicit path or the default candidates.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => parse_file(p)?,
        None => {
            let mut found = None;
            for candidate in DEFAULT_CANDIDATES {
                let p = Path::new(candidate);
                if p.exists() {
                    found = Some(parse_file(p)?);
                    break;
                }
            }
            found.unwrap_or_default()
        }
    };
    validate(&config)?;
    Ok(config)
}

/// Parse a single config file, format chosen by extension.
fn parse_file(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
        "json" => Ok(serde_json::from_str(&content)?),
        other => Err(ConfigError::InvalidFormat(format!(
            "unsupported config extension '{}' for {}",
            other,
            path.display()
        ))),
    }
}

/// Reject configurations that cannot work before any subsystem starts.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.indexer.chunk_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "indexer.chunk_size".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    if config.indexer.chunk_overlap >= config.indexer.chunk_size {
        return Err(ConfigError::InvalidValue {
            field: "indexer.chunk_overlap".to_string(),
            message: "must be smaller than indexer.chunk_size".to_string(),
        });
    }
    if config.indexer.workers == 0 {
        return Err(ConfigError::InvalidValue {
            field: "indexer.workers".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if config.indexer.batch_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "indexer.batch_size".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if config.embedding.dimension == 0 {
        return Err(ConfigError::InvalidValue {
            field: "embedding.dimension".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    if config.search.default_top_k == 0 || config.search.default_top_k > config.search.max_top_k {
        return Err(ConfigError::InvalidValue {
            field: "search.default_top_k".to_string(),
            message: format!("must be in 1..={}", config.search.max_top_k),
        });
    }
    if !(0.0..=1.0).contains(&config.search.early_termination_ratio) {
        return Err(ConfigError::InvalidValue {
            field: "search.early_termination_ratio".to_string(),
            message: "must be within 0.0..=1.0".to_string(),
        });
    }
    if config.search.rrf_k <= 0.0 {
        return Err(ConfigError::InvalidValue {
            field: "search.rrf_k".to_string(),
            message: "must be positive".to_string(),
        });
    }
    Ok(())
}
