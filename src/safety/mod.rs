// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Safety primitives: path confinement and request throttling.

use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::IndexError;

/// Confines every path the engine touches to a single root directory.
///
/// Validation resolves relative paths against the root, strips `.` and
/// `..` components lexically, and canonicalizes the existing portion of
/// the path so a symlink pointing outside the root is rejected.
#[derive(Debug, Clone)]
pub struct PathValidator {
    root: PathBuf,
}

impl PathValidator {
    pub fn new(root: &Path) -> Result<Self, IndexError> {
        let root = root
            .canonicalize()
            .map_err(|e| IndexError::InvalidPath(format!("{}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// The canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a candidate path, returning its resolved absolute form.
    pub fn validate(&self, candidate: &Path) -> Result<PathBuf, IndexError> {
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized = normalize(&joined);

        // Canonicalize whatever portion of the path exists so symlinks
        // are resolved before the containment check.
        let resolved = match normalized.canonicalize() {
            Ok(p) => p,
            Err(_) => match (normalized.parent(), normalized.file_name()) {
                (Some(parent), Some(name)) => match parent.canonicalize() {
                    Ok(p) => p.join(name),
                    Err(_) => normalized.clone(),
                },
                _ => normalized.clone(),
            },
        };

        if !resolved.starts_with(&self.root) {
            return Err(IndexError::PathOutsideRoot(
                candidate.display().to_string(),
            ));
        }
        Ok(resolved)
    }

    /// Validate a path and return it relative to the root.
    pub fn relativize(&self, candidate: &Path) -> Result<String, IndexError> {
        let resolved = self.validate(candidate)?;
        let rel = resolved
            .strip_prefix(&self.root)
            .map_err(|_| IndexError::PathOutsideRoot(candidate.display().to_string()))?;
        Ok(rel.to_string_lossy().replace('\\', "/"))
    }
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Token-bucket rate limiter for request throttling.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: usize, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.001),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                // Time until one full token accrues.
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait.min(Duration::from_millis(250))).await;
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();

        let validator = PathValidator::new(dir.path()).unwrap();
        let resolved = validator.validate(Path::new("src/main.rs")).unwrap();
        assert!(resolved.starts_with(validator.root()));
        assert_eq!(validator.relativize(Path::new("src/main.rs")).unwrap(), "src/main.rs");
    }

    #[test]
    fn test_validate_rejects_parent_escape() {
        let dir = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(dir.path()).unwrap();

        let err = validator.validate(Path::new("../outside.txt")).unwrap_err();
        assert!(matches!(err, IndexError::PathOutsideRoot(_)));

        let err = validator
            .validate(Path::new("src/../../outside.txt"))
            .unwrap_err();
        assert!(matches!(err, IndexError::PathOutsideRoot(_)));
    }

    #[test]
    fn test_validate_rejects_absolute_outside() {
        let dir = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(dir.path()).unwrap();
        let err = validator.validate(Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, IndexError::PathOutsideRoot(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("link.txt"),
        )
        .unwrap();

        let validator = PathValidator::new(dir.path()).unwrap();
        let err = validator.validate(Path::new("link.txt")).unwrap_err();
        assert!(matches!(err, IndexError::PathOutsideRoot(_)));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }

    #[test]
    fn test_rate_limiter_burst_then_empty() {
        let limiter = RateLimiter::new(2, 0.001);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_rate_limiter_refills() {
        let limiter = RateLimiter::new(1, 1000.0);
        assert!(limiter.try_acquire());
        limiter.acquire().await;
    }
}
