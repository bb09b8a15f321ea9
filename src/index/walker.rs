// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Filesystem traversal with ignore patterns and content heuristics.
//!
//! Produces the candidate file list for an indexing run: every regular
//! file under the root that is not ignored, not oversized, and not
//! binary. Symbolic links are never followed.

use std::io::Read;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::IndexError;

/// Bytes of a file inspected for the binary heuristic.
const BINARY_SNIFF_LEN: usize = 8192;

/// A candidate file discovered by the walker.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Root-relative path with forward slashes.
    pub rel_path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Why a file was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge,
    Binary,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooLarge => "too_large",
            Self::Binary => "binary",
        }
    }
}

/// A file excluded by the size or binary heuristic.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub rel_path: String,
    pub reason: SkipReason,
}

/// Result of one traversal.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<WalkedFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Ignore-aware directory walker.
pub struct Walker {
    root: PathBuf,
    ignore: GlobSet,
    max_file_size: u64,
}

impl Walker {
    /// Create a walker. `.git` is always ignored and a root `.gitignore`
    /// is parsed and appended when present.
    pub fn new(
        root: &Path,
        ignore_patterns: &[String],
        max_file_size: u64,
    ) -> Result<Self, IndexError> {
        let mut patterns: Vec<String> = ignore_patterns.to_vec();
        if !patterns.iter().any(|p| p == ".git") {
            patterns.push(".git".to_string());
        }

        let gitignore = root.join(".gitignore");
        if gitignore.is_file() {
            match std::fs::read_to_string(&gitignore) {
                Ok(content) => patterns.extend(parse_gitignore(&content)),
                Err(e) => {
                    tracing::warn!(path = %gitignore.display(), error = %e, "failed to read .gitignore");
                }
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            ignore: build_globset(&patterns)?,
            max_file_size,
        })
    }

    /// The root being walked.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree. Per-file errors are logged and skipped; only a
    /// root failure aborts.
    pub fn walk(&self) -> Result<WalkOutcome, IndexError> {
        if !self.root.is_dir() {
            return Err(IndexError::Walk {
                path: self.root.display().to_string(),
                cause: "root is not a directory".to_string(),
            });
        }

        let mut outcome = WalkOutcome::default();

        let iter = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.path() == self.root {
                    return true;
                }
                let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
                !self.ignore.is_match(rel)
            });

        for entry in iter {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let is_root_error = e
                        .path()
                        .map(|p| p == self.root.as_path())
                        .unwrap_or(false);
                    if is_root_error {
                        return Err(IndexError::Walk {
                            path: self.root.display().to_string(),
                            cause: e.to_string(),
                        });
                    }
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel_path = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    tracing::warn!(path = %rel_path, error = %e, "failed to stat file");
                    continue;
                }
            };

            if size > self.max_file_size {
                tracing::debug!(path = %rel_path, size, reason = SkipReason::TooLarge.as_str(), "skipping file");
                outcome.skipped.push(SkippedFile {
                    rel_path,
                    reason: SkipReason::TooLarge,
                });
                continue;
            }

            match is_probably_binary(path) {
                Ok(true) => {
                    tracing::debug!(path = %rel_path, reason = SkipReason::Binary.as_str(), "skipping file");
                    outcome.skipped.push(SkippedFile {
                        rel_path,
                        reason: SkipReason::Binary,
                    });
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(path = %rel_path, error = %e, "failed to sniff file");
                    continue;
                }
            }

            outcome.files.push(WalkedFile {
                path: path.to_path_buf(),
                rel_path,
                size,
            });
        }

        Ok(outcome)
    }
}

/// Compile gitignore-style patterns into a globset.
///
/// Each bare name matches at any depth, both as a file and as a
/// directory subtree; patterns containing `/` are root-anchored.
fn build_globset(patterns: &[String]) -> Result<GlobSet, IndexError> {
    let mut builder = GlobSetBuilder::new();
    let mut add = |pattern: &str| -> Result<(), IndexError> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                IndexError::InvalidPath(format!("invalid ignore pattern '{}': {}", pattern, e))
            })?;
        builder.add(glob);
        Ok(())
    };

    for pattern in patterns {
        let trimmed = pattern.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.contains('/') {
            let anchored = trimmed.trim_start_matches('/');
            add(anchored)?;
            add(&format!("{}/**", anchored))?;
        } else {
            add(trimmed)?;
            add(&format!("**/{}", trimmed))?;
            add(&format!("{}/**", trimmed))?;
            add(&format!("**/{}/**", trimmed))?;
        }
    }

    builder
        .build()
        .map_err(|e| IndexError::InvalidPath(format!("failed to build ignore set: {}", e)))
}

/// Extract usable patterns from a `.gitignore` body. Comments, blanks,
/// and negations are skipped.
fn parse_gitignore(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| line.trim_start_matches('/').to_string())
        .collect()
}

/// Binary heuristic: a NUL byte in the first 8 KiB.
fn is_probably_binary(path: &Path) -> std::io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; BINARY_SNIFF_LEN];
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(buf[..filled].contains(&0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_walk_collects_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/main.rs", b"fn main() {}");
        touch(dir.path(), "README.md", b"# readme");

        let walker = Walker::new(dir.path(), &[".git".to_string()], 1024 * 1024).unwrap();
        let outcome = walker.walk().unwrap();

        let mut rels: Vec<&str> = outcome.files.iter().map(|f| f.rel_path.as_str()).collect();
        rels.sort();
        assert_eq!(rels, vec!["README.md", "src/main.rs"]);
    }

    #[test]
    fn test_git_directory_always_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".git/config", b"[core]");
        touch(dir.path(), "a.rs", b"fn a() {}");

        let walker = Walker::new(dir.path(), &[], 1024).unwrap();
        let outcome = walker.walk().unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].rel_path, "a.rs");
    }

    #[test]
    fn test_gitignore_appended() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".gitignore", b"target/\n# comment\n*.log\n");
        touch(dir.path(), "target/debug/app", b"bin");
        touch(dir.path(), "run.log", b"log line");
        touch(dir.path(), "src/lib.rs", b"pub fn x() {}");

        let walker = Walker::new(dir.path(), &[".git".to_string()], 1024).unwrap();
        let outcome = walker.walk().unwrap();

        let rels: Vec<&str> = outcome.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert!(rels.contains(&"src/lib.rs"));
        assert!(rels.contains(&".gitignore"));
        assert!(!rels.iter().any(|r| r.starts_with("target/")));
        assert!(!rels.contains(&"run.log"));
    }

    #[test]
    fn test_hidden_files_included() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".env.example", b"KEY=value");

        let walker = Walker::new(dir.path(), &[], 1024).unwrap();
        let outcome = walker.walk().unwrap();
        assert_eq!(outcome.files.len(), 1);
    }

    #[test]
    fn test_oversized_file_skipped_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "big.txt", &vec![b'a'; 2048]);
        touch(dir.path(), "small.txt", b"ok");

        let walker = Walker::new(dir.path(), &[], 1024).unwrap();
        let outcome = walker.walk().unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].reason, SkipReason::TooLarge);
        assert_eq!(outcome.skipped[0].rel_path, "big.txt");
    }

    #[test]
    fn test_binary_file_skipped_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "blob.bin", b"abc\x00def");

        let walker = Walker::new(dir.path(), &[], 1024).unwrap();
        let outcome = walker.walk().unwrap();
        assert!(outcome.files.is_empty());
        assert_eq!(outcome.skipped[0].reason, SkipReason::Binary);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed() {
        let outside = tempfile::tempdir().unwrap();
        touch(outside.path(), "real.txt", b"content");

        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let walker = Walker::new(dir.path(), &[], 1024).unwrap();
        let outcome = walker.walk().unwrap();
        assert!(outcome.files.is_empty());
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let walker = Walker::new(&missing, &[], 1024).unwrap();
        assert!(matches!(walker.walk(), Err(IndexError::Walk { .. })));
    }

    #[test]
    fn test_parse_gitignore_skips_comments_and_negations() {
        let patterns = parse_gitignore("# comment\n\ntarget/\n!keep.log\n*.log\n/dist\n");
        assert_eq!(patterns, vec!["target/", "*.log", "dist"]);
    }
}
