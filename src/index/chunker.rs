// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Semantic code chunking.
//!
//! Splits a file into an ordered sequence of chunks whose line spans
//! cover the whole file. Go is chunked from a tree-sitter AST; Python
//! uses indentation blocks; Rust, JS/TS, Java, and C/C++ use regex
//! declaration starts with brace counting. Everything between semantic
//! units, and every unrecognized language, goes through the sliding
//! window fallback. A single semantic unit larger than the size limit is
//! emitted whole rather than split mid-symbol.

use regex::Regex;
use tree_sitter::Parser;

use crate::config::IndexerConfig;
use crate::types::{ChunkType, Document};

/// Configuration for the chunker.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum chunk size in characters.
    pub max_chunk_size: usize,
    /// Overlap between windowed chunks in characters.
    pub overlap_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            overlap_size: 200,
        }
    }
}

impl From<&IndexerConfig> for ChunkerConfig {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            max_chunk_size: config.chunk_size,
            overlap_size: config.chunk_overlap,
        }
    }
}

/// A semantic unit located in the file.
#[derive(Debug, Clone)]
struct SemanticSpan {
    start_line: usize,
    end_line: usize,
    chunk_type: ChunkType,
    symbol: String,
    receiver: Option<String>,
}

/// Language-aware semantic chunker.
///
/// Chunking is a pure function of `(content, file_path)`: repeated calls
/// produce identical chunks.
pub struct Chunker {
    config: ChunkerConfig,
    patterns: LanguagePatterns,
    go: Option<Parser>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        // A grammar load failure just disables the AST path; those files
        // degrade to generic chunking.
        let go = {
            let mut parser = Parser::new();
            match parser.set_language(&tree_sitter_go::LANGUAGE.into()) {
                Ok(()) => Some(parser),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load Go grammar");
                    None
                }
            }
        };
        Self {
            config,
            patterns: LanguagePatterns::new(),
            go,
        }
    }

    /// Detect language from the file extension.
    pub fn detect_language(file_path: &str) -> &'static str {
        let ext = file_path.rsplit('.').next().unwrap_or("").to_lowercase();
        match ext.as_str() {
            "go" => "go",
            "py" | "pyi" => "python",
            "js" | "jsx" | "mjs" | "cjs" => "javascript",
            "ts" | "tsx" | "mts" | "cts" => "typescript",
            "java" => "java",
            "c" | "h" => "c",
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "cpp",
            "rs" => "rust",
            _ => "unknown",
        }
    }

    /// Chunk a file into documents covering every line.
    pub fn chunk(&mut self, content: &str, file_path: &str) -> Vec<Document> {
        if content.is_empty() {
            return Vec::new();
        }

        let language = Self::detect_language(file_path);
        let spans = match language {
            "go" => self.go_spans(content).unwrap_or_default(),
            "python" => python_spans(content, &self.patterns),
            "rust" | "javascript" | "typescript" | "java" | "c" | "cpp" => {
                brace_spans(content, language, &self.patterns)
            }
            _ => Vec::new(),
        };

        self.assemble(content, file_path, language, spans)
    }

    /// Lay out semantic spans over the file, filling every gap with
    /// windowed chunks so the union of spans is `1..=line_count`.
    fn assemble(
        &self,
        content: &str,
        file_path: &str,
        language: &str,
        mut spans: Vec<SemanticSpan>,
    ) -> Vec<Document> {
        let lines: Vec<&str> = content.lines().collect();
        let n = lines.len();
        if n == 0 {
            return Vec::new();
        }

        spans.retain(|s| s.start_line >= 1 && s.start_line <= n);
        for s in &mut spans {
            s.end_line = s.end_line.clamp(s.start_line, n);
        }
        spans.sort_by_key(|s| (s.start_line, s.end_line));

        // Overlapping spans keep the earliest start; later starts inside
        // a kept span are nested declarations.
        let mut kept: Vec<SemanticSpan> = Vec::new();
        let mut last_end = 0usize;
        for s in spans {
            if s.start_line > last_end {
                last_end = s.end_line;
                kept.push(s);
            }
        }

        let mut docs = Vec::new();
        let mut cursor = 1usize;
        for span in kept {
            if span.start_line > cursor {
                docs.extend(self.window_chunks(
                    &lines[cursor - 1..span.start_line - 1],
                    cursor,
                    file_path,
                    language,
                ));
            }
            let text = lines[span.start_line - 1..span.end_line].join("\n");
            let mut doc = Document::new(
                text,
                file_path.to_string(),
                language.to_string(),
                span.chunk_type,
                &span.symbol,
                span.start_line as u32,
                span.end_line as u32,
            );
            if let Some(receiver) = span.receiver {
                doc.metadata.insert(
                    "receiver".to_string(),
                    serde_json::Value::String(receiver),
                );
            }
            docs.push(doc);
            cursor = span.end_line + 1;
        }

        if cursor <= n {
            docs.extend(self.window_chunks(&lines[cursor - 1..n], cursor, file_path, language));
        }

        docs
    }

    /// Sliding-window chunks over a line range, breaking on line
    /// boundaries (so never mid-word) with overlap between windows.
    fn window_chunks(
        &self,
        lines: &[&str],
        first_line: usize,
        file_path: &str,
        language: &str,
    ) -> Vec<Document> {
        if lines.is_empty() {
            return Vec::new();
        }

        let total_chars: usize = lines.iter().map(|l| l.len() + 1).sum();
        let chars_per_line = (total_chars / lines.len()).max(1);
        let lines_per_chunk = (self.config.max_chunk_size / chars_per_line).max(1);
        let overlap_lines = self.config.overlap_size / chars_per_line;

        let mut docs = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + lines_per_chunk).min(lines.len());
            let text = lines[start..end].join("\n");
            docs.push(Document::new(
                text,
                file_path.to_string(),
                language.to_string(),
                ChunkType::Unknown,
                "",
                (first_line + start) as u32,
                (first_line + end - 1) as u32,
            ));

            if end >= lines.len() {
                break;
            }
            start = (end.saturating_sub(overlap_lines)).max(start + 1);
        }
        docs
    }

    /// Top-level Go declarations from the AST. `None` means the parse
    /// failed and the file degrades to generic chunking.
    fn go_spans(&mut self, content: &str) -> Option<Vec<SemanticSpan>> {
        let parser = self.go.as_mut()?;
        let tree = parser.parse(content, None)?;
        let root = tree.root_node();
        if root.has_error() {
            return None;
        }

        let bytes = content.as_bytes();
        let mut spans = Vec::new();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            match child.kind() {
                "function_declaration" => {
                    let symbol = node_field_text(&child, "name", bytes);
                    spans.push(SemanticSpan {
                        start_line: child.start_position().row + 1,
                        end_line: child.end_position().row + 1,
                        chunk_type: ChunkType::Function,
                        symbol,
                        receiver: None,
                    });
                }
                "method_declaration" => {
                    let symbol = node_field_text(&child, "name", bytes);
                    let receiver = child
                        .child_by_field_name("receiver")
                        .and_then(|n| n.utf8_text(bytes).ok())
                        .map(|s| s.trim_matches(|c| c == '(' || c == ')').trim().to_string());
                    spans.push(SemanticSpan {
                        start_line: child.start_position().row + 1,
                        end_line: child.end_position().row + 1,
                        chunk_type: ChunkType::Function,
                        symbol,
                        receiver,
                    });
                }
                "type_declaration" => {
                    let mut type_cursor = child.walk();
                    for spec in child.children(&mut type_cursor) {
                        if spec.kind() != "type_spec" {
                            continue;
                        }
                        let chunk_type = match spec
                            .child_by_field_name("type")
                            .map(|t| t.kind())
                        {
                            Some("struct_type") => ChunkType::Struct,
                            Some("interface_type") => ChunkType::Interface,
                            _ => break,
                        };
                        spans.push(SemanticSpan {
                            start_line: child.start_position().row + 1,
                            end_line: child.end_position().row + 1,
                            chunk_type,
                            symbol: node_field_text(&spec, "name", bytes),
                            receiver: None,
                        });
                        break;
                    }
                }
                _ => {}
            }
        }
        Some(spans)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

fn node_field_text(node: &tree_sitter::Node<'_>, field: &str, bytes: &[u8]) -> String {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(bytes).ok())
        .unwrap_or("")
        .to_string()
}

// ----------------------------------------------------------------------
// Heuristic extraction for non-Go languages
// ----------------------------------------------------------------------

/// Top-level declarations via regex starts plus brace counting.
fn brace_spans(content: &str, language: &str, patterns: &LanguagePatterns) -> Vec<SemanticSpan> {
    let mut spans = Vec::new();
    for (pattern, chunk_type) in patterns.get(language) {
        for m in pattern.find_iter(content) {
            let start_line = content[..m.start()].matches('\n').count() + 1;
            let end_line = find_block_end(content, m.start());
            spans.push(SemanticSpan {
                start_line,
                end_line,
                chunk_type: *chunk_type,
                symbol: patterns.extract_symbol(m.as_str(), *chunk_type),
                receiver: None,
            });
        }
    }
    spans
}

/// Top-level Python declarations via indentation blocks.
fn python_spans(content: &str, patterns: &LanguagePatterns) -> Vec<SemanticSpan> {
    let lines: Vec<&str> = content.lines().collect();
    let mut spans = Vec::new();
    for (pattern, chunk_type) in patterns.get("python") {
        for m in pattern.find_iter(content) {
            let start_line = content[..m.start()].matches('\n').count() + 1;
            let end_line = find_indent_block_end(&lines, start_line);
            spans.push(SemanticSpan {
                start_line,
                end_line,
                chunk_type: *chunk_type,
                symbol: patterns.extract_symbol(m.as_str(), *chunk_type),
                receiver: None,
            });
        }
    }
    spans
}

/// End line (1-based inclusive) of a brace-delimited block starting at
/// `start_byte`. Declarations terminated by `;` before any `{` (tuple
/// structs, prototypes) end on the `;` line. Without a closing brace the
/// block extends to the end of the file.
fn find_block_end(content: &str, start_byte: usize) -> usize {
    let remaining = &content[start_byte..];
    let mut depth: i32 = 0;
    let mut seen_open = false;
    let mut in_string = false;
    let mut string_char = ' ';
    let mut prev_char = ' ';

    for (i, ch) in remaining.char_indices() {
        if (ch == '"' || ch == '\'' || ch == '`') && prev_char != '\\' {
            if in_string && ch == string_char {
                in_string = false;
            } else if !in_string {
                in_string = true;
                string_char = ch;
            }
        }

        if !in_string {
            match ch {
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => {
                    depth -= 1;
                    if seen_open && depth == 0 {
                        let end_byte = start_byte + i + 1;
                        return content[..end_byte].matches('\n').count() + 1;
                    }
                }
                ';' if !seen_open => {
                    let end_byte = start_byte + i + 1;
                    return content[..end_byte].matches('\n').count() + 1;
                }
                _ => {}
            }
        }

        prev_char = ch;
    }

    content.lines().count()
}

/// End line of a Python indentation block whose header is `start_line`.
fn find_indent_block_end(lines: &[&str], start_line: usize) -> usize {
    let header = lines[start_line - 1];
    let base_indent = header.len() - header.trim_start().len();

    let mut last_nonempty = start_line;
    for (offset, line) in lines[start_line..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = line.len() - line.trim_start().len();
        if indent <= base_indent {
            return last_nonempty;
        }
        last_nonempty = start_line + offset + 1;
    }
    last_nonempty
}

/// Regex declaration starts per language.
struct LanguagePatterns {
    rust: Vec<(Regex, ChunkType)>,
    typescript: Vec<(Regex, ChunkType)>,
    java: Vec<(Regex, ChunkType)>,
    c: Vec<(Regex, ChunkType)>,
    python: Vec<(Regex, ChunkType)>,
    symbol_res: Vec<Regex>,
    impl_target: Regex,
}

impl LanguagePatterns {
    fn new() -> Self {
        Self {
            rust: vec![
                (
                    Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+\w+")
                        .unwrap(),
                    ChunkType::Function,
                ),
                (
                    Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?struct\s+\w+").unwrap(),
                    ChunkType::Struct,
                ),
                (
                    Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?enum\s+\w+").unwrap(),
                    ChunkType::Struct,
                ),
                (
                    Regex::new(r"(?m)^(?:pub(?:\([^)]*\))?\s+)?trait\s+\w+").unwrap(),
                    ChunkType::Interface,
                ),
                (
                    Regex::new(r"(?m)^impl(?:<[^>]*>)?\s+[\w:]+(?:<[^>]*>)?(?:\s+for\s+[\w:]+(?:<[^>]*>)?)?")
                        .unwrap(),
                    ChunkType::Impl,
                ),
            ],
            typescript: vec![
                (
                    Regex::new(r"(?m)^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+\w+")
                        .unwrap(),
                    ChunkType::Function,
                ),
                (
                    Regex::new(r"(?m)^(?:export\s+)?(?:abstract\s+)?class\s+\w+").unwrap(),
                    ChunkType::Class,
                ),
                (
                    Regex::new(r"(?m)^(?:export\s+)?interface\s+\w+").unwrap(),
                    ChunkType::Interface,
                ),
                (
                    Regex::new(r"(?m)^(?:export\s+)?enum\s+\w+").unwrap(),
                    ChunkType::Struct,
                ),
            ],
            java: vec![
                (
                    Regex::new(r"(?m)^(?:public\s+|private\s+|protected\s+)?(?:abstract\s+)?(?:final\s+)?class\s+\w+")
                        .unwrap(),
                    ChunkType::Class,
                ),
                (
                    Regex::new(r"(?m)^(?:public\s+)?interface\s+\w+").unwrap(),
                    ChunkType::Interface,
                ),
                (
                    Regex::new(r"(?m)^(?:public\s+)?enum\s+\w+").unwrap(),
                    ChunkType::Struct,
                ),
            ],
            c: vec![
                (
                    Regex::new(r"(?m)^(?:typedef\s+)?struct\s+\w+").unwrap(),
                    ChunkType::Struct,
                ),
                (
                    Regex::new(r"(?m)^[A-Za-z_][\w\s\*]*?[\s\*]\w+\s*\([^;{]*\)\s*\{").unwrap(),
                    ChunkType::Function,
                ),
            ],
            python: vec![
                (
                    Regex::new(r"(?m)^(?:async\s+)?def\s+\w+").unwrap(),
                    ChunkType::Function,
                ),
                (Regex::new(r"(?m)^class\s+\w+").unwrap(), ChunkType::Class),
            ],
            symbol_res: vec![
                Regex::new(r"(?:function|fn|def|func)\s+(\w+)").unwrap(),
                Regex::new(r"(?:class|struct|interface|trait|enum)\s+(\w+)").unwrap(),
                Regex::new(r"(\w+)\s*\(").unwrap(),
            ],
            impl_target: Regex::new(r"for\s+([\w:]+)|impl(?:<[^>]*>)?\s+([\w:]+)").unwrap(),
        }
    }

    fn get(&self, language: &str) -> &[(Regex, ChunkType)] {
        match language {
            "rust" => &self.rust,
            "typescript" | "javascript" => &self.typescript,
            "java" => &self.java,
            "c" | "cpp" => &self.c,
            "python" => &self.python,
            _ => &[],
        }
    }

    fn extract_symbol(&self, matched: &str, chunk_type: ChunkType) -> String {
        if chunk_type == ChunkType::Impl {
            if let Some(caps) = self.impl_target.captures(matched) {
                if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                    return name.as_str().to_string();
                }
            }
            return String::new();
        }
        for re in &self.symbol_res {
            if let Some(caps) = re.captures(matched) {
                if let Some(name) = caps.get(1) {
                    return name.as_str().to_string();
                }
            }
        }
        String::new()
    }
}
