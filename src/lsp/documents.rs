/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Per-peer document lifecycle bookkeeping.
//!
//! The LSP protocol requires documents to be explicitly opened before most
//! operations. This manager tracks the open set and version counters for one
//! peer and synthesizes the `didOpen`/`didChange` notifications the caller
//! sends. A path is opened at most once per peer lifetime; entries are
//! discarded with the peer, there is no per-file close.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use lsp_types::{
    DidChangeTextDocumentParams, DidOpenTextDocumentParams, TextDocumentContentChangeEvent,
    TextDocumentItem, VersionedTextDocumentIdentifier,
};
use tokio::fs;
use tracing::{debug, trace};

use super::path_to_uri;

/// Tracks which documents are open with a peer and their versions.
#[derive(Debug, Default)]
pub struct DocumentManager {
    versions: HashMap<PathBuf, i32>,
}

impl DocumentManager {
    /// Creates an empty document table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesizes the `didOpen` notification for a path, or returns `None`
    /// when the document is already open (idempotent no-op).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its path cannot be
    /// converted to a URI.
    pub async fn ensure_open(&mut self, path: &Path) -> Result<Option<DidOpenTextDocumentParams>> {
        if self.versions.contains_key(path) {
            trace!("Document already open: {}", path.display());
            return Ok(None);
        }

        let text = fs::read_to_string(path).await?;
        let uri = path_to_uri(path)?;
        let language_id = language_id_for_path(path);

        self.versions.insert(path.to_path_buf(), 1);
        debug!("Opening document: {} ({})", path.display(), language_id);

        Ok(Some(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri,
                language_id: language_id.to_string(),
                version: 1,
                text,
            },
        }))
    }

    /// Bumps the version and synthesizes a full-text `didChange`
    /// notification. Used only for forced diagnostic kicks.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not open or the path cannot be
    /// converted to a URI.
    pub fn change_event(
        &mut self,
        path: &Path,
        text: String,
    ) -> Result<DidChangeTextDocumentParams> {
        let version = self
            .versions
            .get_mut(path)
            .ok_or_else(|| anyhow::anyhow!("document not open: {}", path.display()))?;
        *version += 1;

        Ok(DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: path_to_uri(path)?,
                version: *version,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text,
            }],
        })
    }

    /// True when the path has been opened with this peer.
    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        self.versions.contains_key(path)
    }

    /// The current version of an open document.
    #[must_use]
    pub fn version(&self, path: &Path) -> Option<i32> {
        self.versions.get(path).copied()
    }
}

/// Maps a file extension to an LSP language identifier. Unknown extensions
/// map to the neutral `plaintext`.
#[must_use]
pub fn language_id_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("go") => "go",
        Some("py" | "pyi") => "python",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("ts" | "mts" | "cts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("jsx") => "javascriptreact",
        Some("c") => "c",
        Some("cpp" | "cc" | "cxx" | "h" | "hpp") => "cpp",
        Some("java") => "java",
        Some("rb") => "ruby",
        Some("php") => "php",
        Some("sh" | "bash" | "zsh") => "shellscript",
        Some("json") => "json",
        Some("yaml" | "yml") => "yaml",
        Some("toml") => "toml",
        Some("md") => "markdown",
        Some("html") => "html",
        Some("css") => "css",
        Some("lua") => "lua",
        Some("sql") => "sql",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_open_document_once() {
        let mut file = NamedTempFile::with_suffix(".rs").unwrap();
        writeln!(file, "fn main() {{}}").unwrap();

        let mut manager = DocumentManager::new();
        let first = manager.ensure_open(file.path()).await.unwrap();

        let Some(params) = first else {
            panic!("expected didOpen for first access");
        };
        assert_eq!(params.text_document.language_id, "rust");
        assert_eq!(params.text_document.version, 1);
        assert!(params.text_document.text.contains("fn main()"));

        // Second open is an idempotent no-op.
        let second = manager.ensure_open(file.path()).await.unwrap();
        assert!(second.is_none());
        assert!(manager.is_open(file.path()));
        assert_eq!(manager.version(file.path()), Some(1));
    }

    #[tokio::test]
    async fn test_change_bumps_version() {
        let mut file = NamedTempFile::with_suffix(".py").unwrap();
        writeln!(file, "print('hi')").unwrap();

        let mut manager = DocumentManager::new();
        manager.ensure_open(file.path()).await.unwrap();

        let change = manager
            .change_event(file.path(), "print('changed')".to_string())
            .unwrap();
        assert_eq!(change.text_document.version, 2);
        assert_eq!(change.content_changes.len(), 1);
        assert_eq!(change.content_changes[0].text, "print('changed')");

        let change = manager
            .change_event(file.path(), "print('hi')".to_string())
            .unwrap();
        assert_eq!(change.text_document.version, 3);
        assert_eq!(manager.version(file.path()), Some(3));
    }

    #[test]
    fn test_change_requires_open_document() {
        let mut manager = DocumentManager::new();
        let result = manager.change_event(Path::new("/nope.rs"), String::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(language_id_for_path(Path::new("test.rs")), "rust");
        assert_eq!(language_id_for_path(Path::new("test.py")), "python");
        assert_eq!(language_id_for_path(Path::new("test.ts")), "typescript");
        assert_eq!(
            language_id_for_path(Path::new("test.tsx")),
            "typescriptreact"
        );
        assert_eq!(language_id_for_path(Path::new("test.go")), "go");
        assert_eq!(language_id_for_path(Path::new("test.sh")), "shellscript");
        assert_eq!(language_id_for_path(Path::new("test.unknown")), "plaintext");
        assert_eq!(language_id_for_path(Path::new("noextension")), "plaintext");
    }
}
