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

/// Server-specific adapter hooks.
pub mod adapters;
/// One live peer: process, handshake, dispatcher.
pub mod client;
/// Per-URI diagnostics cache with idle detection.
pub mod diagnostics;
/// Per-peer document lifecycle bookkeeping.
pub mod documents;
/// Live-peer supervision: single-flight starts, restarts, disposal.
pub mod manager;
/// JSON-RPC envelope types and Content-Length framing.
pub mod protocol;
/// Framed JSON-RPC transport over child-process stdio.
pub mod transport;

pub use client::LspPeer;
pub use diagnostics::{DiagnosticsCache, IdleWait};
pub use documents::DocumentManager;
pub use manager::ServerManager;

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use lsp_types::Uri;

/// Converts an absolute filesystem path to a `file://` URI. The inverse of
/// [`uri_to_path`]; all path↔URI conversion goes through this pair.
///
/// # Errors
///
/// Returns an error if the path is not absolute or cannot form a valid URI.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| anyhow!("cannot convert path to URI: {}", path.display()))?;
    url.as_str()
        .parse()
        .map_err(|e| anyhow!("invalid URI for {}: {e}", path.display()))
}

/// Converts a `file://` URI back to a filesystem path.
///
/// # Errors
///
/// Returns an error if the URI is not a valid `file://` URL.
pub fn uri_to_path(uri: &Uri) -> Result<PathBuf> {
    let url = url::Url::parse(uri.as_str())
        .map_err(|e| anyhow!("invalid URI {}: {e}", uri.as_str()))?;
    url.to_file_path()
        .map_err(|()| anyhow!("not a file:// URI: {}", uri.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_uri_round_trip() {
        let path = Path::new("/home/user/project/src/main.rs");
        let uri = path_to_uri(path).unwrap();
        assert!(uri.as_str().starts_with("file:///"));
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn test_path_with_spaces_round_trips() {
        let path = Path::new("/home/user/my project/a file.ts");
        let uri = path_to_uri(path).unwrap();
        assert!(!uri.as_str().contains(' '));
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn test_relative_path_rejected() {
        assert!(path_to_uri(Path::new("relative/main.rs")).is_err());
    }

    #[test]
    fn test_non_file_uri_rejected() {
        let uri: Uri = "https://example.com/a.rs".parse().unwrap();
        assert!(uri_to_path(&uri).is_err());
    }
}
