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

//! Error kinds surfaced by the LSP fabric.
//!
//! Transport and peer-lifecycle failures are contained inside the server
//! manager and surface per-operation as one of these kinds. The tool facade
//! converts them to short text payloads.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the LSP fabric and the edit/move machinery.
#[derive(Debug, Error)]
pub enum Error {
    /// No server is configured for the file's extension.
    #[error("no LSP server configured for extension '{0}'")]
    NoServerForExtension(String),

    /// The server process could not be started.
    #[error("failed to spawn LSP server '{command}': {message}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// The underlying failure.
        message: String,
    },

    /// A request did not receive a reply within its deadline.
    #[error("LSP request '{method}' timed out after {timeout:?}")]
    RequestTimeout {
        /// The LSP method that timed out.
        method: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The server returned an error response.
    #[error("LSP error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code.
        code: i64,
        /// Server-provided error message.
        message: String,
    },

    /// The server process exited or its connection was lost.
    #[error("LSP server exited: {0}")]
    PeerExit(String),

    /// A workspace edit failed validation; nothing was written.
    #[error("invalid workspace edit: {0}")]
    Validation(String),

    /// A workspace edit failed mid-apply; modified files were rolled back.
    #[error("failed to apply workspace edit: {0}")]
    Apply(String),

    /// A file move was rejected before any side effect.
    #[error("cannot move file: {0}")]
    MoveValidation(String),
}

impl Error {
    /// True when the peer behind the operation is gone and the next call
    /// should trigger a fresh start.
    #[must_use]
    pub const fn is_peer_exit(&self) -> bool {
        matches!(self, Self::PeerExit(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::NoServerForExtension("zig".to_string());
        assert_eq!(
            err.to_string(),
            "no LSP server configured for extension 'zig'"
        );

        let err = Error::RequestTimeout {
            method: "textDocument/rename".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("textDocument/rename"));

        let err = Error::Protocol {
            code: -32601,
            message: "method not found".to_string(),
        };
        assert!(err.to_string().contains("-32601"));
    }

    #[test]
    fn test_peer_exit_detection() {
        assert!(Error::PeerExit("gone".to_string()).is_peer_exit());
        assert!(!Error::Validation("bad range".to_string()).is_peer_exit());
    }
}
