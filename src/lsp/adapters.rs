// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Server-specific adapter hooks.
//!
//! Some servers need more than the standard protocol: nonstandard
//! server-to-client requests that must be answered before the server
//! unblocks, initialize-params tweaks, or longer deadlines on heavy methods.
//! An adapter packages those quirks. The registry is a constant ordered list
//! built at compile time; detection takes the first match. Adapters are not
//! user-extensible.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::config::ServerConfig;

/// Per-server customization hooks.
pub trait ServerAdapter: Send + Sync {
    /// Adapter name, for logging.
    fn name(&self) -> &'static str;

    /// Whether this adapter applies to the given server config.
    fn matches(&self, config: &ServerConfig) -> bool;

    /// Rewrites the serialized `initialize` params. Runs last, after all
    /// built-in defaults are applied.
    fn customize_initialize_params(&self, params: Value) -> Value {
        params
    }

    /// Answers a server-initiated request. Returning `Some` causes the
    /// result to be sent back; `None` leaves the request unanswered (the
    /// server will time out or fall back).
    fn handle_request(&self, _method: &str, _params: &Value) -> Option<Value> {
        None
    }

    /// Handles a server notification. Returning `true` swallows it.
    fn handle_notification(&self, _method: &str, _params: &Value) -> bool {
        false
    }

    /// Per-method request timeout override.
    fn timeout_for(&self, _method: &str) -> Option<Duration> {
        None
    }
}

/// Adapter for Eclipse JDT LS, which sends nonstandard client-bound
/// requests and status notifications.
pub struct JdtlsAdapter;

impl ServerAdapter for JdtlsAdapter {
    fn name(&self) -> &'static str {
        "jdtls"
    }

    fn matches(&self, config: &ServerConfig) -> bool {
        command_mentions(config, "jdtls")
    }

    fn handle_request(&self, method: &str, _params: &Value) -> Option<Value> {
        // These must be answered with a minimal shape or jdtls stalls
        // waiting on the client.
        if method == "workspace/executeClientCommand" || method.starts_with("eclipse/") {
            debug!("Answering jdtls client request: {}", method);
            return Some(Value::Null);
        }
        None
    }

    fn handle_notification(&self, method: &str, _params: &Value) -> bool {
        matches!(
            method,
            "language/status" | "language/progressReport" | "language/actionableNotification"
        )
    }

    fn timeout_for(&self, method: &str) -> Option<Duration> {
        // jdtls resolves workspace symbols against its full index.
        (method == "workspace/symbol").then(|| Duration::from_secs(45))
    }
}

/// Adapter for rust-analyzer, which needs enlarged deadlines on methods
/// that wait for indexing.
pub struct RustAnalyzerAdapter;

impl ServerAdapter for RustAnalyzerAdapter {
    fn name(&self) -> &'static str {
        "rust-analyzer"
    }

    fn matches(&self, config: &ServerConfig) -> bool {
        command_mentions(config, "rust-analyzer")
    }

    fn timeout_for(&self, method: &str) -> Option<Duration> {
        match method {
            "textDocument/references" | "textDocument/rename" | "workspace/symbol" => {
                Some(Duration::from_secs(60))
            }
            "textDocument/implementation"
            | "textDocument/prepareCallHierarchy"
            | "callHierarchy/incomingCalls"
            | "callHierarchy/outgoingCalls" => Some(Duration::from_secs(45)),
            _ => None,
        }
    }
}

/// Ordered adapter registry; first match wins.
static ADAPTERS: [&(dyn ServerAdapter); 2] = [&JdtlsAdapter, &RustAnalyzerAdapter];

/// Finds the adapter for a server config, if any.
#[must_use]
pub fn detect(config: &ServerConfig) -> Option<&'static dyn ServerAdapter> {
    ADAPTERS.iter().copied().find(|a| a.matches(config))
}

fn command_mentions(config: &ServerConfig, needle: &str) -> bool {
    config
        .command
        .first()
        .is_some_and(|program| program.contains(needle))
}
