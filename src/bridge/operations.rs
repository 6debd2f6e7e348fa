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

//! Normalized LSP operations over the peer fabric.
//!
//! Every operation resolves the right peer for the file, ensures the
//! document is open (with a short grace period right after a fresh open so
//! cold servers can index), sends the request with the method's effective
//! timeout, and normalizes the reply shapes the protocol allows into one
//! canonical form.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lsp_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, Diagnostic,
    DocumentSymbolResponse, GotoDefinitionResponse, Hover, Location, Position, SymbolInformation,
    Uri, WorkspaceEdit,
};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::scan_extensions;
use crate::error::Error;
use crate::lsp::manager::RestartOutcome;
use crate::lsp::{IdleWait, LspPeer, ServerManager, path_to_uri, uri_to_path};

/// Grace period after a fresh `didOpen`, giving the server a chance to
/// index before the first request. Best-effort.
const OPEN_GRACE: Duration = Duration::from_millis(200);

/// Depth bound for the preload extension scan.
const PRELOAD_MAX_DEPTH: usize = 8;

/// Tunable waits for the diagnostics fallback path.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsWait {
    /// Idle wait after the pull request is rejected.
    pub after_pull: IdleWait,
    /// Idle wait after the forced no-op edit.
    pub after_kick: IdleWait,
}

impl Default for DiagnosticsWait {
    fn default() -> Self {
        Self {
            after_pull: IdleWait::default(),
            after_kick: IdleWait {
                max_wait: Duration::from_secs(3),
                ..IdleWait::default()
            },
        }
    }
}

/// High-level code-intelligence operations, one instance per bridge.
pub struct CodeIntel {
    manager: Arc<ServerManager>,
    diagnostics_wait: DiagnosticsWait,
}

impl CodeIntel {
    /// Creates the operations layer over a server manager.
    #[must_use]
    pub fn new(manager: Arc<ServerManager>) -> Self {
        Self {
            manager,
            diagnostics_wait: DiagnosticsWait::default(),
        }
    }

    /// Overrides the diagnostics fallback waits.
    #[must_use]
    pub const fn with_diagnostics_wait(mut self, wait: DiagnosticsWait) -> Self {
        self.diagnostics_wait = wait;
        self
    }

    /// The underlying server manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<ServerManager> {
        &self.manager
    }

    /// Resolves the peer for a path, waits for readiness, and ensures the
    /// document is open.
    pub(crate) async fn prepare(&self, path: &Path) -> Result<(Arc<LspPeer>, Uri), Error> {
        let peer = self.manager.server_for_path(path).await?;
        peer.wait_ready().await;

        if peer.ensure_open(path).await? {
            tokio::time::sleep(OPEN_GRACE).await;
        }

        let uri = path_to_uri(path).map_err(|e| Error::Validation(e.to_string()))?;
        Ok((peer, uri))
    }

    fn position_params(uri: &Uri, position: Position) -> Value {
        serde_json::json!({
            "textDocument": { "uri": uri },
            "position": position
        })
    }

    /// Finds the definition of the symbol at a position. Accepts scalar,
    /// array, and link reply shapes.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn find_definition(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Vec<Location>, Error> {
        let (peer, uri) = self.prepare(path).await?;
        let value = peer
            .request(
                "textDocument/definition",
                Self::position_params(&uri, position),
            )
            .await?;
        Ok(normalize_goto_response(value))
    }

    /// Finds implementations of the symbol at a position.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn find_implementation(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Vec<Location>, Error> {
        let (peer, uri) = self.prepare(path).await?;
        let value = peer
            .request(
                "textDocument/implementation",
                Self::position_params(&uri, position),
            )
            .await?;
        Ok(normalize_goto_response(value))
    }

    /// Finds all references to the symbol at a position.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn find_references(
        &self,
        path: &Path,
        position: Position,
        include_declaration: bool,
    ) -> Result<Vec<Location>, Error> {
        let (peer, uri) = self.prepare(path).await?;

        let params = serde_json::json!({
            "textDocument": { "uri": uri },
            "position": position,
            "context": { "includeDeclaration": include_declaration }
        });

        let value = peer.request("textDocument/references", params).await?;
        Ok(serde_json::from_value::<Option<Vec<Location>>>(value)
            .unwrap_or_default()
            .unwrap_or_default())
    }

    /// Computes the workspace edit for renaming the symbol at a position.
    /// A null reply becomes an empty edit.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn rename_symbol(
        &self,
        path: &Path,
        position: Position,
        new_name: &str,
    ) -> Result<WorkspaceEdit, Error> {
        let (peer, uri) = self.prepare(path).await?;

        let params = serde_json::json!({
            "textDocument": { "uri": uri },
            "position": position,
            "newName": new_name
        });

        let value = peer.request("textDocument/rename", params).await?;
        Ok(serde_json::from_value::<Option<WorkspaceEdit>>(value)
            .map_err(|e| Error::Validation(format!("malformed rename reply: {e}")))?
            .unwrap_or_default())
    }

    /// Fetches document symbols, preserving the raw reply shape
    /// (hierarchical or flat).
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn document_symbols(&self, path: &Path) -> Result<DocumentSymbolResponse, Error> {
        let (peer, uri) = self.prepare(path).await?;

        let params = serde_json::json!({ "textDocument": { "uri": uri } });
        let value = peer.request("textDocument/documentSymbol", params).await?;

        Ok(
            serde_json::from_value::<Option<DocumentSymbolResponse>>(value)
                .map_err(|e| Error::Validation(format!("malformed documentSymbol reply: {e}")))?
                .unwrap_or(DocumentSymbolResponse::Nested(Vec::new())),
        )
    }

    /// Hover information at a position, or `None`.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn hover(&self, path: &Path, position: Position) -> Result<Option<Hover>, Error> {
        let (peer, uri) = self.prepare(path).await?;
        let value = peer
            .request("textDocument/hover", Self::position_params(&uri, position))
            .await?;
        // The first sensible object with contents, else null.
        Ok(serde_json::from_value(value).unwrap_or(None))
    }

    /// Searches symbols across every running peer and returns the union.
    /// Peers that fail or return an unknown shape are skipped. With zero
    /// running peers the result is empty.
    pub async fn workspace_symbols(&self, query: &str) -> Vec<SymbolInformation> {
        let peers = self.manager.running_peers().await;
        let mut results = Vec::new();

        for peer in peers {
            let params = serde_json::json!({ "query": query });
            match peer.request("workspace/symbol", params).await {
                Ok(value) => match serde_json::from_value::<Option<Vec<SymbolInformation>>>(value)
                {
                    Ok(Some(symbols)) => results.extend(symbols),
                    Ok(None) => {}
                    Err(e) => warn!(
                        "Skipping workspace/symbol reply from '{}': {}",
                        peer.config().command.join(" "),
                        e
                    ),
                },
                Err(e) => warn!(
                    "workspace/symbol failed on '{}': {}",
                    peer.config().command.join(" "),
                    e
                ),
            }
        }

        results
    }

    /// Prepares call hierarchy items at a position.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn prepare_call_hierarchy(
        &self,
        path: &Path,
        position: Position,
    ) -> Result<Vec<CallHierarchyItem>, Error> {
        let (peer, uri) = self.prepare(path).await?;
        let value = peer
            .request(
                "textDocument/prepareCallHierarchy",
                Self::position_params(&uri, position),
            )
            .await?;
        Ok(serde_json::from_value::<Option<Vec<CallHierarchyItem>>>(value)
            .unwrap_or_default()
            .unwrap_or_default())
    }

    /// Incoming calls for a prepared call hierarchy item. Routed through
    /// the peer responsible for the item's file.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn incoming_calls(
        &self,
        item: &CallHierarchyItem,
    ) -> Result<Vec<CallHierarchyIncomingCall>, Error> {
        let peer = self.peer_for_item(item).await?;
        let params = serde_json::json!({ "item": item });
        let value = peer.request("callHierarchy/incomingCalls", params).await?;
        Ok(
            serde_json::from_value::<Option<Vec<CallHierarchyIncomingCall>>>(value)
                .unwrap_or_default()
                .unwrap_or_default(),
        )
    }

    /// Outgoing calls for a prepared call hierarchy item.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn outgoing_calls(
        &self,
        item: &CallHierarchyItem,
    ) -> Result<Vec<CallHierarchyOutgoingCall>, Error> {
        let peer = self.peer_for_item(item).await?;
        let params = serde_json::json!({ "item": item });
        let value = peer.request("callHierarchy/outgoingCalls", params).await?;
        Ok(
            serde_json::from_value::<Option<Vec<CallHierarchyOutgoingCall>>>(value)
                .unwrap_or_default()
                .unwrap_or_default(),
        )
    }

    async fn peer_for_item(&self, item: &CallHierarchyItem) -> Result<Arc<LspPeer>, Error> {
        let path = uri_to_path(&item.uri).map_err(|e| Error::Validation(e.to_string()))?;
        let peer = self.manager.server_for_path(&path).await?;
        peer.wait_ready().await;
        Ok(peer)
    }

    /// Diagnostics for a file: cached publish first, then a pull request,
    /// then idle waiting, then a forced no-op edit as the last resort.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution failures; a missing pull method is not an
    /// error.
    pub async fn diagnostics(&self, path: &Path) -> Result<Vec<Diagnostic>, Error> {
        let (peer, uri) = self.prepare(path).await?;

        // Published diagnostics win; the cache always holds the latest.
        if let Some(items) = peer.diagnostics().get(&uri).await {
            return Ok(items);
        }

        let params = serde_json::json!({ "textDocument": { "uri": uri } });
        match peer.request("textDocument/diagnostic", params).await {
            Ok(report) => Ok(pull_report_items(&report)),
            Err(e) => {
                debug!("Pull diagnostics unavailable ({}); falling back", e);
                self.published_after_wait(&peer, path, &uri).await
            }
        }
    }

    /// Fallback path: idle-wait on the publish cache, then kick the
    /// document with a no-op edit and wait again.
    async fn published_after_wait(
        &self,
        peer: &LspPeer,
        path: &Path,
        uri: &Uri,
    ) -> Result<Vec<Diagnostic>, Error> {
        peer.diagnostics()
            .wait_for_idle(uri, self.diagnostics_wait.after_pull)
            .await;
        if let Some(items) = peer.diagnostics().get(uri).await {
            return Ok(items);
        }

        // No-op edit: touch the text and restore it, prodding servers that
        // only publish on change.
        let original = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Validation(format!("cannot read {}: {e}", path.display())))?;
        peer.send_change(path, format!("{original} ")).await?;
        peer.send_change(path, original).await?;

        peer.diagnostics()
            .wait_for_idle(uri, self.diagnostics_wait.after_kick)
            .await;
        Ok(peer.diagnostics().get(uri).await.unwrap_or_default())
    }

    /// Scans the project for extensions and starts one peer per distinct
    /// matching config. With `dry_run`, reports what would start without
    /// spawning anything.
    pub async fn preload_servers(&self, root: &Path, dry_run: bool) -> Vec<String> {
        let extensions = scan_extensions(root, PRELOAD_MAX_DEPTH);
        let configs: Vec<_> = self
            .manager
            .config()
            .servers_for_extensions(&extensions)
            .into_iter()
            .cloned()
            .collect();

        let mut commands = Vec::new();
        for config in configs {
            let command = config.command.join(" ");
            if dry_run {
                info!("Would start: {}", command);
            } else if let Err(e) = self.manager.get_server(&config).await {
                warn!("Preload of '{}' failed: {}", command, e);
                continue;
            }
            commands.push(command);
        }
        commands
    }

    /// Restarts running peers, optionally filtered by extension.
    pub async fn restart_servers(&self, extensions: Option<&[String]>) -> RestartOutcome {
        self.manager.restart_servers(extensions).await
    }

    /// Terminates all peers and clears supervision state.
    pub async fn dispose(&self) {
        self.manager.dispose().await;
    }
}

/// Collapses the three goto reply shapes into a list of locations.
fn normalize_goto_response(value: Value) -> Vec<Location> {
    match serde_json::from_value::<Option<GotoDefinitionResponse>>(value) {
        Ok(Some(GotoDefinitionResponse::Scalar(location))) => vec![location],
        Ok(Some(GotoDefinitionResponse::Array(locations))) => locations,
        Ok(Some(GotoDefinitionResponse::Link(links))) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("Unrecognized goto reply shape: {}", e);
            Vec::new()
        }
    }
}

/// Extracts items from a pull-diagnostics report. A full report yields its
/// items, "unchanged" yields nothing, and any unexpected shape yields
/// nothing.
fn pull_report_items(report: &Value) -> Vec<Diagnostic> {
    match report.get("kind").and_then(Value::as_str) {
        Some("full") => report
            .get("items")
            .cloned()
            .and_then(|items| serde_json::from_value(items).ok())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
