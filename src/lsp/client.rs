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

//! One live LSP peer: child process, handshake, and incoming-message
//! dispatch.
//!
//! A peer owns its transport, document table, and diagnostics cache.
//! Server-initiated traffic is offered to the peer's adapter first, then to
//! the built-in handlers (`initialized`, `publishDiagnostics`). The child is
//! killed when the peer is terminated or dropped.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionClientCapabilities, CompletionItemCapability,
    DiagnosticClientCapabilities, DocumentSymbolClientCapabilities, GotoCapability,
    HoverClientCapabilities, InitializeParams, InitializeResult, PublishDiagnosticsParams,
    ReferenceClientCapabilities, RenameClientCapabilities, ServerCapabilities,
    SignatureHelpClientCapabilities, SymbolKind, SymbolKindCapability,
    TextDocumentClientCapabilities, TextDocumentSyncClientCapabilities,
    WorkspaceClientCapabilities, WorkspaceEditClientCapabilities, WorkspaceFolder,
};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::adapters::{self, ServerAdapter};
use super::diagnostics::DiagnosticsCache;
use super::documents::DocumentManager;
use super::path_to_uri;
use super::protocol::ResponseMessage;
use super::transport::{ServerMessage, Transport};
use crate::config::ServerConfig;
use crate::error::Error;

/// Default per-request timeout; adapters may override per method.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the server to signal ready after `initialized`.
const READY_WAIT: Duration = Duration::from_secs(3);

/// Ready flag with wakeup for waiters.
#[derive(Debug)]
struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }
}

impl ReadySignal {
    fn set(&self) {
        self.tx.send_replace(true);
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for checks the current value first, so a set() that already
        // happened is never missed.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// A supervised LSP server process and its per-peer state.
pub struct LspPeer {
    config: ServerConfig,
    transport: Arc<Transport>,
    documents: Mutex<DocumentManager>,
    diagnostics: Arc<DiagnosticsCache>,
    adapter: Option<&'static dyn ServerAdapter>,
    capabilities: ServerCapabilities,
    ready: Arc<ReadySignal>,
    alive: Arc<AtomicBool>,
    start_time: Instant,
    kill: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl LspPeer {
    /// Spawns the server, runs the initialize handshake, and returns the
    /// ready peer.
    ///
    /// The child's stderr is forwarded to the host's stderr. If the server
    /// does not signal ready within ~3 seconds of `initialized`, the peer is
    /// marked ready anyway and runs best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] for an empty or unstartable command and
    /// propagates handshake failures.
    pub async fn start(config: ServerConfig) -> Result<Arc<Self>, Error> {
        let Some(program) = config.command.first() else {
            return Err(Error::Spawn {
                command: String::new(),
                message: "server command is empty".to_string(),
            });
        };

        let root = config.resolved_root();
        let mut child = Command::new(program)
            .args(&config.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .current_dir(&root)
            .spawn()
            .map_err(|e| Error::Spawn {
                command: config.command.join(" "),
                message: e.to_string(),
            })?;

        let adapter = adapters::detect(&config);
        if let Some(adapter) = adapter {
            info!("Using '{}' adapter for {}", adapter.name(), program);
        }

        let stdin = child.stdin.take().ok_or_else(|| Error::Spawn {
            command: config.command.join(" "),
            message: "stdin not captured".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::Spawn {
            command: config.command.join(" "),
            message: "stdout not captured".to_string(),
        })?;

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Transport::new(stdin, stdout, incoming_tx));

        let diagnostics = Arc::new(DiagnosticsCache::new());
        let ready = Arc::new(ReadySignal::default());
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(Self::dispatch_loop(
            incoming_rx,
            transport.clone(),
            diagnostics.clone(),
            adapter,
            ready.clone(),
        ));

        let (kill_tx, kill_rx) = oneshot::channel();
        {
            let transport = transport.clone();
            let alive = alive.clone();
            let ready = ready.clone();
            let command = config.command.join(" ");
            tokio::spawn(async move {
                let reason = tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) => format!("'{command}' exited with {status}"),
                        Err(e) => format!("'{command}' failed: {e}"),
                    },
                    _ = kill_rx => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        format!("'{command}' terminated")
                    }
                };
                debug!("{}", reason);
                alive.store(false, Ordering::SeqCst);
                transport.reject_all_pending(&reason).await;
                // Wake anything blocked on readiness.
                ready.set();
            });
        }

        let peer = Self {
            config,
            transport,
            documents: Mutex::new(DocumentManager::new()),
            diagnostics,
            adapter,
            capabilities: ServerCapabilities::default(),
            ready,
            alive,
            start_time: Instant::now(),
            kill: std::sync::Mutex::new(Some(kill_tx)),
        };

        let peer = peer.handshake(&root).await?;
        Ok(Arc::new(peer))
    }

    /// Runs `initialize`/`initialized` and waits for readiness.
    async fn handshake(mut self, root: &Path) -> Result<Self, Error> {
        let params = self.build_initialize_params(root)?;

        let result = self
            .transport
            .send_request("initialize", params, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        match serde_json::from_value::<InitializeResult>(result) {
            Ok(init) => self.capabilities = init.capabilities,
            Err(e) => warn!("Malformed initialize result, assuming defaults: {}", e),
        }

        self.transport
            .send_notification("initialized", serde_json::json!({}))
            .await?;

        if tokio::time::timeout(READY_WAIT, self.ready.wait())
            .await
            .is_err()
        {
            warn!(
                "Server '{}' did not signal ready within {:?}; proceeding best-effort",
                self.config.command.join(" "),
                READY_WAIT
            );
        }
        self.ready.set();

        if !self.is_alive() {
            return Err(Error::PeerExit(format!(
                "'{}' exited during initialization",
                self.config.command.join(" ")
            )));
        }

        Ok(self)
    }

    fn build_initialize_params(&self, root: &Path) -> Result<Value, Error> {
        let root_uri =
            path_to_uri(root).map_err(|e| Error::Validation(format!("bad root dir: {e}")))?;

        #[allow(deprecated, reason = "rootUri is still expected by older servers")]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            initialization_options: effective_initialization_options(&self.config),
            capabilities: client_capabilities(),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: "workspace".to_string(),
            }]),
            client_info: Some(ClientInfo {
                name: "trestle".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..InitializeParams::default()
        };

        let mut value = serde_json::to_value(params)
            .map_err(|e| Error::Validation(format!("failed to serialize initialize: {e}")))?;

        // Adapter customization runs last.
        if let Some(adapter) = self.adapter {
            value = adapter.customize_initialize_params(value);
        }

        Ok(value)
    }

    /// Routes server-initiated messages: adapter first, then the built-in
    /// handlers. Unhandled server requests are left unanswered.
    async fn dispatch_loop(
        mut incoming: mpsc::UnboundedReceiver<ServerMessage>,
        transport: Arc<Transport>,
        diagnostics: Arc<DiagnosticsCache>,
        adapter: Option<&'static dyn ServerAdapter>,
        ready: Arc<ReadySignal>,
    ) {
        while let Some(message) = incoming.recv().await {
            match message {
                ServerMessage::Request { id, method, params } => {
                    let answer = adapter.and_then(|a| a.handle_request(&method, &params));
                    if let Some(result) = answer {
                        let response = ResponseMessage::result(id, result);
                        if let Err(e) = transport.send_response(&response).await {
                            warn!("Failed to answer server request '{}': {}", method, e);
                        }
                    } else {
                        debug!("Leaving server request '{}' unanswered", method);
                    }
                }
                ServerMessage::Notification { method, params } => {
                    if adapter.is_some_and(|a| a.handle_notification(&method, &params)) {
                        continue;
                    }

                    match method.as_str() {
                        "initialized" => ready.set(),
                        "textDocument/publishDiagnostics" => {
                            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                                Ok(p) => {
                                    diagnostics.update(p.uri, p.diagnostics, p.version).await;
                                }
                                Err(e) => warn!("Bad publishDiagnostics params: {}", e),
                            }
                        }
                        _ => trace!("Ignoring notification: {}", method),
                    }
                }
            }
        }
    }

    /// Waits for the peer to be ready for requests.
    pub async fn wait_ready(&self) {
        self.ready.wait().await;
    }

    /// Opens the document with the server if it is not already open.
    /// Returns `true` when a `didOpen` was actually sent.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or the notification cannot be
    /// written.
    pub async fn ensure_open(&self, path: &Path) -> Result<bool, Error> {
        let params = {
            let mut documents = self.documents.lock().await;
            documents
                .ensure_open(path)
                .await
                .map_err(|e| Error::Validation(format!("cannot open {}: {e}", path.display())))?
        };

        match params {
            Some(params) => {
                let value = serde_json::to_value(params)
                    .map_err(|e| Error::Validation(format!("bad didOpen params: {e}")))?;
                self.transport
                    .send_notification("textDocument/didOpen", value)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sends a full-text `didChange` for an open document. Used only for
    /// forced diagnostic kicks.
    ///
    /// # Errors
    ///
    /// Fails when the document is not open or the notification cannot be
    /// written.
    pub async fn send_change(&self, path: &Path, text: String) -> Result<(), Error> {
        let params = {
            let mut documents = self.documents.lock().await;
            documents
                .change_event(path, text)
                .map_err(|e| Error::Validation(e.to_string()))?
        };

        let value = serde_json::to_value(params)
            .map_err(|e| Error::Validation(format!("bad didChange params: {e}")))?;
        self.transport
            .send_notification("textDocument/didChange", value)
            .await
    }

    /// Sends a request with the method's effective timeout (adapter
    /// override, else the 30-second default).
    ///
    /// # Errors
    ///
    /// Propagates transport errors: timeout, protocol error, or peer exit.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
        let timeout = self.timeout_for(method);
        self.transport.send_request(method, params, timeout).await
    }

    /// Sends a request with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Propagates transport errors: timeout, protocol error, or peer exit.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, Error> {
        self.transport.send_request(method, params, timeout).await
    }

    /// Sends a notification to the server.
    ///
    /// # Errors
    ///
    /// Fails when the server's stdin is gone.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), Error> {
        self.transport.send_notification(method, params).await
    }

    /// The effective timeout for a method.
    #[must_use]
    pub fn timeout_for(&self, method: &str) -> Duration {
        self.adapter
            .and_then(|a| a.timeout_for(method))
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    /// The peer's diagnostics cache.
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticsCache {
        &self.diagnostics
    }

    /// Capabilities advertised by the server at initialize.
    #[must_use]
    pub const fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Whether the server advertises `workspace.fileOperations.willRename`.
    #[must_use]
    pub fn supports_will_rename(&self) -> bool {
        self.capabilities
            .workspace
            .as_ref()
            .and_then(|w| w.file_operations.as_ref())
            .and_then(|f| f.will_rename.as_ref())
            .is_some()
    }

    /// Whether the server advertises `workspace.fileOperations.didRename`.
    #[must_use]
    pub fn supports_did_rename(&self) -> bool {
        self.capabilities
            .workspace
            .as_ref()
            .and_then(|w| w.file_operations.as_ref())
            .and_then(|f| f.did_rename.as_ref())
            .is_some()
    }

    /// The configuration this peer was started from.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The live-map key for this peer's configuration.
    #[must_use]
    pub fn key(&self) -> String {
        self.config.key()
    }

    /// True while the child process is running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Time since the process was spawned.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Kills the child process. Pending requests reject on exit.
    pub fn terminate(&self) {
        if let Ok(mut kill) = self.kill.lock()
            && let Some(tx) = kill.take()
        {
            let _ = tx.send(());
        }
    }
}

impl Drop for LspPeer {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn effective_initialization_options(config: &ServerConfig) -> Option<Value> {
    if config.initialization_options.is_some() {
        return config.initialization_options.clone();
    }

    // pylsp ships with most plugins off; give it a usable default when the
    // user supplies nothing.
    if is_pylsp_family(&config.command) {
        return Some(serde_json::json!({
            "pylsp": {
                "plugins": {
                    "pycodestyle": { "enabled": true },
                    "pyflakes": { "enabled": true },
                    "jedi_completion": { "enabled": true },
                    "jedi_definition": { "enabled": true },
                    "jedi_references": { "enabled": true },
                    "jedi_symbols": { "enabled": true }
                }
            }
        }));
    }

    None
}

fn is_pylsp_family(command: &[String]) -> bool {
    command
        .first()
        .is_some_and(|program| program.contains("pylsp") || program.ends_with("pyls"))
}

fn all_symbol_kinds() -> Vec<SymbolKind> {
    vec![
        SymbolKind::FILE,
        SymbolKind::MODULE,
        SymbolKind::NAMESPACE,
        SymbolKind::PACKAGE,
        SymbolKind::CLASS,
        SymbolKind::METHOD,
        SymbolKind::PROPERTY,
        SymbolKind::FIELD,
        SymbolKind::CONSTRUCTOR,
        SymbolKind::ENUM,
        SymbolKind::INTERFACE,
        SymbolKind::FUNCTION,
        SymbolKind::VARIABLE,
        SymbolKind::CONSTANT,
        SymbolKind::STRING,
        SymbolKind::NUMBER,
        SymbolKind::BOOLEAN,
        SymbolKind::ARRAY,
        SymbolKind::OBJECT,
        SymbolKind::KEY,
        SymbolKind::NULL,
        SymbolKind::ENUM_MEMBER,
        SymbolKind::STRUCT,
        SymbolKind::EVENT,
        SymbolKind::OPERATOR,
        SymbolKind::TYPE_PARAMETER,
    ]
}

fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities::default()),
            definition: Some(GotoCapability {
                dynamic_registration: None,
                link_support: Some(false),
            }),
            references: Some(ReferenceClientCapabilities {
                dynamic_registration: None,
            }),
            rename: Some(RenameClientCapabilities {
                dynamic_registration: None,
                prepare_support: Some(false),
                prepare_support_default_behavior: None,
                honors_change_annotations: None,
            }),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                dynamic_registration: None,
                symbol_kind: Some(SymbolKindCapability {
                    value_set: Some(all_symbol_kinds()),
                }),
                hierarchical_document_symbol_support: Some(true),
                tag_support: None,
            }),
            completion: Some(CompletionClientCapabilities {
                completion_item: Some(CompletionItemCapability {
                    snippet_support: Some(true),
                    ..CompletionItemCapability::default()
                }),
                ..CompletionClientCapabilities::default()
            }),
            hover: Some(HoverClientCapabilities::default()),
            signature_help: Some(SignatureHelpClientCapabilities::default()),
            diagnostic: Some(DiagnosticClientCapabilities {
                dynamic_registration: Some(false),
                related_document_support: Some(false),
            }),
            ..TextDocumentClientCapabilities::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            workspace_edit: Some(WorkspaceEditClientCapabilities {
                document_changes: Some(true),
                ..WorkspaceEditClientCapabilities::default()
            }),
            workspace_folders: Some(true),
            ..WorkspaceClientCapabilities::default()
        }),
        ..ClientCapabilities::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pylsp_detection() {
        let pylsp = vec!["pylsp".to_string()];
        assert!(is_pylsp_family(&pylsp));

        let path = vec!["/usr/bin/pylsp".to_string(), "-v".to_string()];
        assert!(is_pylsp_family(&path));

        let tsserver = vec!["typescript-language-server".to_string()];
        assert!(!is_pylsp_family(&tsserver));
    }

    #[test]
    fn test_pylsp_gets_default_plugins() {
        let config = ServerConfig {
            extensions: vec!["py".to_string()],
            command: vec!["pylsp".to_string()],
            root_dir: None,
            restart_interval: None,
            initialization_options: None,
        };

        let options = effective_initialization_options(&config).unwrap();
        assert!(options["pylsp"]["plugins"]["pyflakes"]["enabled"].as_bool().unwrap());
    }

    #[test]
    fn test_user_options_are_not_overridden() {
        let config = ServerConfig {
            extensions: vec!["py".to_string()],
            command: vec!["pylsp".to_string()],
            root_dir: None,
            restart_interval: None,
            initialization_options: Some(serde_json::json!({"custom": true})),
        };

        let options = effective_initialization_options(&config).unwrap();
        assert_eq!(options, serde_json::json!({"custom": true}));
    }

    #[test]
    fn test_client_capabilities_shape() {
        let caps = client_capabilities();
        let text = caps.text_document.unwrap();

        assert_eq!(text.definition.unwrap().link_support, Some(false));
        assert_eq!(text.rename.unwrap().prepare_support, Some(false));

        let symbols = text.document_symbol.unwrap();
        assert_eq!(symbols.hierarchical_document_symbol_support, Some(true));
        assert_eq!(symbols.symbol_kind.unwrap().value_set.unwrap().len(), 26);

        let workspace = caps.workspace.unwrap();
        assert_eq!(workspace.workspace_edit.unwrap().document_changes, Some(true));
        assert_eq!(workspace.workspace_folders, Some(true));
    }

    #[test]
    fn test_empty_command_fails_spawn() {
        let config = ServerConfig {
            extensions: vec!["rs".to_string()],
            command: Vec::new(),
            root_dir: None,
            restart_interval: None,
            initialization_options: None,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(LspPeer::start(config));
        assert!(matches!(result, Err(Error::Spawn { .. })));
    }
}
