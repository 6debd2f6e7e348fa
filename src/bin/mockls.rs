// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock LSP server for testing.
//!
//! Speaks the LSP protocol over stdin/stdout using Content-Length framed
//! JSON-RPC. CLI flags control capabilities, timing, and failure modes.
//! No tokio — uses `std::thread` for deferred notifications.
//!
//! Answers are computed from the text of opened documents: definitions and
//! symbols come from simple declaration patterns (`function x`, `let x`,
//! `class x`, ...), diagnostics flag lines containing `FIXME`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock LSP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
#[allow(
    clippy::struct_excessive_bools,
    reason = "CLI flags are inherently boolean"
)]
struct Args {
    /// Reply to documentSymbol with flat SymbolInformation instead of the
    /// hierarchical shape.
    #[arg(long)]
    flat_symbols: bool,

    /// Advertise and answer pull diagnostics (`textDocument/diagnostic`).
    #[arg(long)]
    pull_diagnostics: bool,

    /// Answer pull diagnostics with an "unchanged" report.
    #[arg(long)]
    pull_unchanged: bool,

    /// Advertise `workspace.fileOperations` and answer willRenameFiles with
    /// import edits.
    #[arg(long)]
    will_rename: bool,

    /// Send an `initialized` notification back to the client once
    /// initialized, signaling readiness immediately.
    #[arg(long)]
    echo_initialized: bool,

    /// Reply to rename with the documentChanges shape instead of changes.
    #[arg(long)]
    document_changes: bool,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Include a version in publishDiagnostics params.
    #[arg(long)]
    publish_version: bool,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Exit after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Send a nonstandard server-to-client request after initialize.
    #[arg(long)]
    send_custom_request: bool,
}

/// A JSON-RPC request.
#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code, reason = "Required by JSON-RPC protocol")]
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

type Writer = Arc<Mutex<std::io::Stdout>>;

/// Shared state for the mock server.
struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    response_count: u64,
    writer: Writer,
}

fn main() {
    let args = Args::parse();
    let mut server = MockServer::new(args);
    let mut stdin = std::io::stdin();
    server.run(&mut stdin);
}

impl MockServer {
    fn new(args: Args) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer: Arc::new(Mutex::new(std::io::stdout())),
        }
    }

    /// Run the server, reading framed messages from the given reader.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(request) = serde_json::from_str::<Request>(&message) else {
                    continue;
                };

                self.handle_message(request);
            }
        }
    }

    fn handle_message(&mut self, request: Request) {
        let Some(method) = request.method.clone() else {
            return;
        };

        if request.id.is_some() {
            self.handle_request(&method, request);
        } else {
            self.handle_notification(&method, &request.params);
        }
    }

    fn handle_request(&mut self, method: &str, request: Request) {
        let Some(id) = request.id else { return };

        // Check hang_on — never respond
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        // Check fail_on — return `InternalError`
        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(RpcError {
                    code: -32603,
                    message: format!("mockls: configured to fail on {method}"),
                }),
            });
            return;
        }

        let result = match method {
            "initialize" => Some(self.handle_initialize()),
            "shutdown" => Some(Value::Null),
            "textDocument/hover" => self.handle_hover(&request.params),
            "textDocument/definition" | "textDocument/implementation" => {
                self.handle_definition(&request.params)
            }
            "textDocument/references" => self.handle_references(&request.params),
            "textDocument/documentSymbol" => self.handle_document_symbols(&request.params),
            "textDocument/rename" => self.handle_rename(&request.params),
            "textDocument/prepareCallHierarchy" => self.handle_prepare_hierarchy(&request.params),
            "callHierarchy/incomingCalls" => self.handle_incoming_calls(&request.params),
            "callHierarchy/outgoingCalls" => Some(Value::Array(Vec::new())),
            "workspace/symbol" => Some(self.handle_workspace_symbols(&request.params)),
            "textDocument/diagnostic" if self.args.pull_diagnostics => {
                Some(self.handle_pull_diagnostics(&request.params))
            }
            "workspace/willRenameFiles" if self.args.will_rename => {
                Some(self.handle_will_rename(&request.params))
            }
            _ => {
                self.send_response(&Response {
                    jsonrpc: "2.0".to_string(),
                    id,
                    result: None,
                    error: Some(RpcError {
                        code: -32601,
                        message: format!("mockls: method not found: {method}"),
                    }),
                });
                return;
            }
        };

        self.send_response(&Response {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error: None,
        });

        if method == "initialize" && self.args.send_custom_request {
            self.send_message(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": "mockls-custom-1",
                "method": "workspace/executeClientCommand",
                "params": { "command": "mockls.ping", "arguments": [] }
            }));
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "initialized" => {
                if self.args.echo_initialized {
                    self.send_message(&serde_json::json!({
                        "jsonrpc": "2.0",
                        "method": "initialized",
                        "params": {}
                    }));
                }
            }
            "textDocument/didOpen" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let text = td.get("text").and_then(Value::as_str).unwrap_or_default();
                    self.documents.insert(uri.to_string(), text.to_string());

                    if !self.args.no_diagnostics {
                        self.publish_diagnostics(uri, None);
                    }
                }
            }
            "textDocument/didChange" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let version = td.get("version").and_then(Value::as_i64);
                    if let Some(text) = params
                        .get("contentChanges")
                        .and_then(Value::as_array)
                        .and_then(|arr| arr.last())
                        .and_then(|c| c.get("text"))
                        .and_then(Value::as_str)
                    {
                        self.documents.insert(uri.to_string(), text.to_string());
                    }

                    if !self.args.no_diagnostics {
                        self.publish_diagnostics(uri, version);
                    }
                }
            }
            "textDocument/didClose" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    self.documents.remove(uri);
                }
            }
            "exit" => {
                std::process::exit(0);
            }
            // workspace/didRenameFiles and all others are silently accepted
            _ => {}
        }
    }

    fn handle_initialize(&self) -> Value {
        let mut capabilities = serde_json::json!({
            "hoverProvider": true,
            "definitionProvider": true,
            "implementationProvider": true,
            "referencesProvider": true,
            "documentSymbolProvider": true,
            "workspaceSymbolProvider": true,
            "renameProvider": true,
            "callHierarchyProvider": true,
            "textDocumentSync": {
                "openClose": true,
                "change": 1
            }
        });

        if self.args.pull_diagnostics {
            capabilities["diagnosticProvider"] = serde_json::json!({
                "interFileDependencies": false,
                "workspaceDiagnostics": false
            });
        }

        if self.args.will_rename {
            let filter = serde_json::json!({
                "filters": [{ "pattern": { "glob": "**/*" } }]
            });
            capabilities["workspace"] = serde_json::json!({
                "fileOperations": {
                    "willRename": filter,
                    "didRename": filter
                }
            });
        }

        serde_json::json!({ "capabilities": capabilities })
    }

    fn handle_hover(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        Some(serde_json::json!({
            "contents": {
                "kind": "markdown",
                "value": format!("```\n{word}\n```")
            }
        }))
    }

    fn handle_definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;
        find_declaration(content, &word)
            .map(|(line_idx, col_idx)| location_json(uri, line_idx, col_idx, col_idx + word.len()))
    }

    fn handle_references(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        let mut locations = Vec::new();
        for (line_idx, line_text) in content.lines().enumerate() {
            let mut start = 0;
            while let Some(pos) = line_text[start..].find(word.as_str()) {
                let col_idx = start + pos;
                locations.push(location_json(uri, line_idx, col_idx, col_idx + word.len()));
                start = col_idx + word.len();
            }
        }

        Some(Value::Array(locations))
    }

    fn handle_document_symbols(&self, params: &Value) -> Option<Value> {
        let uri = params
            .get("textDocument")
            .and_then(|td| td.get("uri"))
            .and_then(Value::as_str)?;
        let content = self.documents.get(uri)?;

        let symbols = extract_declarations(content);
        if self.args.flat_symbols {
            let flat: Vec<Value> = symbols
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "name": d.name,
                        "kind": d.kind,
                        "location": location_json(uri, d.line, 0, line_len(content, d.line))
                    })
                })
                .collect();
            Some(Value::Array(flat))
        } else {
            let nested: Vec<Value> = symbols
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "name": d.name,
                        "kind": d.kind,
                        "range": range_json(d.line, 0, d.line, line_len(content, d.line)),
                        "selectionRange": range_json(d.line, d.col, d.line, d.col + d.name.len())
                    })
                })
                .collect();
            Some(Value::Array(nested))
        }
    }

    fn handle_rename(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let new_name = params.get("newName").and_then(Value::as_str)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        let mut edits = Vec::new();
        for (line_idx, line_text) in content.lines().enumerate() {
            let mut start = 0;
            while let Some(pos) = line_text[start..].find(word.as_str()) {
                let col_idx = start + pos;
                edits.push(serde_json::json!({
                    "range": range_json(line_idx, col_idx, line_idx, col_idx + word.len()),
                    "newText": new_name
                }));
                start = col_idx + word.len();
            }
        }

        if self.args.document_changes {
            Some(serde_json::json!({
                "documentChanges": [{
                    "textDocument": { "uri": uri, "version": 1 },
                    "edits": edits
                }]
            }))
        } else {
            Some(serde_json::json!({ "changes": { uri: edits } }))
        }
    }

    fn handle_prepare_hierarchy(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;
        let (decl_line, decl_col) = find_declaration(content, &word)?;

        Some(serde_json::json!([{
            "name": word,
            "kind": 12,
            "uri": uri,
            "range": range_json(decl_line, 0, decl_line, line_len(content, decl_line)),
            "selectionRange": range_json(decl_line, decl_col, decl_line, decl_col + word.len())
        }]))
    }

    fn handle_incoming_calls(&self, params: &Value) -> Option<Value> {
        let item = params.get("item")?;
        let uri = item.get("uri").and_then(Value::as_str)?;
        let name = item.get("name").and_then(Value::as_str)?;
        let decl_line = item
            .get("selectionRange")
            .and_then(|r| r.get("start"))
            .and_then(|s| s.get("line"))
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;
        let content = self.documents.get(uri)?;

        let call_pattern = format!("{name}(");
        let mut calls = Vec::new();
        for (line_idx, line_text) in content.lines().enumerate() {
            if line_idx == decl_line {
                continue;
            }
            if let Some(col_idx) = line_text.find(call_pattern.as_str()) {
                calls.push(serde_json::json!({
                    "from": {
                        "name": format!("caller@{}", line_idx + 1),
                        "kind": 12,
                        "uri": uri,
                        "range": range_json(line_idx, 0, line_idx, line_text.len()),
                        "selectionRange": range_json(line_idx, col_idx, line_idx, col_idx + name.len())
                    },
                    "fromRanges": [range_json(line_idx, col_idx, line_idx, col_idx + name.len())]
                }));
            }
        }

        Some(Value::Array(calls))
    }

    fn handle_workspace_symbols(&self, params: &Value) -> Value {
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut symbols = Vec::new();
        for (uri, content) in &self.documents {
            for decl in extract_declarations(content) {
                if query.is_empty() || decl.name.contains(query) {
                    symbols.push(serde_json::json!({
                        "name": decl.name,
                        "kind": decl.kind,
                        "location": location_json(uri, decl.line, decl.col, decl.col + decl.name.len())
                    }));
                }
            }
        }

        Value::Array(symbols)
    }

    fn handle_pull_diagnostics(&self, params: &Value) -> Value {
        if self.args.pull_unchanged {
            return serde_json::json!({ "kind": "unchanged", "resultId": "mockls-1" });
        }

        let items = params
            .get("textDocument")
            .and_then(|td| td.get("uri"))
            .and_then(Value::as_str)
            .and_then(|uri| self.documents.get(uri))
            .map(|content| fixme_diagnostics(content))
            .unwrap_or_default();

        serde_json::json!({ "kind": "full", "resultId": "mockls-1", "items": items })
    }

    fn handle_will_rename(&self, params: &Value) -> Value {
        let Some(file) = params
            .get("files")
            .and_then(Value::as_array)
            .and_then(|files| files.first())
        else {
            return Value::Null;
        };
        let old_uri = file.get("oldUri").and_then(Value::as_str).unwrap_or_default();
        let new_uri = file.get("newUri").and_then(Value::as_str).unwrap_or_default();

        let old_stem = uri_stem(old_uri);
        let old_specifier = format!("./{old_stem}");

        let mut changes = serde_json::Map::new();
        for (doc_uri, content) in &self.documents {
            if doc_uri == old_uri {
                continue;
            }
            let Some(new_specifier) = relative_specifier(doc_uri, new_uri) else {
                continue;
            };

            let mut edits = Vec::new();
            for (line_idx, line_text) in content.lines().enumerate() {
                for quote in ['\'', '"'] {
                    let quoted = format!("{quote}{old_specifier}{quote}");
                    if let Some(pos) = line_text.find(quoted.as_str()) {
                        edits.push(serde_json::json!({
                            "range": range_json(
                                line_idx,
                                pos + 1,
                                line_idx,
                                pos + 1 + old_specifier.len()
                            ),
                            "newText": new_specifier
                        }));
                    }
                }
            }

            if !edits.is_empty() {
                changes.insert(doc_uri.clone(), Value::Array(edits));
            }
        }

        serde_json::json!({ "changes": changes })
    }

    /// Publishes diagnostics for a document, flagging `FIXME` lines.
    /// Respects the configured delay by deferring to a thread.
    fn publish_diagnostics(&mut self, uri: &str, version: Option<i64>) {
        let Some(content) = self.documents.get(uri) else {
            return;
        };

        let mut params = serde_json::json!({
            "uri": uri,
            "diagnostics": fixme_diagnostics(content)
        });
        if self.args.publish_version
            && let Some(version) = version
        {
            params["version"] = Value::from(version);
        }

        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": params
        });

        if self.args.diagnostics_delay > 0 {
            let delay = self.args.diagnostics_delay;
            let writer = self.writer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                write_framed(&writer, &notification);
            });
        } else {
            self.send_message(&notification);
        }
    }

    fn send_response(&mut self, response: &Response) {
        let Ok(value) = serde_json::to_value(response) else {
            return;
        };
        self.send_message(&value);

        self.response_count += 1;
        if let Some(limit) = self.args.drop_after
            && self.response_count >= limit
        {
            std::process::exit(1);
        }
    }

    fn send_message(&self, message: &Value) {
        write_framed(&self.writer, message);
    }
}

fn write_framed(writer: &Writer, message: &Value) {
    let Ok(body) = serde_json::to_string(message) else {
        return;
    };
    let framed = format!("Content-Length: {}\r\n\r\n{body}", body.len());
    if let Ok(mut out) = writer.lock() {
        let _ = out.write_all(framed.as_bytes());
        let _ = out.flush();
    }
}

/// Parses one framed message from the buffer, returning the body and the
/// number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let content_length: usize = headers.lines().find_map(|line| {
        line.to_ascii_lowercase()
            .strip_prefix("content-length:")
            .and_then(|v| v.trim().parse().ok())
    })?;

    let total = header_end + content_length;
    if buffer.len() < total {
        return None;
    }

    let body = String::from_utf8(buffer[header_end..total].to_vec()).ok()?;
    Some((body, total))
}

/// A declaration found by scanning document text.
struct Declaration {
    name: String,
    kind: u32,
    line: usize,
    col: usize,
}

/// Declaration keywords and the symbol kind they produce.
const DECLARATION_KEYWORDS: &[(&str, u32)] = &[
    ("function", 12),
    ("fn", 12),
    ("def", 12),
    ("class", 5),
    ("interface", 11),
    ("let", 13),
    ("const", 13),
    ("var", 13),
];

fn extract_declarations(content: &str) -> Vec<Declaration> {
    let mut declarations = Vec::new();

    for (line_idx, line_text) in content.lines().enumerate() {
        let trimmed = line_text.trim_start();
        for (keyword, kind) in DECLARATION_KEYWORDS {
            let Some(rest) = trimmed.strip_prefix(keyword) else {
                continue;
            };
            let Some(rest) = rest.strip_prefix(' ') else {
                continue;
            };
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if name.is_empty() {
                continue;
            }
            let col = line_text.len() - rest.len();
            declarations.push(Declaration {
                name,
                kind: *kind,
                line: line_idx,
                col,
            });
            break;
        }
    }

    declarations
}

fn find_declaration(content: &str, word: &str) -> Option<(usize, usize)> {
    for decl in extract_declarations(content) {
        if decl.name == word {
            return Some((decl.line, decl.col));
        }
    }

    // Fall back to the first occurrence anywhere.
    for (line_idx, line_text) in content.lines().enumerate() {
        if let Some(col_idx) = line_text.find(word) {
            return Some((line_idx, col_idx));
        }
    }
    None
}

fn fixme_diagnostics(content: &str) -> Vec<Value> {
    content
        .lines()
        .enumerate()
        .filter_map(|(line_idx, line_text)| {
            line_text.find("FIXME").map(|col| {
                serde_json::json!({
                    "range": range_json(line_idx, col, line_idx, col + "FIXME".len()),
                    "severity": 2,
                    "source": "mockls",
                    "message": "fixme marker"
                })
            })
        })
        .collect()
}

fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let position = params.get("position")?;
    let line = position.get("line").and_then(Value::as_u64)? as usize;
    let character = position.get("character").and_then(Value::as_u64)? as usize;
    Some((uri, line, character))
}

fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;
    let chars: Vec<char> = line_text.chars().collect();
    if col >= chars.len() {
        return None;
    }

    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    if !is_word(chars[col]) {
        return None;
    }

    let mut start = col;
    while start > 0 && is_word(chars[start - 1]) {
        start -= 1;
    }
    let mut end = col;
    while end < chars.len() && is_word(chars[end]) {
        end += 1;
    }

    Some(chars[start..end].iter().collect())
}

fn line_len(content: &str, line: usize) -> usize {
    content.lines().nth(line).map_or(0, str::len)
}

fn location_json(uri: &str, line: usize, start_col: usize, end_col: usize) -> Value {
    serde_json::json!({
        "uri": uri,
        "range": range_json(line, start_col, line, end_col)
    })
}

fn range_json(start_line: usize, start_col: usize, end_line: usize, end_col: usize) -> Value {
    serde_json::json!({
        "start": { "line": start_line, "character": start_col },
        "end": { "line": end_line, "character": end_col }
    })
}

/// File stem (name without extension) of a `file://` URI.
fn uri_stem(uri: &str) -> String {
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    Path::new(path)
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().to_string())
}

/// Import specifier for `target_uri` relative to `doc_uri`'s directory,
/// without the extension. Only handles targets under the document's
/// directory, which is all the tests need.
fn relative_specifier(doc_uri: &str, target_uri: &str) -> Option<String> {
    let doc_path = doc_uri.strip_prefix("file://")?;
    let target_path = target_uri.strip_prefix("file://")?;

    let doc_dir = Path::new(doc_path).parent()?;
    let relative = Path::new(target_path).strip_prefix(doc_dir).ok()?;
    let without_ext = relative.with_extension("");
    Some(format!("./{}", without_ext.display()))
}
