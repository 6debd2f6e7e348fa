// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end tests over the `trestle` binary.
//!
//! Spawns the real bridge with a config pointing at `mockls`, drives it
//! through the MCP stdio surface, and checks the text payloads and
//! filesystem effects the tools promise.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

/// Helper that spawns the bridge and talks MCP over its stdio.
struct Bridge {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    next_id: u64,
}

impl Bridge {
    /// Writes a config file for `mockls` with the given flags and spawns
    /// the bridge against it.
    fn spawn(dir: &Path, mockls_flags: &[&str]) -> Result<Self> {
        let mut command = vec![env!("CARGO_BIN_EXE_mockls").to_string()];
        command.extend(mockls_flags.iter().map(ToString::to_string));

        let config = json!({
            "servers": [{
                "extensions": ["ts", "tsx"],
                "command": command,
                "rootDir": dir.display().to_string()
            }]
        });
        let config_path = dir.join("trestle.json");
        std::fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;

        let mut child = Command::new(env!("CARGO_BIN_EXE_trestle"))
            .env("CCLSP_CONFIG_PATH", &config_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn bridge")?;

        let stdin = child.stdin.take().context("Failed to get stdin")?;
        let stdout = BufReader::new(child.stdout.take().context("Failed to get stdout")?);

        let mut bridge = Self {
            child,
            stdin: Some(stdin),
            stdout: Some(stdout),
            next_id: 1,
        };
        bridge.initialize()?;
        Ok(bridge)
    }

    fn send(&mut self, request: &Value) -> Result<()> {
        let json = serde_json::to_string(request)?;
        let stdin = self.stdin.as_mut().context("Stdin already closed")?;
        writeln!(stdin, "{json}").context("Failed to write to stdin")?;
        stdin.flush().context("Failed to flush stdin")?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Value> {
        let mut line = String::new();
        let stdout = self.stdout.as_mut().context("Stdout already closed")?;
        stdout
            .read_line(&mut line)
            .context("Failed to read from stdout")?;
        serde_json::from_str(&line).context("Failed to parse JSON response")
    }

    fn initialize(&mut self) -> Result<()> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "bridge-test", "version": "1.0.0" }
            }
        }))?;

        let response = self.recv()?;
        if response.get("result").is_none() {
            bail!("Initialize failed: {response:?}");
        }

        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))?;
        Ok(())
    }

    fn list_tools(&mut self) -> Result<Vec<String>> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": self.next_id,
            "method": "tools/list"
        }))?;
        self.next_id += 1;

        let response = self.recv()?;
        let tools = response["result"]["tools"]
            .as_array()
            .context("missing tools array")?;
        Ok(tools
            .iter()
            .filter_map(|t| t["name"].as_str().map(ToString::to_string))
            .collect())
    }

    /// Calls a tool and returns its text payload.
    fn call(&mut self, name: &str, arguments: Value) -> Result<String> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": self.next_id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }))?;
        self.next_id += 1;

        let response = self.recv()?;
        let text = response["result"]["content"][0]["text"]
            .as_str()
            .with_context(|| format!("no text payload in {response:?}"))?;
        Ok(text.to_string())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Close stdin to signal shutdown
        self.stdin.take();
        let _ = self.child.wait();
    }
}

#[test]
fn test_tools_list_covers_surface() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized"])?;

    let tools = bridge.list_tools()?;
    for expected in [
        "find_definition",
        "find_references",
        "find_implementation",
        "rename_symbol",
        "rename_symbol_strict",
        "get_diagnostics",
        "get_hover",
        "find_workspace_symbols",
        "prepare_call_hierarchy",
        "get_incoming_calls",
        "get_outgoing_calls",
        "restart_server",
        "move_file",
    ] {
        assert!(tools.contains(&expected.to_string()), "missing {expected}");
    }
    Ok(())
}

#[test]
fn test_rename_dry_run_leaves_file_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let contents = "function oldName() {}\noldName();\n";
    let file = dir.path().join("a.ts");
    std::fs::write(&file, contents)?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized", "--no-diagnostics"])?;

    let text = bridge.call(
        "rename_symbol",
        json!({
            "file_path": file.display().to_string(),
            "symbol_name": "oldName",
            "symbol_kind": "function",
            "new_name": "newName",
            "dry_run": true
        }),
    )?;

    assert!(text.starts_with("[DRY RUN]"), "payload: {text}");
    assert!(text.contains("oldName (function)"), "payload: {text}");
    assert!(text.contains("newName"), "payload: {text}");

    // Dry run must not touch the filesystem.
    assert_eq!(std::fs::read_to_string(&file)?, contents);
    Ok(())
}

#[test]
fn test_rename_applies_edits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("a.ts");
    std::fs::write(&file, "function oldName() {}\noldName();\n")?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized", "--no-diagnostics"])?;

    let text = bridge.call(
        "rename_symbol",
        json!({
            "file_path": file.display().to_string(),
            "symbol_name": "oldName",
            "new_name": "newName",
            "dry_run": false
        }),
    )?;

    assert!(text.starts_with("Renamed"), "payload: {text}");
    assert_eq!(
        std::fs::read_to_string(&file)?,
        "function newName() {}\nnewName();\n"
    );
    Ok(())
}

#[test]
fn test_kind_fallback_warning_and_locations() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("a.ts");
    std::fs::write(&file, "function test() {}\nlet test = 1\n")?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized", "--no-diagnostics"])?;

    let text = bridge.call(
        "find_definition",
        json!({
            "file_path": file.display().to_string(),
            "symbol_name": "test",
            "symbol_kind": "class"
        }),
    )?;

    assert!(
        text.contains(
            "No symbols with kind \"class\"; found 2 of other kinds: function, variable"
        ),
        "payload: {text}"
    );
    // One-indexed path:line:col output follows the warning.
    assert!(text.contains(":1:10"), "payload: {text}");
    Ok(())
}

#[test]
fn test_invalid_kind_warning() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("a.ts");
    std::fs::write(&file, "function test() {}\n")?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized", "--no-diagnostics"])?;

    let text = bridge.call(
        "find_definition",
        json!({
            "file_path": file.display().to_string(),
            "symbol_name": "test",
            "symbol_kind": "gadget"
        }),
    )?;

    assert!(
        text.contains("Invalid symbol kind \"gadget\""),
        "payload: {text}"
    );
    Ok(())
}

#[test]
fn test_get_hover_one_indexed_positions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("a.ts");
    std::fs::write(&file, "function greet() {}\n")?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized", "--no-diagnostics"])?;

    // Line 1 column 10 (one-indexed) is the function name.
    let text = bridge.call(
        "get_hover",
        json!({
            "file_path": file.display().to_string(),
            "line": 1,
            "character": 10
        }),
    )?;

    assert!(text.contains("greet"), "payload: {text}");
    Ok(())
}

#[test]
fn test_get_diagnostics_payload() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("a.ts");
    std::fs::write(&file, "ok line\n// FIXME broken\n")?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized"])?;

    let text = bridge.call(
        "get_diagnostics",
        json!({ "file_path": file.display().to_string() }),
    )?;

    assert!(text.contains("1 diagnostic(s)"), "payload: {text}");
    assert!(text.contains("2:4 [warning] fixme marker (mockls)"), "payload: {text}");
    Ok(())
}

#[test]
fn test_move_file_updates_imports() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let importer = dir.path().join("a.ts");
    let source = dir.path().join("b.ts");
    let destination = dir.path().join("lib").join("b.ts");
    std::fs::write(&importer, "import { b } from './b';\n")?;
    std::fs::write(&source, "export const b = 1;\n")?;

    let mut bridge = Bridge::spawn(
        dir.path(),
        &["--echo-initialized", "--no-diagnostics", "--will-rename"],
    )?;

    // Open the importer with the server so it can compute import edits.
    bridge.call(
        "get_hover",
        json!({
            "file_path": importer.display().to_string(),
            "line": 1,
            "character": 10
        }),
    )?;

    let text = bridge.call(
        "move_file",
        json!({
            "source_path": source.display().to_string(),
            "destination_path": destination.display().to_string(),
            "dry_run": false
        }),
    )?;

    assert!(text.contains("Moved"), "payload: {text}");
    assert!(text.contains("Imports updated in 1 file(s)"), "payload: {text}");

    assert!(!source.exists(), "source should be gone");
    assert_eq!(
        std::fs::read_to_string(&destination)?,
        "export const b = 1;\n"
    );
    assert_eq!(
        std::fs::read_to_string(&importer)?,
        "import { b } from './lib/b';\n"
    );
    Ok(())
}

#[test]
fn test_move_file_dry_run_touches_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let importer = dir.path().join("a.ts");
    let source = dir.path().join("b.ts");
    std::fs::write(&importer, "import { b } from './b';\n")?;
    std::fs::write(&source, "export const b = 1;\n")?;

    let mut bridge = Bridge::spawn(
        dir.path(),
        &["--echo-initialized", "--no-diagnostics", "--will-rename"],
    )?;

    bridge.call(
        "get_hover",
        json!({
            "file_path": importer.display().to_string(),
            "line": 1,
            "character": 10
        }),
    )?;

    let text = bridge.call(
        "move_file",
        json!({
            "source_path": source.display().to_string(),
            "destination_path": dir.path().join("lib/b.ts").display().to_string(),
            "dry_run": true
        }),
    )?;

    assert!(text.starts_with("[DRY RUN]"), "payload: {text}");
    assert!(source.exists());
    assert_eq!(
        std::fs::read_to_string(&importer)?,
        "import { b } from './b';\n"
    );
    Ok(())
}

#[test]
fn test_move_file_warns_without_will_rename_support() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("b.ts");
    std::fs::write(&source, "export const b = 1;\n")?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized", "--no-diagnostics"])?;

    // Start the peer so it participates in the fan-out.
    bridge.call(
        "get_hover",
        json!({
            "file_path": source.display().to_string(),
            "line": 1,
            "character": 14
        }),
    )?;

    let text = bridge.call(
        "move_file",
        json!({
            "source_path": source.display().to_string(),
            "destination_path": dir.path().join("c.ts").display().to_string(),
            "dry_run": false
        }),
    )?;

    assert!(
        text.contains("does not support willRenameFiles"),
        "payload: {text}"
    );
    assert!(text.contains("Moved"), "payload: {text}");
    assert!(dir.path().join("c.ts").exists());
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_rename_preserves_symlink() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("target.ts");
    let link = dir.path().join("link.ts");
    std::fs::write(&target, "const oldName = 42;\n")?;
    std::os::unix::fs::symlink(&target, &link)?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized", "--no-diagnostics"])?;

    // Line 1 column 7 (one-indexed) is the start of oldName.
    let text = bridge.call(
        "rename_symbol_strict",
        json!({
            "file_path": link.display().to_string(),
            "line": 1,
            "character": 7,
            "new_name": "newName",
            "dry_run": false
        }),
    )?;
    assert!(text.starts_with("Renamed"), "payload: {text}");

    let metadata = std::fs::symlink_metadata(&link)?;
    assert!(metadata.file_type().is_symlink(), "link was replaced");
    assert_eq!(std::fs::read_link(&link)?, target);
    assert_eq!(std::fs::read_to_string(&link)?, "const newName = 42;\n");
    assert_eq!(std::fs::read_to_string(&target)?, "const newName = 42;\n");
    Ok(())
}

#[test]
fn test_restart_server_with_nothing_running() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized"])?;

    let text = bridge.call("restart_server", json!({}))?;
    assert!(text.contains("no servers running"), "payload: {text}");
    Ok(())
}

#[test]
fn test_unknown_extension_reports_no_server() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("a.zig");
    std::fs::write(&file, "pub fn main() void {}\n")?;

    let mut bridge = Bridge::spawn(dir.path(), &["--echo-initialized"])?;

    let text = bridge.call(
        "get_hover",
        json!({
            "file_path": file.display().to_string(),
            "line": 1,
            "character": 8
        }),
    )?;

    assert!(
        text.contains("no LSP server configured for extension 'zig'"),
        "payload: {text}"
    );
    Ok(())
}
