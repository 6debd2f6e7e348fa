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

//! Tool facade: maps MCP tool calls onto the LSP operations.
//!
//! This layer is deliberately thin. It resolves relative paths, converts
//! the one-indexed line/column numbers users see into the zero-indexed
//! positions LSP speaks (and back), and formats results as short text.
//! Warnings collected along the way are prepended to the payload.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use lsp_types::{
    CallHierarchyItem, Diagnostic, DiagnosticSeverity, Hover, HoverContents, Location,
    MarkedString, Position, Uri,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::debug;

use super::edits::{ApplyOptions, apply_normalized, normalize_workspace_edit};
use super::operations::CodeIntel;
use super::symbols::{SymbolMatch, kind_name};
use crate::lsp::uri_to_path;
use crate::mcp::{CallToolResult, Tool, ToolHandler};

/// Input for tools addressing a symbol by name.
#[derive(Debug, Deserialize)]
pub struct SymbolInput {
    /// Path to the file (absolute or relative).
    pub file_path: String,
    /// Name of the symbol to resolve.
    pub symbol_name: String,
    /// Optional kind filter (function, class, variable, ...).
    pub symbol_kind: Option<String>,
}

/// Input for `find_references`.
#[derive(Debug, Deserialize)]
pub struct ReferencesInput {
    /// Path to the file (absolute or relative).
    pub file_path: String,
    /// Name of the symbol to resolve.
    pub symbol_name: String,
    /// Optional kind filter.
    pub symbol_kind: Option<String>,
    /// Whether the declaration itself is included.
    #[serde(default = "default_true")]
    pub include_declaration: bool,
}

/// Input for tools addressing a position. Line and character are 1-indexed.
#[derive(Debug, Deserialize)]
pub struct PositionInput {
    /// Path to the file (absolute or relative).
    pub file_path: String,
    /// 1-indexed line number.
    pub line: u32,
    /// 1-indexed character column.
    pub character: u32,
}

/// Input for `rename_symbol`.
#[derive(Debug, Deserialize)]
pub struct RenameInput {
    /// Path to the file (absolute or relative).
    pub file_path: String,
    /// Name of the symbol to rename.
    pub symbol_name: String,
    /// Optional kind filter.
    pub symbol_kind: Option<String>,
    /// The new name.
    pub new_name: String,
    /// Compute the edit without writing anything.
    #[serde(default)]
    pub dry_run: bool,
}

/// Input for `rename_symbol_strict`.
#[derive(Debug, Deserialize)]
pub struct RenameStrictInput {
    /// Path to the file (absolute or relative).
    pub file_path: String,
    /// 1-indexed line number.
    pub line: u32,
    /// 1-indexed character column.
    pub character: u32,
    /// The new name.
    pub new_name: String,
    /// Compute the edit without writing anything.
    #[serde(default)]
    pub dry_run: bool,
}

/// Input for tools that take only a file path.
#[derive(Debug, Deserialize)]
pub struct FileInput {
    /// Path to the file (absolute or relative).
    pub file_path: String,
}

/// Input for workspace symbol search.
#[derive(Debug, Deserialize)]
pub struct QueryInput {
    /// The search query.
    pub query: String,
}

/// Input for `restart_server`.
#[derive(Debug, Default, Deserialize)]
pub struct RestartInput {
    /// Restrict the restart to servers handling these extensions.
    pub extensions: Option<Vec<String>>,
}

/// Input for `move_file`.
#[derive(Debug, Deserialize)]
pub struct MoveFileInput {
    /// Current path of the file.
    pub source_path: String,
    /// Where to move it.
    pub destination_path: String,
    /// Plan the move without touching the filesystem.
    #[serde(default)]
    pub dry_run: bool,
}

const fn default_true() -> bool {
    true
}

/// MCP tool handler backed by the LSP operations layer.
pub struct ToolFacade {
    intel: Arc<CodeIntel>,
    runtime: Handle,
}

impl ToolFacade {
    /// Creates the facade over the operations layer.
    #[must_use]
    pub const fn new(intel: Arc<CodeIntel>, runtime: Handle) -> Self {
        Self { intel, runtime }
    }

    fn parse<T: serde::de::DeserializeOwned>(arguments: Option<Value>) -> Result<T> {
        serde_json::from_value(arguments.ok_or_else(|| anyhow!("Missing arguments"))?)
            .map_err(|e| anyhow!("Invalid arguments: {e}"))
    }

    /// Resolves a user-supplied path, joining relative ones onto the
    /// current working directory.
    fn resolve_path(file: &str) -> Result<PathBuf> {
        let path = PathBuf::from(file);
        if path.is_absolute() {
            Ok(path)
        } else {
            let cwd = std::env::current_dir()
                .map_err(|e| anyhow!("Failed to get current working directory: {e}"))?;
            Ok(cwd.join(path))
        }
    }

    /// Converts a 1-indexed user position to the 0-indexed LSP form.
    const fn to_position(line: u32, character: u32) -> Position {
        Position {
            line: line.saturating_sub(1),
            character: character.saturating_sub(1),
        }
    }

    fn handle_find_definition(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: SymbolInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;
        debug!("find_definition: {} '{}'", input.file_path, input.symbol_name);

        let text = self.runtime.block_on(async {
            let query = self
                .intel
                .find_symbols_by_name(&path, &input.symbol_name, input.symbol_kind.as_deref())
                .await?;

            if query.matches.is_empty() {
                return Ok::<_, anyhow::Error>(with_warnings(
                    query.warning.as_deref(),
                    format!(
                        "No symbols named \"{}\" found in {}",
                        input.symbol_name,
                        path.display()
                    ),
                ));
            }

            let mut locations = Vec::new();
            for symbol in &query.matches {
                locations.extend(self.intel.find_definition(&path, symbol.position).await?);
            }

            let body = if locations.is_empty() {
                format!("No definition found for \"{}\"", input.symbol_name)
            } else {
                format_locations(&locations)
            };

            Ok(with_warnings(query.warning.as_deref(), body))
        })?;

        Ok(CallToolResult::text(text))
    }

    fn handle_find_references(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: ReferencesInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;
        debug!("find_references: {} '{}'", input.file_path, input.symbol_name);

        let text = self.runtime.block_on(async {
            let query = self
                .intel
                .find_symbols_by_name(&path, &input.symbol_name, input.symbol_kind.as_deref())
                .await?;

            if query.matches.is_empty() {
                return Ok::<_, anyhow::Error>(with_warnings(
                    query.warning.as_deref(),
                    format!(
                        "No symbols named \"{}\" found in {}",
                        input.symbol_name,
                        path.display()
                    ),
                ));
            }

            let mut locations = Vec::new();
            for symbol in &query.matches {
                locations.extend(
                    self.intel
                        .find_references(&path, symbol.position, input.include_declaration)
                        .await?,
                );
            }

            let body = if locations.is_empty() {
                format!("No references found for \"{}\"", input.symbol_name)
            } else {
                format_locations(&locations)
            };

            Ok(with_warnings(query.warning.as_deref(), body))
        })?;

        Ok(CallToolResult::text(text))
    }

    fn handle_find_implementation(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: PositionInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;
        let position = Self::to_position(input.line, input.character);

        let locations = self
            .runtime
            .block_on(self.intel.find_implementation(&path, position))?;

        let text = if locations.is_empty() {
            format!(
                "No implementations found at {}:{}:{}",
                path.display(),
                input.line,
                input.character
            )
        } else {
            format_locations(&locations)
        };

        Ok(CallToolResult::text(text))
    }

    fn handle_rename_symbol(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: RenameInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;

        let text = self.runtime.block_on(async {
            let query = self
                .intel
                .find_symbols_by_name(&path, &input.symbol_name, input.symbol_kind.as_deref())
                .await?;

            match query.matches.as_slice() {
                [] => Ok::<_, anyhow::Error>(with_warnings(
                    query.warning.as_deref(),
                    format!(
                        "No symbols named \"{}\" found in {}",
                        input.symbol_name,
                        path.display()
                    ),
                )),
                [only] => {
                    let label = format!("{} ({})", only.name, kind_name(only.kind));
                    let body = self
                        .rename_at(&path, only.position, &input.new_name, input.dry_run, &label)
                        .await?;
                    Ok(with_warnings(query.warning.as_deref(), body))
                }
                several => {
                    let mut body = format!(
                        "Found {} symbols named \"{}\". Use rename_symbol_strict with one of:\n",
                        several.len(),
                        input.symbol_name
                    );
                    for candidate in several {
                        let _ = writeln!(body, "  {}", format_symbol_match(&path, candidate));
                    }
                    Ok(with_warnings(query.warning.as_deref(), body.trim_end().to_string()))
                }
            }
        })?;

        Ok(CallToolResult::text(text))
    }

    fn handle_rename_symbol_strict(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: RenameStrictInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;
        let position = Self::to_position(input.line, input.character);
        let label = format!("symbol at {}:{}", input.line, input.character);

        let text = self.runtime.block_on(self.rename_at(
            &path,
            position,
            &input.new_name,
            input.dry_run,
            &label,
        ))?;

        Ok(CallToolResult::text(text))
    }

    /// Shared rename tail: request the edit, then either describe it (dry
    /// run) or apply it.
    async fn rename_at(
        &self,
        path: &Path,
        position: Position,
        new_name: &str,
        dry_run: bool,
        label: &str,
    ) -> Result<String> {
        let edit = self.intel.rename_symbol(path, position, new_name).await?;
        let changes = normalize_workspace_edit(&edit);

        if changes.is_empty() {
            return Ok(format!("Server returned no edits renaming {label}"));
        }

        let edit_count: usize = changes.iter().map(|(_, edits)| edits.len()).sum();

        if dry_run {
            let mut text = format!(
                "[DRY RUN] Would rename {label} to \"{new_name}\": {edit_count} edit(s) in {} file(s):\n",
                changes.len()
            );
            for (uri, edits) in &changes {
                let _ = writeln!(text, "  {}: {} edit(s)", display_uri(uri), edits.len());
            }
            return Ok(text.trim_end().to_string());
        }

        let report = apply_normalized(&changes, ApplyOptions::default()).await?;
        let mut text = format!(
            "Renamed {label} to \"{new_name}\": {edit_count} edit(s) in {} file(s):\n",
            report.files_modified.len()
        );
        for file in &report.files_modified {
            let _ = writeln!(text, "  {}", file.display());
        }
        Ok(text.trim_end().to_string())
    }

    fn handle_get_diagnostics(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: FileInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;

        let diagnostics = self.runtime.block_on(self.intel.diagnostics(&path))?;

        let text = if diagnostics.is_empty() {
            format!("No diagnostics for {}", path.display())
        } else {
            let mut text = format!(
                "{} diagnostic(s) in {}:\n",
                diagnostics.len(),
                path.display()
            );
            for diagnostic in &diagnostics {
                let _ = writeln!(text, "  {}", format_diagnostic(diagnostic));
            }
            text.trim_end().to_string()
        };

        Ok(CallToolResult::text(text))
    }

    fn handle_get_hover(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: PositionInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;
        let position = Self::to_position(input.line, input.character);

        let hover = self.runtime.block_on(self.intel.hover(&path, position))?;

        let text = hover.map_or_else(
            || {
                format!(
                    "No hover information at {}:{}:{}",
                    path.display(),
                    input.line,
                    input.character
                )
            },
            |hover| hover_text(&hover),
        );

        Ok(CallToolResult::text(text))
    }

    fn handle_workspace_symbols(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: QueryInput = Self::parse(arguments)?;

        let symbols = self
            .runtime
            .block_on(self.intel.workspace_symbols(&input.query));

        let text = if symbols.is_empty() {
            format!("No workspace symbols matching \"{}\"", input.query)
        } else {
            let mut text = String::new();
            for symbol in &symbols {
                let _ = writeln!(
                    text,
                    "{} ({}) {}",
                    symbol.name,
                    kind_name(symbol.kind),
                    format_location(&symbol.location)
                );
            }
            text.trim_end().to_string()
        };

        Ok(CallToolResult::text(text))
    }

    fn handle_prepare_call_hierarchy(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: PositionInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;
        let position = Self::to_position(input.line, input.character);

        let items = self
            .runtime
            .block_on(self.intel.prepare_call_hierarchy(&path, position))?;

        let text = if items.is_empty() {
            format!(
                "No call hierarchy at {}:{}:{}",
                path.display(),
                input.line,
                input.character
            )
        } else {
            let mut text = String::new();
            for item in &items {
                let _ = writeln!(text, "{}", format_hierarchy_item(item));
            }
            text.trim_end().to_string()
        };

        Ok(CallToolResult::text(text))
    }

    fn handle_incoming_calls(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: PositionInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;
        let position = Self::to_position(input.line, input.character);

        let text = self.runtime.block_on(async {
            let items = self.intel.prepare_call_hierarchy(&path, position).await?;
            if items.is_empty() {
                return Ok::<_, anyhow::Error>(format!(
                    "No call hierarchy at {}:{}:{}",
                    path.display(),
                    input.line,
                    input.character
                ));
            }

            let mut text = String::new();
            for item in &items {
                let calls = self.intel.incoming_calls(item).await?;
                if calls.is_empty() {
                    let _ = writeln!(text, "{}: no incoming calls", item.name);
                }
                for call in calls {
                    let _ = writeln!(
                        text,
                        "{} \u{2190} {} [{} call site(s)]",
                        item.name,
                        format_hierarchy_item(&call.from),
                        call.from_ranges.len()
                    );
                }
            }
            Ok(text.trim_end().to_string())
        })?;

        Ok(CallToolResult::text(text))
    }

    fn handle_outgoing_calls(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: PositionInput = Self::parse(arguments)?;
        let path = Self::resolve_path(&input.file_path)?;
        let position = Self::to_position(input.line, input.character);

        let text = self.runtime.block_on(async {
            let items = self.intel.prepare_call_hierarchy(&path, position).await?;
            if items.is_empty() {
                return Ok::<_, anyhow::Error>(format!(
                    "No call hierarchy at {}:{}:{}",
                    path.display(),
                    input.line,
                    input.character
                ));
            }

            let mut text = String::new();
            for item in &items {
                let calls = self.intel.outgoing_calls(item).await?;
                if calls.is_empty() {
                    let _ = writeln!(text, "{}: no outgoing calls", item.name);
                }
                for call in calls {
                    let _ = writeln!(
                        text,
                        "{} \u{2192} {} [{} call site(s)]",
                        item.name,
                        format_hierarchy_item(&call.to),
                        call.from_ranges.len()
                    );
                }
            }
            Ok(text.trim_end().to_string())
        })?;

        Ok(CallToolResult::text(text))
    }

    fn handle_restart_server(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: RestartInput = match arguments {
            Some(v) => Self::parse(Some(v))?,
            None => RestartInput::default(),
        };

        let outcome = self
            .runtime
            .block_on(self.intel.restart_servers(input.extensions.as_deref()));

        let mut text = outcome.message;
        for command in &outcome.restarted {
            let _ = write!(text, "\n  restarted: {command}");
        }
        for command in &outcome.failed {
            let _ = write!(text, "\n  failed: {command}");
        }

        Ok(CallToolResult::text(text))
    }

    fn handle_move_file(&self, arguments: Option<Value>) -> Result<CallToolResult> {
        let input: MoveFileInput = Self::parse(arguments)?;
        let source = Self::resolve_path(&input.source_path)?;
        let destination = Self::resolve_path(&input.destination_path)?;

        let outcome = self.runtime.block_on(self.intel.move_file(
            &source,
            &destination,
            input.dry_run,
            ApplyOptions::default(),
        ))?;

        let mut body = if outcome.moved {
            format!("Moved {} \u{2192} {}", source.display(), destination.display())
        } else {
            format!(
                "[DRY RUN] Would move {} \u{2192} {}",
                source.display(),
                destination.display()
            )
        };

        if outcome.moved {
            if outcome.changed_files.is_empty() {
                body.push_str("\nNo import updates were needed");
            } else {
                let _ = write!(body, "\nImports updated in {} file(s):", outcome.changed_files.len());
                for file in &outcome.changed_files {
                    let _ = write!(body, "\n  {}", file.display());
                }
            }
        } else if outcome.edit_plan.is_empty() {
            body.push_str("\nNo import updates would be needed");
        } else {
            let _ = write!(body, "\nImport updates planned in {} file(s):", outcome.edit_plan.len());
            for (uri, edits) in &outcome.edit_plan {
                let _ = write!(body, "\n  {}: {} edit(s)", display_uri(uri), edits.len());
            }
        }

        let warnings = outcome.warnings.iter().map(String::as_str);
        Ok(CallToolResult::text(prepend_warning_lines(warnings, body)))
    }
}

impl ToolHandler for ToolFacade {
    #[allow(clippy::too_many_lines, reason = "one schema literal per tool")]
    fn list_tools(&self) -> Vec<Tool> {
        let file_position_schema = serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Path to the file" },
                "line": { "type": "integer", "description": "1-indexed line number" },
                "character": { "type": "integer", "description": "1-indexed column" }
            },
            "required": ["file_path", "line", "character"]
        });

        let symbol_schema = serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Path to the file" },
                "symbol_name": { "type": "string", "description": "Symbol name to resolve" },
                "symbol_kind": { "type": "string", "description": "Optional kind filter (function, class, variable, ...)" }
            },
            "required": ["file_path", "symbol_name"]
        });

        vec![
            Tool {
                name: "find_definition".to_string(),
                description: Some("Find the definition of a symbol by name".to_string()),
                input_schema: symbol_schema.clone(),
            },
            Tool {
                name: "find_references".to_string(),
                description: Some("Find all references to a symbol by name".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "symbol_name": { "type": "string" },
                        "symbol_kind": { "type": "string" },
                        "include_declaration": { "type": "boolean", "default": true }
                    },
                    "required": ["file_path", "symbol_name"]
                }),
            },
            Tool {
                name: "find_implementation".to_string(),
                description: Some("Find implementations of the symbol at a position".to_string()),
                input_schema: file_position_schema.clone(),
            },
            Tool {
                name: "rename_symbol".to_string(),
                description: Some(
                    "Rename a symbol by name; ambiguous names return candidates".to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "symbol_name": { "type": "string" },
                        "symbol_kind": { "type": "string" },
                        "new_name": { "type": "string" },
                        "dry_run": { "type": "boolean", "default": false }
                    },
                    "required": ["file_path", "symbol_name", "new_name"]
                }),
            },
            Tool {
                name: "rename_symbol_strict".to_string(),
                description: Some("Rename the symbol at an exact position".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "line": { "type": "integer", "description": "1-indexed line number" },
                        "character": { "type": "integer", "description": "1-indexed column" },
                        "new_name": { "type": "string" },
                        "dry_run": { "type": "boolean", "default": false }
                    },
                    "required": ["file_path", "line", "character", "new_name"]
                }),
            },
            Tool {
                name: "get_diagnostics".to_string(),
                description: Some("Get diagnostics for a file".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" }
                    },
                    "required": ["file_path"]
                }),
            },
            Tool {
                name: "get_hover".to_string(),
                description: Some("Get hover information at a position".to_string()),
                input_schema: file_position_schema.clone(),
            },
            Tool {
                name: "find_workspace_symbols".to_string(),
                description: Some("Search symbols across all running servers".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" }
                    },
                    "required": ["query"]
                }),
            },
            Tool {
                name: "prepare_call_hierarchy".to_string(),
                description: Some("Prepare call hierarchy items at a position".to_string()),
                input_schema: file_position_schema.clone(),
            },
            Tool {
                name: "get_incoming_calls".to_string(),
                description: Some("Incoming calls for the function at a position".to_string()),
                input_schema: file_position_schema.clone(),
            },
            Tool {
                name: "get_outgoing_calls".to_string(),
                description: Some("Outgoing calls from the function at a position".to_string()),
                input_schema: file_position_schema,
            },
            Tool {
                name: "restart_server".to_string(),
                description: Some("Restart running language servers".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "extensions": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Restrict to servers handling these extensions"
                        }
                    }
                }),
            },
            Tool {
                name: "move_file".to_string(),
                description: Some("Move a file, updating imports through the server".to_string()),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "source_path": { "type": "string" },
                        "destination_path": { "type": "string" },
                        "dry_run": { "type": "boolean", "default": false }
                    },
                    "required": ["source_path", "destination_path"]
                }),
            },
        ]
    }

    fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        match name {
            "find_definition" => self.handle_find_definition(arguments),
            "find_references" => self.handle_find_references(arguments),
            "find_implementation" => self.handle_find_implementation(arguments),
            "rename_symbol" => self.handle_rename_symbol(arguments),
            "rename_symbol_strict" => self.handle_rename_symbol_strict(arguments),
            "get_diagnostics" => self.handle_get_diagnostics(arguments),
            "get_hover" => self.handle_get_hover(arguments),
            "find_workspace_symbols" => self.handle_workspace_symbols(arguments),
            "prepare_call_hierarchy" => self.handle_prepare_call_hierarchy(arguments),
            "get_incoming_calls" => self.handle_incoming_calls(arguments),
            "get_outgoing_calls" => self.handle_outgoing_calls(arguments),
            "restart_server" => self.handle_restart_server(arguments),
            "move_file" => self.handle_move_file(arguments),
            _ => Err(anyhow!("Unknown tool: {name}")),
        }
    }
}

/// Prepends a warning line to a payload, when present.
fn with_warnings(warning: Option<&str>, body: String) -> String {
    warning.map_or_else(
        || body.clone(),
        |warning| format!("Warning: {warning}\n\n{body}"),
    )
}

/// Prepends any number of warning lines to a payload.
fn prepend_warning_lines<'a>(warnings: impl Iterator<Item = &'a str>, body: String) -> String {
    let prefix: String = warnings
        .map(|w| format!("Warning: {w}\n"))
        .collect();
    if prefix.is_empty() {
        body
    } else {
        format!("{prefix}\n{body}")
    }
}

/// Renders `path:line:column`, 1-indexed.
fn format_location(location: &Location) -> String {
    format!(
        "{}:{}:{}",
        display_uri(&location.uri),
        location.range.start.line + 1,
        location.range.start.character + 1
    )
}

fn format_locations(locations: &[Location]) -> String {
    let mut lines: Vec<String> = locations.iter().map(format_location).collect();
    lines.dedup();
    lines.join("\n")
}

fn format_symbol_match(path: &Path, symbol: &SymbolMatch) -> String {
    format!(
        "{}:{}:{} ({})",
        path.display(),
        symbol.position.line + 1,
        symbol.position.character + 1,
        kind_name(symbol.kind)
    )
}

fn format_hierarchy_item(item: &CallHierarchyItem) -> String {
    format!(
        "{} ({}) {}:{}:{}",
        item.name,
        kind_name(item.kind),
        display_uri(&item.uri),
        item.selection_range.start.line + 1,
        item.selection_range.start.character + 1
    )
}

fn format_diagnostic(diagnostic: &Diagnostic) -> String {
    let severity = match diagnostic.severity {
        Some(DiagnosticSeverity::ERROR) => "error",
        Some(DiagnosticSeverity::WARNING) => "warning",
        Some(DiagnosticSeverity::INFORMATION) => "info",
        Some(DiagnosticSeverity::HINT) => "hint",
        _ => "unknown",
    };

    let mut line = format!(
        "{}:{} [{severity}] {}",
        diagnostic.range.start.line + 1,
        diagnostic.range.start.character + 1,
        diagnostic.message
    );
    if let Some(source) = &diagnostic.source {
        let _ = write!(line, " ({source})");
    }
    line
}

/// Renders a URI as a filesystem path where possible.
fn display_uri(uri: &Uri) -> String {
    uri_to_path(uri).map_or_else(
        |_| uri.as_str().to_string(),
        |path| path.display().to_string(),
    )
}

fn hover_text(hover: &Hover) -> String {
    fn marked(ms: &MarkedString) -> String {
        match ms {
            MarkedString::String(s) => s.clone(),
            MarkedString::LanguageString(ls) => ls.value.clone(),
        }
    }

    match &hover.contents {
        HoverContents::Scalar(ms) => marked(ms),
        HoverContents::Array(items) => items
            .iter()
            .map(marked)
            .collect::<Vec<_>>()
            .join("\n---\n"),
        HoverContents::Markup(markup) => markup.value.clone(),
    }
}
