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

//! Trestle is a bridge between MCP (Model Context Protocol) and LSP (Language Server Protocol).
//!
//! It supervises a set of long-running language servers, routes code-intelligence
//! requests (definition, references, rename, diagnostics, call hierarchy, file moves)
//! to the right server for a given file, and exposes the results as MCP tools.

/// Bridge logic between MCP tools and LSP operations.
pub mod bridge;
/// Configuration loading and server routing.
pub mod config;
/// Typed error kinds surfaced by the LSP fabric.
pub mod error;
/// LSP client fabric: framing, documents, diagnostics, adapters, supervision.
pub mod lsp;
/// MCP server implementation and type definitions.
pub mod mcp;
