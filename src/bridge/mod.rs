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

/// Workspace-edit normalization and application.
pub mod edits;
/// Tool facade mapping MCP tool calls onto LSP operations.
pub mod handler;
/// File-move orchestration.
pub mod move_file;
/// Normalized LSP operations over the peer fabric.
pub mod operations;
/// Symbol resolution by name.
pub mod symbols;

pub use edits::{ApplyOptions, ApplyReport, apply_workspace_edit, normalize_workspace_edit};
pub use handler::ToolFacade;
pub use move_file::MoveOutcome;
pub use operations::CodeIntel;
pub use symbols::{SymbolMatch, SymbolQuery};
