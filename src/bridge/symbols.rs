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

//! Symbol resolution by name.
//!
//! Resolves `(file, name, kind?)` to concrete positions through document
//! symbols, tolerating both the hierarchical and the flat reply shapes.
//! When a kind filter matches nothing, the search repeats unfiltered and
//! reports what kinds were actually found.

use std::path::Path;

use lsp_types::{DocumentSymbol, DocumentSymbolResponse, Position, Range, SymbolInformation, SymbolKind};
use tokio::fs;

use super::operations::CodeIntel;
use crate::error::Error;

/// The canonical kind-string table. This is the only place symbol kinds are
/// named textually.
static KIND_NAMES: &[(SymbolKind, &str)] = &[
    (SymbolKind::FILE, "file"),
    (SymbolKind::MODULE, "module"),
    (SymbolKind::NAMESPACE, "namespace"),
    (SymbolKind::PACKAGE, "package"),
    (SymbolKind::CLASS, "class"),
    (SymbolKind::METHOD, "method"),
    (SymbolKind::PROPERTY, "property"),
    (SymbolKind::FIELD, "field"),
    (SymbolKind::CONSTRUCTOR, "constructor"),
    (SymbolKind::ENUM, "enum"),
    (SymbolKind::INTERFACE, "interface"),
    (SymbolKind::FUNCTION, "function"),
    (SymbolKind::VARIABLE, "variable"),
    (SymbolKind::CONSTANT, "constant"),
    (SymbolKind::STRING, "string"),
    (SymbolKind::NUMBER, "number"),
    (SymbolKind::BOOLEAN, "boolean"),
    (SymbolKind::ARRAY, "array"),
    (SymbolKind::OBJECT, "object"),
    (SymbolKind::KEY, "key"),
    (SymbolKind::NULL, "null"),
    (SymbolKind::ENUM_MEMBER, "enum_member"),
    (SymbolKind::STRUCT, "struct"),
    (SymbolKind::EVENT, "event"),
    (SymbolKind::OPERATOR, "operator"),
    (SymbolKind::TYPE_PARAMETER, "type_parameter"),
];

/// The lowercase name for a symbol kind.
#[must_use]
pub fn kind_name(kind: SymbolKind) -> &'static str {
    KIND_NAMES
        .iter()
        .find(|(k, _)| *k == kind)
        .map_or("unknown", |(_, name)| name)
}

/// Parses a kind name (case-insensitive) back into the enum.
#[must_use]
pub fn kind_from_name(name: &str) -> Option<SymbolKind> {
    let lowered = name.to_lowercase();
    KIND_NAMES
        .iter()
        .find(|(_, n)| *n == lowered)
        .map(|(kind, _)| *kind)
}

/// A resolved symbol with a concrete cursor position for follow-up calls.
#[derive(Debug, Clone)]
pub struct SymbolMatch {
    /// The symbol's name as reported by the server.
    pub name: String,
    /// The symbol's kind.
    pub kind: SymbolKind,
    /// Position suitable for position-based requests.
    pub position: Position,
    /// The full range the symbol spans.
    pub range: Range,
    /// Extra detail, when the server provides it.
    pub detail: Option<String>,
}

/// Result of a name resolution: matches plus an optional warning about kind
/// filtering.
#[derive(Debug, Default)]
pub struct SymbolQuery {
    /// Symbols satisfying the query.
    pub matches: Vec<SymbolMatch>,
    /// Warning to surface to the caller, if any.
    pub warning: Option<String>,
}

impl CodeIntel {
    /// Resolves symbols in `path` whose name equals or contains `name`,
    /// optionally filtered by kind. An invalid kind drops the filter with a
    /// warning; a kind that matches nothing falls back to all kinds with a
    /// warning describing what was found instead.
    ///
    /// # Errors
    ///
    /// Propagates peer resolution and request failures.
    pub async fn find_symbols_by_name(
        &self,
        path: &Path,
        name: &str,
        kind: Option<&str>,
    ) -> Result<SymbolQuery, Error> {
        let mut warning = None;

        let filter = match kind {
            Some(requested) => match kind_from_name(requested) {
                Some(valid) => Some(kind_name(valid)),
                None => {
                    warning = Some(format!(
                        "Invalid symbol kind \"{requested}\"; searching all kinds"
                    ));
                    None
                }
            },
            None => None,
        };

        let response = self.document_symbols(path).await?;
        let matches = collect_matches(&response, path, name, filter).await;

        if matches.is_empty()
            && let Some(filter) = filter
        {
            let fallback = collect_matches(&response, path, name, None).await;
            if !fallback.is_empty() {
                let mut kinds_seen: Vec<&str> = Vec::new();
                for candidate in &fallback {
                    let kind = kind_name(candidate.kind);
                    if !kinds_seen.contains(&kind) {
                        kinds_seen.push(kind);
                    }
                }
                warning = Some(format!(
                    "No symbols with kind \"{filter}\"; found {} of other kinds: {}",
                    fallback.len(),
                    kinds_seen.join(", ")
                ));
                return Ok(SymbolQuery {
                    matches: fallback,
                    warning,
                });
            }
        }

        Ok(SymbolQuery { matches, warning })
    }
}

/// Walks a document-symbol reply and collects name/kind matches with
/// concrete positions.
async fn collect_matches(
    response: &DocumentSymbolResponse,
    path: &Path,
    name: &str,
    kind_filter: Option<&str>,
) -> Vec<SymbolMatch> {
    match response {
        DocumentSymbolResponse::Nested(symbols) => {
            let mut matches = Vec::new();
            collect_nested(symbols, name, kind_filter, &mut matches);
            matches
        }
        DocumentSymbolResponse::Flat(symbols) => {
            // Flat replies carry no selection range; the position is found
            // by searching for the name's text inside the reported range.
            let text = fs::read_to_string(path).await.unwrap_or_default();
            collect_flat(symbols, &text, name, kind_filter)
        }
    }
}

fn collect_nested(
    symbols: &[DocumentSymbol],
    name: &str,
    kind_filter: Option<&str>,
    matches: &mut Vec<SymbolMatch>,
) {
    for symbol in symbols {
        if name_matches(&symbol.name, name) && kind_matches(symbol.kind, kind_filter) {
            matches.push(SymbolMatch {
                name: symbol.name.clone(),
                kind: symbol.kind,
                position: symbol.selection_range.start,
                range: symbol.range,
                detail: symbol.detail.clone(),
            });
        }

        if let Some(children) = &symbol.children {
            collect_nested(children, name, kind_filter, matches);
        }
    }
}

fn collect_flat(
    symbols: &[SymbolInformation],
    text: &str,
    name: &str,
    kind_filter: Option<&str>,
) -> Vec<SymbolMatch> {
    symbols
        .iter()
        .filter(|s| name_matches(&s.name, name) && kind_matches(s.kind, kind_filter))
        .map(|s| SymbolMatch {
            name: s.name.clone(),
            kind: s.kind,
            position: position_in_range(text, s.location.range, &s.name),
            range: s.location.range,
            detail: None,
        })
        .collect()
}

fn name_matches(candidate: &str, query: &str) -> bool {
    candidate == query || candidate.contains(query)
}

fn kind_matches(kind: SymbolKind, filter: Option<&str>) -> bool {
    filter.is_none_or(|f| kind_name(kind) == f)
}

/// Finds the first occurrence of `name` inside the declared range, falling
/// back to the range start when the text does not contain it.
fn position_in_range(text: &str, range: Range, name: &str) -> Position {
    let lines: Vec<&str> = text.lines().collect();
    let last_line = (range.end.line as usize).min(lines.len().saturating_sub(1));

    for line_idx in (range.start.line as usize)..=last_line {
        let Some(line) = lines.get(line_idx) else {
            break;
        };
        if let Some(byte_col) = line.find(name) {
            let character = line[..byte_col].chars().count();
            #[allow(
                clippy::cast_possible_truncation,
                reason = "line lengths fit in u32 per LSP"
            )]
            return Position {
                line: line_idx as u32,
                character: character as u32,
            };
        }
    }

    range.start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_name_round_trip() {
        assert_eq!(kind_name(SymbolKind::FUNCTION), "function");
        assert_eq!(kind_from_name("function"), Some(SymbolKind::FUNCTION));
        assert_eq!(kind_from_name("Class"), Some(SymbolKind::CLASS));
        assert_eq!(kind_from_name("enum_member"), Some(SymbolKind::ENUM_MEMBER));
        assert_eq!(kind_from_name("not-a-kind"), None);
    }

    #[test]
    fn test_name_matching_exact_and_substring() {
        assert!(name_matches("handleRequest", "handleRequest"));
        assert!(name_matches("handleRequest", "Request"));
        assert!(!name_matches("handle", "handleRequest"));
    }

    #[test]
    fn test_nested_collection_recurses() {
        #[allow(deprecated, reason = "DocumentSymbol carries a deprecated field")]
        let symbols = vec![DocumentSymbol {
            name: "Outer".to_string(),
            detail: None,
            kind: SymbolKind::CLASS,
            tags: None,
            deprecated: None,
            range: Range {
                start: Position {
                    line: 0,
                    character: 0,
                },
                end: Position {
                    line: 10,
                    character: 0,
                },
            },
            selection_range: Range {
                start: Position {
                    line: 0,
                    character: 6,
                },
                end: Position {
                    line: 0,
                    character: 11,
                },
            },
            children: Some(vec![DocumentSymbol {
                name: "method_a".to_string(),
                detail: Some("fn method_a()".to_string()),
                kind: SymbolKind::METHOD,
                tags: None,
                deprecated: None,
                range: Range {
                    start: Position {
                        line: 2,
                        character: 4,
                    },
                    end: Position {
                        line: 4,
                        character: 4,
                    },
                },
                selection_range: Range {
                    start: Position {
                        line: 2,
                        character: 7,
                    },
                    end: Position {
                        line: 2,
                        character: 15,
                    },
                },
                children: None,
            }]),
        }];

        let mut matches = Vec::new();
        collect_nested(&symbols, "method_a", Some("method"), &mut matches);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].position.line, 2);
        assert_eq!(matches[0].position.character, 7);
        assert_eq!(matches[0].detail.as_deref(), Some("fn method_a()"));

        // Kind filter excludes.
        let mut matches = Vec::new();
        collect_nested(&symbols, "method_a", Some("class"), &mut matches);
        assert!(matches.is_empty());
    }

    #[test]
    fn test_flat_position_search_in_range() {
        let text = "const x = 1;\nfunction greet() {}\n";
        let range = Range {
            start: Position {
                line: 1,
                character: 0,
            },
            end: Position {
                line: 1,
                character: 19,
            },
        };

        let position = position_in_range(text, range, "greet");
        assert_eq!(position.line, 1);
        assert_eq!(position.character, 9);
    }

    #[test]
    fn test_flat_position_falls_back_to_range_start() {
        let text = "line one\nline two\n";
        let range = Range {
            start: Position {
                line: 0,
                character: 3,
            },
            end: Position {
                line: 1,
                character: 0,
            },
        };

        let position = position_in_range(text, range, "missing_name");
        assert_eq!(position, range.start);
    }
}
