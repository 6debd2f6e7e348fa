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

//! Workspace-edit normalization and application.
//!
//! The two LSP reply shapes (`changes` and `documentChanges`) collapse into
//! one canonical `uri → edits` form before anything touches the filesystem.
//! Every range is validated against the current file text and overlapping
//! edits are rejected; validation failure writes nothing. Writes go through
//! a temp file and rename onto the symlink-resolved target, so a symlink
//! node is never replaced by a regular file. On partial failure, files
//! already written are restored from their pre-images.

use std::path::{Path, PathBuf};

use lsp_types::{
    DocumentChangeOperation, DocumentChanges, OneOf, Position, TextEdit, Uri, WorkspaceEdit,
};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Error;
use crate::lsp::uri_to_path;

/// Options controlling edit application.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Write a `.bak` sidecar of each target's pre-edit contents.
    pub create_backups: bool,
}

/// Successful application report.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Files whose contents changed (user-facing paths, pre-resolution).
    pub files_modified: Vec<PathBuf>,
    /// Backup sidecars written, when backups were requested.
    pub backup_files: Vec<PathBuf>,
}

/// Collapses a workspace edit into `(uri, edits)` pairs sorted by URI.
/// Per-URI edit order is preserved; edits for the same URI across multiple
/// document changes are concatenated. Resource operations (create, rename,
/// delete) are skipped with a warning. Anything else means "no edits".
#[must_use]
pub fn normalize_workspace_edit(edit: &WorkspaceEdit) -> Vec<(Uri, Vec<TextEdit>)> {
    let mut normalized: Vec<(Uri, Vec<TextEdit>)> = Vec::new();

    let mut push = |uri: &Uri, edits: Vec<TextEdit>| {
        if let Some((_, existing)) = normalized.iter_mut().find(|(u, _)| u == uri) {
            existing.extend(edits);
        } else {
            normalized.push((uri.clone(), edits));
        }
    };

    if let Some(changes) = &edit.changes {
        for (uri, edits) in changes {
            push(uri, edits.clone());
        }
    } else if let Some(document_changes) = &edit.document_changes {
        let text_edits = |edits: &[OneOf<TextEdit, lsp_types::AnnotatedTextEdit>]| {
            edits
                .iter()
                .map(|e| match e {
                    OneOf::Left(edit) => edit.clone(),
                    OneOf::Right(annotated) => annotated.text_edit.clone(),
                })
                .collect::<Vec<_>>()
        };

        match document_changes {
            DocumentChanges::Edits(edits) => {
                for change in edits {
                    push(&change.text_document.uri, text_edits(&change.edits));
                }
            }
            DocumentChanges::Operations(operations) => {
                for operation in operations {
                    match operation {
                        DocumentChangeOperation::Edit(change) => {
                            push(&change.text_document.uri, text_edits(&change.edits));
                        }
                        DocumentChangeOperation::Op(_) => {
                            warn!("Skipping resource operation in workspace edit");
                        }
                    }
                }
            }
        }
    }

    normalized.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
    normalized
}

/// Normalizes and applies a workspace edit.
///
/// # Errors
///
/// Returns [`Error::Validation`] before any write when a range is out of
/// bounds or edits overlap, and [`Error::Apply`] when a write fails (after
/// rolling back files already written).
pub async fn apply_workspace_edit(
    edit: &WorkspaceEdit,
    options: ApplyOptions,
) -> Result<ApplyReport, Error> {
    apply_normalized(&normalize_workspace_edit(edit), options).await
}

struct PlannedWrite {
    display_path: PathBuf,
    target: PathBuf,
    original: String,
    new_text: String,
}

/// Applies already-normalized changes. The empty edit set is a no-op.
///
/// # Errors
///
/// Same contract as [`apply_workspace_edit`].
pub async fn apply_normalized(
    changes: &[(Uri, Vec<TextEdit>)],
    options: ApplyOptions,
) -> Result<ApplyReport, Error> {
    // Plan and validate everything before the first write.
    let mut planned = Vec::new();
    for (uri, edits) in changes {
        if edits.is_empty() {
            continue;
        }

        let display_path = uri_to_path(uri).map_err(|e| Error::Validation(e.to_string()))?;
        let target = resolve_symlink_target(&display_path).await?;
        let original = fs::read_to_string(&target).await.map_err(|e| {
            Error::Validation(format!("cannot read {}: {e}", display_path.display()))
        })?;

        validate_edits(&original, edits)
            .map_err(|reason| Error::Validation(format!("{}: {reason}", display_path.display())))?;

        let new_text = splice_edits(&original, edits);
        planned.push(PlannedWrite {
            display_path,
            target,
            original,
            new_text,
        });
    }

    if planned.is_empty() {
        return Ok(ApplyReport::default());
    }

    let mut report = ApplyReport::default();
    let mut written: Vec<&PlannedWrite> = Vec::new();

    for plan in &planned {
        if options.create_backups {
            let backup = backup_path(&plan.target);
            if let Err(e) = fs::write(&backup, &plan.original).await {
                rollback(&written).await;
                return Err(Error::Apply(format!(
                    "cannot write backup {}: {e}; no files modified",
                    backup.display()
                )));
            }
            report.backup_files.push(backup);
        }

        if let Err(e) = write_atomic(&plan.target, &plan.new_text).await {
            rollback(&written).await;
            return Err(Error::Apply(format!(
                "cannot write {}: {e}; already-written files were restored",
                plan.target.display()
            )));
        }

        written.push(plan);
        report.files_modified.push(plan.display_path.clone());
    }

    Ok(report)
}

/// Restores pre-images of files written before a failure. Best effort.
async fn rollback(written: &[&PlannedWrite]) {
    for plan in written {
        debug!("Rolling back {}", plan.target.display());
        if let Err(e) = fs::write(&plan.target, &plan.original).await {
            warn!("Rollback of {} failed: {}", plan.target.display(), e);
        }
    }
}

/// Follows a symlink chain to the final target, keeping relative links
/// anchored at each link's parent directory.
async fn resolve_symlink_target(path: &Path) -> Result<PathBuf, Error> {
    let mut current = path.to_path_buf();

    for _ in 0..32 {
        let metadata = fs::symlink_metadata(&current).await.map_err(|e| {
            Error::Validation(format!("cannot stat {}: {e}", current.display()))
        })?;

        if !metadata.file_type().is_symlink() {
            return Ok(current);
        }

        let link = fs::read_link(&current).await.map_err(|e| {
            Error::Validation(format!("cannot readlink {}: {e}", current.display()))
        })?;
        current = if link.is_absolute() {
            link
        } else {
            current
                .parent()
                .map_or_else(|| link.clone(), |parent| parent.join(&link))
        };
    }

    Err(Error::Validation(format!(
        "too many levels of symlinks at {}",
        path.display()
    )))
}

/// Bounds- and overlap-checks the edits against the current text.
fn validate_edits(text: &str, edits: &[TextEdit]) -> Result<(), String> {
    let lines: Vec<&str> = text.split('\n').collect();

    let check_position = |position: Position, which: &str| -> Result<(), String> {
        let line = position.line as usize;
        let Some(line_text) = lines.get(line) else {
            return Err(format!(
                "{which} line {} is beyond the file's {} lines",
                position.line + 1,
                lines.len()
            ));
        };
        let line_chars = line_text.chars().count();
        if position.character as usize > line_chars {
            return Err(format!(
                "{which} column {} is beyond line {}'s {line_chars} characters",
                position.character + 1,
                position.line + 1
            ));
        }
        Ok(())
    };

    for edit in edits {
        check_position(edit.range.start, "start")?;
        check_position(edit.range.end, "end")?;
        if position_key(edit.range.start) > position_key(edit.range.end) {
            return Err("range start is after range end".to_string());
        }
    }

    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by_key(|e| position_key(e.range.start));
    for pair in ordered.windows(2) {
        if position_key(pair[0].range.end) > position_key(pair[1].range.start) {
            return Err("overlapping edits".to_string());
        }
    }

    Ok(())
}

/// Splices the edits into the text, descending so earlier offsets stay
/// valid.
fn splice_edits(text: &str, edits: &[TextEdit]) -> String {
    let mut ordered: Vec<&TextEdit> = edits.iter().collect();
    ordered.sort_by_key(|e| std::cmp::Reverse(position_key(e.range.start)));

    let mut result = text.to_string();
    for edit in ordered {
        let Some(start) = byte_offset(&result, edit.range.start) else {
            continue;
        };
        let Some(end) = byte_offset(&result, edit.range.end) else {
            continue;
        };
        result.replace_range(start..end, &edit.new_text);
    }
    result
}

const fn position_key(position: Position) -> (u32, u32) {
    (position.line, position.character)
}

/// Byte offset of a position, counting characters as Unicode scalars.
/// A column at or past the line's end maps to the line's end.
fn byte_offset(text: &str, position: Position) -> Option<usize> {
    let mut offset = 0usize;
    for (idx, line) in text.split('\n').enumerate() {
        if idx == position.line as usize {
            let column_bytes = line
                .char_indices()
                .nth(position.character as usize)
                .map_or(line.len(), |(byte, _)| byte);
            return Some(offset + column_bytes);
        }
        offset += line.len() + 1;
    }
    None
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().to_string());
    name.push_str(".bak");
    target.with_file_name(name)
}

/// Writes through a temp file and renames over the target.
async fn write_atomic(target: &Path, contents: &str) -> std::io::Result<()> {
    let name = target
        .file_name()
        .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().to_string());
    let temp = target.with_file_name(format!(".{name}.tmp{}", std::process::id()));

    fs::write(&temp, contents).await?;
    match fs::rename(&temp, target).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&temp).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::Range;
    use std::collections::HashMap;

    fn edit(start: (u32, u32), end: (u32, u32), new_text: &str) -> TextEdit {
        TextEdit {
            range: Range {
                start: Position {
                    line: start.0,
                    character: start.1,
                },
                end: Position {
                    line: end.0,
                    character: end.1,
                },
            },
            new_text: new_text.to_string(),
        }
    }

    fn uri_for(path: &Path) -> Uri {
        crate::lsp::path_to_uri(path).unwrap()
    }

    #[test]
    fn test_normalize_changes_and_document_changes_agree() {
        let uri: Uri = "file:///tmp/a.ts".parse().unwrap();
        let edits = vec![edit((0, 0), (0, 3), "new")];

        let mut changes = HashMap::new();
        changes.insert(uri.clone(), edits.clone());
        let from_changes = normalize_workspace_edit(&WorkspaceEdit {
            changes: Some(changes),
            document_changes: None,
            change_annotations: None,
        });

        let from_document_changes = normalize_workspace_edit(&WorkspaceEdit {
            changes: None,
            document_changes: Some(DocumentChanges::Edits(vec![lsp_types::TextDocumentEdit {
                text_document: lsp_types::OptionalVersionedTextDocumentIdentifier {
                    uri: uri.clone(),
                    version: Some(3),
                },
                edits: edits.iter().cloned().map(OneOf::Left).collect(),
            }])),
            change_annotations: None,
        });

        assert_eq!(from_changes.len(), 1);
        assert_eq!(from_changes[0].0, uri);
        assert_eq!(from_changes[0].1, from_document_changes[0].1);
    }

    #[test]
    fn test_normalize_concatenates_same_uri() {
        let uri: Uri = "file:///tmp/a.ts".parse().unwrap();
        let first = edit((0, 0), (0, 1), "x");
        let second = edit((1, 0), (1, 1), "y");

        let normalized = normalize_workspace_edit(&WorkspaceEdit {
            changes: None,
            document_changes: Some(DocumentChanges::Edits(vec![
                lsp_types::TextDocumentEdit {
                    text_document: lsp_types::OptionalVersionedTextDocumentIdentifier {
                        uri: uri.clone(),
                        version: None,
                    },
                    edits: vec![OneOf::Left(first.clone())],
                },
                lsp_types::TextDocumentEdit {
                    text_document: lsp_types::OptionalVersionedTextDocumentIdentifier {
                        uri: uri.clone(),
                        version: None,
                    },
                    edits: vec![OneOf::Left(second.clone())],
                },
            ])),
            change_annotations: None,
        });

        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].1, vec![first, second]);
    }

    #[test]
    fn test_normalize_empty_edit() {
        let normalized = normalize_workspace_edit(&WorkspaceEdit::default());
        assert!(normalized.is_empty());
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let text = "short\nlines\n";
        assert!(validate_edits(text, &[edit((0, 0), (0, 5), "x")]).is_ok());
        assert!(validate_edits(text, &[edit((9, 0), (9, 1), "x")]).is_err());
        assert!(validate_edits(text, &[edit((0, 0), (0, 99), "x")]).is_err());
        assert!(validate_edits(text, &[edit((0, 3), (0, 1), "x")]).is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_allows_touching() {
        let text = "abcdefgh\n";
        let overlapping = [edit((0, 0), (0, 4), "x"), edit((0, 2), (0, 6), "y")];
        assert!(validate_edits(text, &overlapping).is_err());

        let touching = [edit((0, 0), (0, 4), "x"), edit((0, 4), (0, 6), "y")];
        assert!(validate_edits(text, &touching).is_ok());
    }

    #[test]
    fn test_splice_applies_descending() {
        let text = "let aa = aa + aa;";
        let edits = [
            edit((0, 4), (0, 6), "zz"),
            edit((0, 9), (0, 11), "zz"),
            edit((0, 14), (0, 16), "zz"),
        ];
        assert_eq!(splice_edits(text, &edits), "let zz = zz + zz;");
    }

    #[test]
    fn test_splice_multiline() {
        let text = "one\ntwo\nthree\n";
        let edits = [edit((1, 0), (2, 5), "TWO\nTHREE")];
        assert_eq!(splice_edits(text, &edits), "one\nTWO\nTHREE\n");
    }

    #[tokio::test]
    async fn test_apply_empty_set_is_noop() {
        let report = apply_normalized(&[], ApplyOptions::default()).await.unwrap();
        assert!(report.files_modified.is_empty());
        assert!(report.backup_files.is_empty());
    }

    #[tokio::test]
    async fn test_apply_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ts");
        std::fs::write(&path, "const oldName = 42;\n").unwrap();

        let changes = vec![(uri_for(&path), vec![edit((0, 6), (0, 13), "newName")])];
        let report = apply_normalized(&changes, ApplyOptions::default())
            .await
            .unwrap();

        assert_eq!(report.files_modified, vec![path.clone()]);
        assert!(report.backup_files.is_empty());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "const newName = 42;\n"
        );
    }

    #[tokio::test]
    async fn test_validation_failure_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.ts");
        let bad = dir.path().join("bad.ts");
        std::fs::write(&good, "fine\n").unwrap();
        std::fs::write(&bad, "tiny\n").unwrap();

        let changes = vec![
            (uri_for(&good), vec![edit((0, 0), (0, 4), "FINE")]),
            (uri_for(&bad), vec![edit((5, 0), (5, 1), "x")]),
        ];

        let result = apply_normalized(&changes, ApplyOptions::default()).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(std::fs::read_to_string(&good).unwrap(), "fine\n");
        assert_eq!(std::fs::read_to_string(&bad).unwrap(), "tiny\n");
    }

    #[tokio::test]
    async fn test_backups_written_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ts");
        std::fs::write(&path, "before\n").unwrap();

        let changes = vec![(uri_for(&path), vec![edit((0, 0), (0, 6), "after")])];
        let report = apply_normalized(
            &changes,
            ApplyOptions {
                create_backups: true,
            },
        )
        .await
        .unwrap();

        assert_eq!(report.backup_files.len(), 1);
        let backup = &report.backup_files[0];
        assert!(backup.to_string_lossy().ends_with("a.ts.bak"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "before\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "after\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_preserved_and_target_updated() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.ts");
        let link = dir.path().join("link.ts");
        std::fs::write(&target, "const oldName = 42;\n").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let changes = vec![(uri_for(&link), vec![edit((0, 6), (0, 13), "newName")])];
        let report = apply_normalized(&changes, ApplyOptions::default())
            .await
            .unwrap();

        // The caller sees the path it supplied.
        assert_eq!(report.files_modified, vec![link.clone()]);

        let metadata = std::fs::symlink_metadata(&link).unwrap();
        assert!(metadata.file_type().is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), target);
        assert_eq!(
            std::fs::read_to_string(&link).unwrap(),
            "const newName = 42;\n"
        );
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "const newName = 42;\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_chain_resolves_to_final_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.ts");
        let middle = dir.path().join("middle.ts");
        let link = dir.path().join("link.ts");
        std::fs::write(&target, "x\n").unwrap();
        std::os::unix::fs::symlink(&target, &middle).unwrap();
        std::os::unix::fs::symlink(&middle, &link).unwrap();

        let resolved = resolve_symlink_target(&link).await.unwrap();
        assert_eq!(resolved, target);
    }
}
