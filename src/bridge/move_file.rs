// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! File-move orchestration.
//!
//! Moving a source file means asking every matching live peer for the import
//! edits it would make (`workspace/willRenameFiles`), applying the merged
//! plan, renaming the file on disk, and telling the peers it happened
//! (`workspace/didRenameFiles`). If applying the plan fails, the file is not
//! moved. Dry runs report the plan without touching the filesystem.

use std::path::{Path, PathBuf};

use lsp_types::{TextEdit, Uri, WorkspaceEdit};
use tokio::fs;
use tracing::{debug, warn};

use super::edits::{ApplyOptions, apply_normalized, normalize_workspace_edit};
use super::operations::CodeIntel;
use crate::error::Error;
use crate::lsp::path_to_uri;

/// Result of a move request.
#[derive(Debug, Default)]
pub struct MoveOutcome {
    /// Whether the file was actually renamed on disk.
    pub moved: bool,
    /// The merged import-edit plan, by URI.
    pub edit_plan: Vec<(Uri, Vec<TextEdit>)>,
    /// Files rewritten by the plan (empty for dry runs).
    pub changed_files: Vec<PathBuf>,
    /// Per-peer warnings collected along the way.
    pub warnings: Vec<String>,
}

impl CodeIntel {
    /// Moves `source` to `destination`, updating imports through the peers
    /// that support file-operation notifications.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MoveValidation`] before any side effect when the
    /// source is missing or a directory, or the destination exists;
    /// propagates edit-application failures (the file is not moved in that
    /// case).
    pub async fn move_file(
        &self,
        source: &Path,
        destination: &Path,
        dry_run: bool,
        options: ApplyOptions,
    ) -> Result<MoveOutcome, Error> {
        let metadata = fs::metadata(source).await.map_err(|_| {
            Error::MoveValidation(format!("source does not exist: {}", source.display()))
        })?;
        if metadata.is_dir() {
            return Err(Error::MoveValidation(format!(
                "source is a directory: {}",
                source.display()
            )));
        }
        if fs::try_exists(destination).await.unwrap_or(false) {
            return Err(Error::MoveValidation(format!(
                "destination already exists: {}",
                destination.display()
            )));
        }

        let old_uri =
            path_to_uri(source).map_err(|e| Error::MoveValidation(e.to_string()))?;
        let new_uri =
            path_to_uri(destination).map_err(|e| Error::MoveValidation(e.to_string()))?;
        let rename_params = serde_json::json!({
            "files": [{ "oldUri": old_uri, "newUri": new_uri }]
        });

        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let peers: Vec<_> = self
            .manager()
            .running_peers()
            .await
            .into_iter()
            .filter(|p| p.config().handles_extension(extension))
            .collect();

        let mut outcome = MoveOutcome::default();

        for peer in &peers {
            let command = peer.config().command.join(" ");
            if !peer.supports_will_rename() {
                outcome.warnings.push(format!(
                    "server '{command}' does not support willRenameFiles"
                ));
                continue;
            }

            match peer
                .request("workspace/willRenameFiles", rename_params.clone())
                .await
            {
                Ok(value) => {
                    match serde_json::from_value::<Option<WorkspaceEdit>>(value) {
                        Ok(Some(edit)) => {
                            merge_plan(&mut outcome.edit_plan, normalize_workspace_edit(&edit));
                        }
                        Ok(None) => debug!("'{}' returned no import edits", command),
                        Err(e) => outcome
                            .warnings
                            .push(format!("failed to get import updates: {e}")),
                    }
                }
                Err(e) => outcome
                    .warnings
                    .push(format!("failed to get import updates: {e}")),
            }
        }

        if dry_run {
            return Ok(outcome);
        }

        // Apply first; a failed apply leaves the file where it was.
        let report = apply_normalized(&outcome.edit_plan, options).await?;
        outcome.changed_files = report.files_modified;

        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::Apply(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        fs::rename(source, destination).await.map_err(|e| {
            Error::Apply(format!(
                "cannot rename {} to {}: {e}",
                source.display(),
                destination.display()
            ))
        })?;
        outcome.moved = true;

        for peer in &peers {
            if peer.supports_did_rename()
                && let Err(e) = peer
                    .notify("workspace/didRenameFiles", rename_params.clone())
                    .await
            {
                warn!(
                    "didRenameFiles to '{}' failed: {}",
                    peer.config().command.join(" "),
                    e
                );
            }
        }

        Ok(outcome)
    }
}

/// Merges normalized changes into the running plan, concatenating edits for
/// URIs already present.
fn merge_plan(plan: &mut Vec<(Uri, Vec<TextEdit>)>, additions: Vec<(Uri, Vec<TextEdit>)>) {
    for (uri, edits) in additions {
        if let Some((_, existing)) = plan.iter_mut().find(|(u, _)| *u == uri) {
            existing.extend(edits);
        } else {
            plan.push((uri, edits));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{Position, Range};

    fn edit(line: u32, text: &str) -> TextEdit {
        TextEdit {
            range: Range {
                start: Position { line, character: 0 },
                end: Position { line, character: 1 },
            },
            new_text: text.to_string(),
        }
    }

    #[test]
    fn test_merge_plan_concatenates_per_uri() {
        let a: Uri = "file:///a.ts".parse().unwrap();
        let b: Uri = "file:///b.ts".parse().unwrap();

        let mut plan = vec![(a.clone(), vec![edit(0, "x")])];
        merge_plan(
            &mut plan,
            vec![(a.clone(), vec![edit(1, "y")]), (b.clone(), vec![edit(2, "z")])],
        );

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].1.len(), 2);
        assert_eq!(plan[1].0, b);
    }
}
