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

//! Configuration loading and server routing.
//!
//! The configuration is a JSON file with a single top-level `servers` list.
//! It is loaded from `CCLSP_CONFIG_PATH` when set, else from the path given
//! on the command line; a missing or non-JSON file is fatal.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable that overrides the configuration path.
pub const CONFIG_PATH_ENV: &str = "CCLSP_CONFIG_PATH";

/// Directories never descended into during the preload scan, on top of
/// `.gitignore`.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    "__pycache__",
    ".venv",
];

/// Top-level configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Ordered server definitions. Order is the tiebreaker when several
    /// servers claim the same file.
    pub servers: Vec<ServerConfig>,
}

/// One language server definition.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// File extensions (without dot) this server handles.
    pub extensions: Vec<String>,
    /// Command and arguments used to spawn the server.
    pub command: Vec<String>,
    /// Working directory for the server and root of its workspace. When
    /// relative, resolved against the current directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<String>,
    /// Restart the server every this many minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_interval: Option<f64>,
    /// Opaque `initializationOptions` passed through to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<serde_json::Value>,
}

impl ServerConfig {
    /// Stable identity of this config: its exact serialized form. The live
    /// peer map and single-flight start map are keyed by this.
    #[must_use]
    pub fn key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.command.join(" "))
    }

    /// The server's root directory resolved to an absolute path, defaulting
    /// to the current directory.
    #[must_use]
    pub fn resolved_root(&self) -> PathBuf {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.root_dir
            .as_ref()
            .map_or_else(|| cwd.clone(), |root| absolutize(Path::new(root), &cwd))
    }

    /// Whether this server claims the given extension.
    #[must_use]
    pub fn handles_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }
}

impl Config {
    /// Loads configuration. `CCLSP_CONFIG_PATH` wins over `explicit_file`;
    /// both are fatal if the file is missing or not valid JSON, and it is
    /// fatal if neither is provided.
    ///
    /// # Errors
    ///
    /// Returns an error when no path is available or the file fails to load
    /// or deserialize.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map_or_else(
            || explicit_file.map(Path::to_path_buf),
            |env_path| Some(PathBuf::from(env_path)),
        );

        let path = path.ok_or_else(|| {
            anyhow!("no configuration file: set {CONFIG_PATH_ENV} or pass --config")
        })?;

        debug!("Loading configuration from {}", path.display());

        let loaded = config::Config::builder()
            .add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Json)
                    .required(true),
            )
            .build()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        loaded
            .try_deserialize()
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Picks the server for a file path: among servers claiming the file's
    /// extension, the one whose `rootDir` is the deepest prefix of the
    /// (absolute) path wins; servers whose root does not contain the file
    /// lose to ones that do; with no containing root, the first extension
    /// match in list order wins. No extension match yields `None`.
    #[must_use]
    pub fn server_for_path(&self, path: &Path) -> Option<&ServerConfig> {
        let ext = path.extension()?.to_str()?;
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let abs = absolutize(path, &cwd);

        let mut first_match = None;
        let mut best: Option<(&ServerConfig, usize)> = None;

        for server in self.servers.iter().filter(|s| s.handles_extension(ext)) {
            if first_match.is_none() {
                first_match = Some(server);
            }

            if let Some(root) = &server.root_dir {
                let root = absolutize(Path::new(root), &cwd);
                if abs.starts_with(&root) {
                    let depth = root.components().count();
                    // Strict > keeps list order as the tiebreaker.
                    if best.is_none_or(|(_, d)| depth > d) {
                        best = Some((server, depth));
                    }
                }
            }
        }

        best.map(|(server, _)| server).or(first_match)
    }

    /// All distinct configs claiming at least one of the given extensions,
    /// in list order.
    #[must_use]
    pub fn servers_for_extensions(&self, extensions: &BTreeSet<String>) -> Vec<&ServerConfig> {
        let mut seen = BTreeSet::new();
        self.servers
            .iter()
            .filter(|s| extensions.iter().any(|e| s.handles_extension(e)))
            .filter(|s| seen.insert(s.key()))
            .collect()
    }
}

/// Scans a project root for file extensions, obeying `.gitignore` plus a
/// built-in ignore list, descending at most `max_depth` levels.
#[must_use]
pub fn scan_extensions(root: &Path, max_depth: usize) -> BTreeSet<String> {
    let mut extensions = BTreeSet::new();

    let walk = WalkBuilder::new(root)
        .max_depth(Some(max_depth))
        .hidden(true)
        .git_ignore(true)
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .is_none_or(|name| !IGNORED_DIRS.contains(&name))
        })
        .build();

    for entry in walk.flatten() {
        if entry.file_type().is_some_and(|t| t.is_file())
            && let Some(ext) = entry.path().extension().and_then(|e| e.to_str())
        {
            extensions.insert(ext.to_string());
        }
    }

    extensions
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
