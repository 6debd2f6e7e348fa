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

//! Live-peer supervision.
//!
//! Owns every running peer, keyed by the exact serialized config. Concurrent
//! demands for the same config collapse into one start attempt; a peer whose
//! process died is evicted on the next lookup and started fresh. Optional
//! per-config restart timers cycle long-running servers.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::client::LspPeer;
use crate::config::{Config, ServerConfig};
use crate::error::Error;

/// Floor for `restartInterval`, in minutes. Keeps test intervals sane while
/// preventing zero-length restart loops.
const MIN_RESTART_INTERVAL_MINUTES: f64 = 0.1;

type StartResult = Result<Arc<LspPeer>, String>;
type StartReceiver = watch::Receiver<Option<StartResult>>;

/// Outcome of a restart request.
#[derive(Debug)]
pub struct RestartOutcome {
    /// Whether at least one server restarted and none failed.
    pub success: bool,
    /// Commands of the servers that restarted.
    pub restarted: Vec<String>,
    /// Commands of the servers that failed to restart.
    pub failed: Vec<String>,
    /// Human-readable summary.
    pub message: String,
}

/// Supervises all live LSP peers.
pub struct ServerManager {
    config: Config,
    peers: Mutex<HashMap<String, Arc<LspPeer>>>,
    starting: Mutex<HashMap<String, StartReceiver>>,
    restart_timers: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
}

enum Claim {
    Wait(StartReceiver),
    Start(watch::Sender<Option<StartResult>>),
}

/// Clears a single-flight claim if the starter is dropped mid-start, so
/// waiters are not stranded on a channel that will never report.
struct StartClaim {
    manager: Arc<ServerManager>,
    key: String,
    armed: bool,
}

impl StartClaim {
    async fn release(mut self) {
        self.manager.starting.lock().await.remove(&self.key);
        self.armed = false;
    }
}

impl Drop for StartClaim {
    fn drop(&mut self) {
        if self.armed
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let manager = self.manager.clone();
            let key = std::mem::take(&mut self.key);
            handle.spawn(async move {
                manager.starting.lock().await.remove(&key);
            });
        }
    }
}

impl ServerManager {
    /// Creates a manager for the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            peers: Mutex::new(HashMap::new()),
            starting: Mutex::new(HashMap::new()),
            restart_timers: Mutex::new(HashMap::new()),
        })
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves the peer responsible for a file path, starting it on demand.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoServerForExtension`] when no config claims the
    /// path's extension, or a start failure.
    pub async fn server_for_path(self: &Arc<Self>, path: &Path) -> Result<Arc<LspPeer>, Error> {
        let config = self.config.server_for_path(path).ok_or_else(|| {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_string();
            Error::NoServerForExtension(ext)
        })?;

        self.get_server(&config.clone()).await
    }

    /// Returns the live peer for a config, starting one if needed.
    /// Concurrent callers for the same config share a single start attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] (or the handshake failure) when the server
    /// cannot be started.
    pub async fn get_server(
        self: &Arc<Self>,
        config: &ServerConfig,
    ) -> Result<Arc<LspPeer>, Error> {
        let key = config.key();

        loop {
            let claim = {
                let mut peers = self.peers.lock().await;
                if let Some(peer) = peers.get(&key) {
                    if peer.is_alive() {
                        return Ok(peer.clone());
                    }
                    warn!(
                        "Server '{}' is no longer running; evicting",
                        config.command.join(" ")
                    );
                    peers.remove(&key);
                }
                drop(peers);

                let mut starting = self.starting.lock().await;
                match starting.get(&key) {
                    Some(rx) => Claim::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        starting.insert(key.clone(), rx);
                        Claim::Start(tx)
                    }
                }
            };

            match claim {
                Claim::Wait(mut rx) => {
                    if rx.changed().await.is_err() {
                        // Starter vanished without reporting; retry.
                        continue;
                    }
                    let outcome = rx.borrow().clone();
                    match outcome {
                        Some(Ok(peer)) => return Ok(peer),
                        Some(Err(message)) => {
                            return Err(Error::Spawn {
                                command: config.command.join(" "),
                                message,
                            });
                        }
                        None => continue,
                    }
                }
                Claim::Start(tx) => {
                    let claim = StartClaim {
                        manager: self.clone(),
                        key: key.clone(),
                        armed: true,
                    };

                    info!("Starting LSP server: {}", config.command.join(" "));
                    let result = LspPeer::start(config.clone()).await;

                    match result {
                        Ok(peer) => {
                            self.peers.lock().await.insert(key.clone(), peer.clone());
                            claim.release().await;
                            self.arm_restart_timer(config).await;
                            let _ = tx.send(Some(Ok(peer.clone())));
                            return Ok(peer);
                        }
                        Err(e) => {
                            claim.release().await;
                            let _ = tx.send(Some(Err(e.to_string())));
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Arms (or re-arms) the restart timer for a config, when one is
    /// configured.
    async fn arm_restart_timer(self: &Arc<Self>, config: &ServerConfig) {
        let Some(minutes) = config.restart_interval else {
            return;
        };

        let minutes = minutes.max(MIN_RESTART_INTERVAL_MINUTES);
        let interval = Duration::from_secs_f64(minutes * 60.0);
        let key = config.key();
        let config = config.clone();
        let manager = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                info!(
                    "Restart interval elapsed for '{}'",
                    config.command.join(" ")
                );
                if let Err(e) = manager.restart_config_boxed(&config).await {
                    warn!("Timed restart failed: {}", e);
                }
            }
        });

        if let Some(old) = self.restart_timers.lock().await.insert(key, handle) {
            old.abort();
        }
    }

    /// Kills the peer for a config and starts a fresh one. Pending requests
    /// on the old peer reject on its exit.
    ///
    /// # Errors
    ///
    /// Propagates the start failure of the replacement peer.
    pub async fn restart_config(self: &Arc<Self>, config: &ServerConfig) -> Result<(), Error> {
        let key = config.key();

        if let Some(old) = self.peers.lock().await.remove(&key) {
            debug!("Terminating '{}' for restart", config.command.join(" "));
            old.terminate();
        }

        self.get_server(config).await.map(|_| ())
    }

    /// Type-erased wrapper around [`Self::restart_config`] used from the
    /// restart-timer task. Without this, the mutual recursion between
    /// `get_server`, `arm_restart_timer`, and `restart_config` makes the
    /// compiler unable to prove the spawned future is `Send`.
    fn restart_config_boxed<'a>(
        self: &'a Arc<Self>,
        config: &'a ServerConfig,
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>> {
        Box::pin(self.restart_config(config))
    }

    /// Restarts every running peer whose config claims one of the given
    /// extensions, or every running peer when `extensions` is `None`.
    pub async fn restart_servers(
        self: &Arc<Self>,
        extensions: Option<&[String]>,
    ) -> RestartOutcome {
        let snapshot: Vec<ServerConfig> = {
            let peers = self.peers.lock().await;
            peers.values().map(|p| p.config().clone()).collect()
        };

        if snapshot.is_empty() {
            return RestartOutcome {
                success: false,
                restarted: Vec::new(),
                failed: Vec::new(),
                message: "no servers running".to_string(),
            };
        }

        let candidates: Vec<ServerConfig> = snapshot
            .into_iter()
            .filter(|config| {
                extensions.is_none_or(|exts| {
                    exts.iter().any(|ext| config.handles_extension(ext))
                })
            })
            .collect();

        if candidates.is_empty() {
            return RestartOutcome {
                success: false,
                restarted: Vec::new(),
                failed: Vec::new(),
                message: "no running servers match the given extensions".to_string(),
            };
        }

        let mut restarted = Vec::new();
        let mut failed = Vec::new();

        for config in candidates {
            let command = config.command.join(" ");
            match self.restart_config(&config).await {
                Ok(()) => restarted.push(command),
                Err(e) => {
                    warn!("Restart of '{}' failed: {}", command, e);
                    failed.push(command);
                }
            }
        }

        let message = if failed.is_empty() {
            format!("restarted {} server(s)", restarted.len())
        } else {
            format!(
                "restarted {} server(s); {} failed",
                restarted.len(),
                failed.len()
            )
        };

        RestartOutcome {
            success: failed.is_empty(),
            restarted,
            failed,
            message,
        }
    }

    /// Snapshot of currently live peers.
    pub async fn running_peers(&self) -> Vec<Arc<LspPeer>> {
        self.peers
            .lock()
            .await
            .values()
            .filter(|p| p.is_alive())
            .cloned()
            .collect()
    }

    /// Clears restart timers, terminates every peer, and empties the maps.
    pub async fn dispose(&self) {
        for (_, handle) in self.restart_timers.lock().await.drain() {
            handle.abort();
        }

        self.starting.lock().await.clear();

        let mut peers = self.peers.lock().await;
        for (_, peer) in peers.drain() {
            info!("Terminating '{}'", peer.config().command.join(" "));
            peer.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_interval(minutes: Option<f64>) -> ServerConfig {
        ServerConfig {
            extensions: vec!["rs".to_string()],
            command: vec!["rust-analyzer".to_string()],
            root_dir: None,
            restart_interval: minutes,
            initialization_options: None,
        }
    }

    #[tokio::test]
    async fn test_restart_with_no_servers_running() {
        let manager = ServerManager::new(Config {
            servers: vec![config_with_interval(None)],
        });

        let outcome = manager.restart_servers(Some(&[])).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "no servers running");
        assert!(outcome.restarted.is_empty());
    }

    #[tokio::test]
    async fn test_server_for_path_unknown_extension() {
        let manager = ServerManager::new(Config {
            servers: vec![config_with_interval(None)],
        });

        let result = manager.server_for_path(Path::new("/tmp/a.zig")).await;
        assert!(matches!(result, Err(Error::NoServerForExtension(ext)) if ext == "zig"));
    }

    #[tokio::test]
    async fn test_get_server_spawn_failure_reported() {
        let manager = ServerManager::new(Config { servers: vec![] });
        let config = ServerConfig {
            extensions: vec!["rs".to_string()],
            command: vec!["/nonexistent/never-a-binary".to_string()],
            root_dir: None,
            restart_interval: None,
            initialization_options: None,
        };

        let result = manager.get_server(&config).await;
        assert!(matches!(result, Err(Error::Spawn { .. })));

        // The failed start must not leave a stale single-flight entry.
        let result = manager.get_server(&config).await;
        assert!(matches!(result, Err(Error::Spawn { .. })));
    }
}
