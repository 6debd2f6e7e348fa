// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-URI diagnostics cache with idle detection.
//!
//! Each `publishDiagnostics` replaces the cached items for its URI and stamps
//! the entry. [`DiagnosticsCache::wait_for_idle`] polls that stamp to detect
//! a quiescent server, substituting for a missing pull method. Entries never
//! expire; they are replaced by the next publish.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lsp_types::{Diagnostic, Uri};
use tokio::sync::Mutex;
use tracing::trace;

/// Tuning knobs for [`DiagnosticsCache::wait_for_idle`].
#[derive(Debug, Clone, Copy)]
pub struct IdleWait {
    /// Unconditional upper bound on the wait.
    pub max_wait: Duration,
    /// Quiescent period that counts as idle.
    pub idle_gap: Duration,
    /// Polling interval.
    pub poll: Duration,
}

impl Default for IdleWait {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(5),
            idle_gap: Duration::from_millis(300),
            poll: Duration::from_millis(50),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    items: Vec<Diagnostic>,
    last_update: Instant,
    version: Option<i32>,
}

/// Latest published diagnostics per URI for one peer.
#[derive(Debug, Default)]
pub struct DiagnosticsCache {
    entries: Mutex<HashMap<Uri, CacheEntry>>,
}

impl DiagnosticsCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached items for a URI and stamps the update time.
    pub async fn update(&self, uri: Uri, items: Vec<Diagnostic>, version: Option<i32>) {
        trace!("Caching {} diagnostics for {}", items.len(), uri.as_str());
        self.entries.lock().await.insert(
            uri,
            CacheEntry {
                items,
                last_update: Instant::now(),
                version,
            },
        );
    }

    /// Returns the cached items, or `None` when nothing has been published
    /// for the URI yet.
    pub async fn get(&self, uri: &Uri) -> Option<Vec<Diagnostic>> {
        self.entries.lock().await.get(uri).map(|e| e.items.clone())
    }

    /// The version recorded with the latest publish, if any.
    pub async fn version(&self, uri: &Uri) -> Option<i32> {
        self.entries.lock().await.get(uri).and_then(|e| e.version)
    }

    /// Waits until the URI's entry has been quiet for `idle_gap`, or until
    /// `max_wait` elapses. A publish (version change or restamp) resets the
    /// idle timer. Resolves unconditionally at `max_wait`.
    pub async fn wait_for_idle(&self, uri: &Uri, wait: IdleWait) {
        let started = Instant::now();

        loop {
            if started.elapsed() >= wait.max_wait {
                return;
            }

            let idle = {
                let entries = self.entries.lock().await;
                entries
                    .get(uri)
                    .is_some_and(|e| e.last_update.elapsed() >= wait.idle_gap)
            };

            if idle {
                return;
            }

            tokio::time::sleep(wait.poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{DiagnosticSeverity, Position, Range};

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    fn diagnostic(message: &str) -> Diagnostic {
        Diagnostic {
            range: Range {
                start: Position {
                    line: 0,
                    character: 0,
                },
                end: Position {
                    line: 0,
                    character: 4,
                },
            },
            severity: Some(DiagnosticSeverity::ERROR),
            message: message.to_string(),
            ..Diagnostic::default()
        }
    }

    #[tokio::test]
    async fn test_get_before_publish_is_none() {
        let cache = DiagnosticsCache::new();
        assert!(cache.get(&uri("file:///a.rs")).await.is_none());
    }

    #[tokio::test]
    async fn test_update_replaces_items() {
        let cache = DiagnosticsCache::new();
        let u = uri("file:///a.rs");

        cache
            .update(u.clone(), vec![diagnostic("first")], Some(1))
            .await;
        cache
            .update(u.clone(), vec![diagnostic("second")], Some(2))
            .await;

        let items = cache.get(&u).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].message, "second");
        assert_eq!(cache.version(&u).await, Some(2));
    }

    #[tokio::test]
    async fn test_empty_publish_is_cached_not_absent() {
        let cache = DiagnosticsCache::new();
        let u = uri("file:///a.rs");

        cache.update(u.clone(), Vec::new(), None).await;
        assert_eq!(cache.get(&u).await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_wait_for_idle_resolves_after_gap() {
        let cache = DiagnosticsCache::new();
        let u = uri("file:///a.rs");
        cache.update(u.clone(), vec![diagnostic("x")], None).await;

        let wait = IdleWait {
            max_wait: Duration::from_secs(5),
            idle_gap: Duration::from_millis(100),
            poll: Duration::from_millis(10),
        };

        let started = Instant::now();
        cache.wait_for_idle(&u, wait).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_for_idle_caps_at_max_wait() {
        let cache = DiagnosticsCache::new();
        let u = uri("file:///never-published.rs");

        let wait = IdleWait {
            max_wait: Duration::from_millis(300),
            idle_gap: Duration::from_millis(100),
            poll: Duration::from_millis(10),
        };

        let started = Instant::now();
        cache.wait_for_idle(&u, wait).await;
        assert!(started.elapsed() >= Duration::from_millis(300));
    }
}
