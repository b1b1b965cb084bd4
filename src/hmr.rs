//! Hot module reload for development.
//!
//! [`HmrManager`] watches the project with `notify`, filters and debounces
//! the raw file events, and fans them out twice: as [`HmrEvent`]s to the
//! server (which clears the compile cache and rescans routes) and as
//! server-sent events to every browser connected to the `/__hmr` endpoint.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use trellis_core::{ByteStream, Error, HttpResponse, Result, ServerSentEvent};

/// Default path of the server-sent events endpoint.
pub const DEFAULT_HMR_ENDPOINT: &str = "/__hmr";

/// Interval between keep-alive comments on idle client connections.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HmrConfig {
    /// Off unless development mode turns it on.
    pub enabled: bool,
    /// Watched directories; relative paths are resolved against the project root.
    pub watch_paths: Vec<PathBuf>,
    pub watch_extensions: Vec<String>,
    /// Paths containing any of these are ignored.
    pub ignore_patterns: Vec<String>,
    /// Events for the same path closer together than this are dropped.
    pub debounce_ms: u64,
    pub endpoint: String,
}

impl Default for HmrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            watch_paths: vec![PathBuf::from("pages"), PathBuf::from("src")],
            watch_extensions: ["js", "jsx", "ts", "tsx", "mjs", "css", "json"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            ignore_patterns: ["node_modules", ".git", "target", "dist"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            debounce_ms: 100,
            endpoint: DEFAULT_HMR_ENDPOINT.to_string(),
        }
    }
}

impl HmrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn watch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch_paths.push(path.into());
        self
    }

    pub fn watch_extension(mut self, ext: impl Into<String>) -> Self {
        self.watch_extensions.push(ext.into());
        self
    }

    pub fn ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_patterns.push(pattern.into());
        self
    }

    pub fn debounce(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmrEventKind {
    Modified,
    Created,
    Deleted,
}

impl HmrEventKind {
    /// Whether the set of files changed, not just their contents.
    pub fn changes_routes(&self) -> bool {
        matches!(self, HmrEventKind::Created | HmrEventKind::Deleted)
    }
}

/// A filtered, debounced file change.
#[derive(Debug, Clone)]
pub struct HmrEvent {
    pub kind: HmrEventKind,
    pub path: PathBuf,
    pub extension: Option<String>,
    pub timestamp: SystemTime,
}

impl HmrEvent {
    pub fn is_style(&self) -> bool {
        self.extension.as_deref() == Some("css")
    }

    /// What connected browsers receive: stylesheet changes are swapped in
    /// place, anything else reloads the page.
    pub fn client_message(&self) -> ServerSentEvent {
        let path = self.path.to_string_lossy();
        if self.is_style() {
            ServerSentEvent::with_event("update", json!({ "kind": "style", "path": path }).to_string())
        } else {
            ServerSentEvent::with_event("reload", json!({ "path": path }).to_string())
        }
    }
}

/// Coordinates file watching and browser notifications.
#[derive(Clone)]
pub struct HmrManager {
    config: Arc<HmrConfig>,
    event_tx: broadcast::Sender<HmrEvent>,
    client_tx: broadcast::Sender<ServerSentEvent>,
    last_events: Arc<Mutex<HashMap<PathBuf, SystemTime>>>,
}

impl HmrManager {
    pub fn new(config: HmrConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (client_tx, _) = broadcast::channel(100);
        Self {
            config: Arc::new(config),
            event_tx,
            client_tx,
            last_events: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &HmrConfig {
        &self.config
    }

    /// Start the watcher on a background task. Relative watch paths are
    /// resolved against `root`; missing ones are skipped.
    pub fn start_watching(&self, root: &Path) -> Result<()> {
        if !self.config.enabled {
            debug!("Hot reload disabled");
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel(100);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!(error = %e, "File watcher error"),
            },
            Config::default().with_poll_interval(Duration::from_millis(self.config.debounce_ms)),
        )
        .map_err(|e| Error::Internal(format!("Failed to create watcher: {e}")))?;

        for path in &self.config.watch_paths {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            if !path.exists() {
                debug!(path = %path.display(), "Watch path not found");
                continue;
            }
            watcher
                .watch(&path, RecursiveMode::Recursive)
                .map_err(|e| Error::Internal(format!("Failed to watch {}: {e}", path.display())))?;
        }
        info!(paths = self.config.watch_paths.len(), "Hot reload watching for changes");

        let manager = self.clone();
        tokio::spawn(async move {
            // Keeps the watcher alive for as long as events flow.
            let _watcher = watcher;
            while let Some(event) = rx.recv().await {
                if let Some(hmr_event) = manager.process_event(event) {
                    debug!(kind = ?hmr_event.kind, path = %hmr_event.path.display(), "File changed");
                    let _ = manager.event_tx.send(hmr_event);
                }
            }
            error!("File watcher stopped");
        });
        Ok(())
    }

    /// Turn a raw watcher event into an [`HmrEvent`], or drop it when it is
    /// ignored, has an unwatched extension, or arrives within the debounce
    /// window of the previous event for the same path.
    pub fn process_event(&self, event: Event) -> Option<HmrEvent> {
        let kind = match event.kind {
            EventKind::Modify(_) => HmrEventKind::Modified,
            EventKind::Create(_) => HmrEventKind::Created,
            EventKind::Remove(_) => HmrEventKind::Deleted,
            _ => return None,
        };
        let path = event.paths.first()?.clone();
        if should_ignore(&path, &self.config.ignore_patterns) {
            return None;
        }
        let extension = path.extension()?.to_str()?.to_string();
        if !self.config.watch_extensions.contains(&extension) {
            return None;
        }

        let now = SystemTime::now();
        let mut last_events = self.last_events.lock();
        if let Some(last) = last_events.get(&path)
            && let Ok(elapsed) = now.duration_since(*last)
            && elapsed.as_millis() < u128::from(self.config.debounce_ms)
        {
            return None;
        }
        last_events.insert(path.clone(), now);

        Some(HmrEvent {
            kind,
            path,
            extension: Some(extension),
            timestamp: now,
        })
    }

    /// File changes, for the server.
    pub fn subscribe(&self) -> broadcast::Receiver<HmrEvent> {
        self.event_tx.subscribe()
    }

    /// Client messages, one receiver per browser connection.
    pub fn subscribe_clients(&self) -> broadcast::Receiver<ServerSentEvent> {
        self.client_tx.subscribe()
    }

    /// Tell every connected browser about a change. Returns how many were reached.
    pub fn notify_clients(&self, event: &HmrEvent) -> usize {
        self.client_tx.send(event.client_message()).unwrap_or(0)
    }

    pub fn client_count(&self) -> usize {
        self.client_tx.receiver_count()
    }

    /// A `text/event-stream` response that forwards client messages until
    /// the browser disconnects.
    pub fn sse_response(&self) -> HttpResponse {
        let (stream, sender) = ByteStream::new();
        let mut messages = self.subscribe_clients();
        tokio::spawn(async move {
            if sender.send_str(": connected\n\n").await.is_err() {
                return;
            }
            loop {
                let message = tokio::select! {
                    message = messages.recv() => message,
                    _ = tokio::time::sleep(KEEP_ALIVE) => {
                        if sender.send_str(": ping\n\n").await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                match message {
                    Ok(event) => {
                        if sender.send_event(&event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Hot reload client lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            sender.close().await;
        });

        HttpResponse::ok()
            .with_header("Content-Type", "text/event-stream")
            .with_header("Cache-Control", "no-cache")
            .with_header("Connection", "keep-alive")
            .with_stream(Box::pin(stream))
    }
}

fn should_ignore(path: &Path, ignore_patterns: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    ignore_patterns.iter().any(|pattern| path_str.contains(pattern.as_str()))
}
