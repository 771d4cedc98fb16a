// Plugin manager
//
// Plugins are declared by JSON manifests in a directory. A manifest lists the
// commands a plugin contributes; each command names the event the relay publishes
// when it runs. Sync reads the manifests and start activates them. An optional
// monitor publishes `plugin.reload` when the directory changes.

use crate::errors::PluginError;
use crate::events::{EventBus, EventType};
use crate::lifecycle::Subsystem;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginCommandSpec {
    pub cmd: String,
    pub desc: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Event published when the command runs
    pub event: EventType,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub commands: Vec<PluginCommandSpec>,
}

/// A command contributed by an active plugin
#[derive(Debug, Clone, PartialEq)]
pub struct PluginCommand {
    pub plugin_id: String,
    pub spec: PluginCommandSpec,
}

#[derive(Debug, Clone)]
struct PluginState {
    manifest: PluginManifest,
    active: bool,
}

type Fingerprint = Vec<(PathBuf, Option<SystemTime>, u64)>;

struct MonitorShared {
    shutdown_flag: AtomicBool,
    shutdown_notify: Notify,
}

pub struct PluginManager {
    manifest_dir: PathBuf,
    watch_interval: Option<Duration>,
    bus: Arc<EventBus>,
    plugins: RwLock<BTreeMap<String, PluginState>>,
    monitor_shared: Arc<MonitorShared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

fn is_manifest(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

async fn manifest_paths(dir: &Path) -> Result<Vec<PathBuf>, PluginError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Plugin manifest directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(PluginError::ManifestRead {
                path: dir.display().to_string(),
                reason: e.to_string(),
            })
        }
    };

    let mut paths = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if is_manifest(&path) {
                    paths.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => {
                return Err(PluginError::ManifestRead {
                    path: dir.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
    paths.sort();
    Ok(paths)
}

async fn read_manifest(path: &Path) -> Result<PluginManifest, PluginError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PluginError::ManifestRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    serde_json::from_str(&raw).map_err(|e| PluginError::ManifestParse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

async fn fingerprint(dir: &Path) -> Fingerprint {
    let paths = manifest_paths(dir).await.unwrap_or_default();
    let mut result = Vec::with_capacity(paths.len());
    for path in paths {
        let (modified, len) = match tokio::fs::metadata(&path).await {
            Ok(meta) => (meta.modified().ok(), meta.len()),
            Err(_) => (None, 0),
        };
        result.push((path, modified, len));
    }
    result
}

impl PluginManager {
    pub fn new(
        manifest_dir: impl Into<PathBuf>,
        watch_interval: Option<Duration>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            watch_interval,
            bus,
            plugins: RwLock::new(BTreeMap::new()),
            monitor_shared: Arc::new(MonitorShared {
                shutdown_flag: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }),
            monitor: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Re-read every manifest in the directory.
    ///
    /// Invalid manifests and duplicate ids are logged and skipped. Once the manager is
    /// started, newly found plugins are active right away. Returns the number of
    /// loaded plugins.
    #[instrument(skip(self), fields(dir = %self.manifest_dir.display()))]
    pub async fn sync(&self) -> Result<usize, PluginError> {
        let paths = manifest_paths(&self.manifest_dir).await?;

        let mut loaded: BTreeMap<String, PluginManifest> = BTreeMap::new();
        for path in paths {
            match read_manifest(&path).await {
                Ok(manifest) => {
                    if loaded.contains_key(&manifest.id) {
                        let e = PluginError::DuplicateId(manifest.id.clone());
                        warn!(path = %path.display(), error = %e, "Skipping plugin manifest");
                        continue;
                    }
                    loaded.insert(manifest.id.clone(), manifest);
                }
                Err(e) => warn!(error = %e, "Skipping plugin manifest"),
            }
        }

        let active = self.started.load(Ordering::SeqCst);
        let next: BTreeMap<String, PluginState> = loaded
            .into_iter()
            .map(|(id, manifest)| (id, PluginState { manifest, active }))
            .collect();
        let count = next.len();
        *self.plugins.write().unwrap_or_else(PoisonError::into_inner) = next;

        info!(plugins = count, "Plugin manifests synced");
        Ok(count)
    }

    /// Ask subscribers to re-sync plugins and rebuild what depends on them
    pub fn request_reload(&self, reason: &str) {
        self.bus
            .publish(EventType::PluginReload, json!({ "reason": reason }));
    }

    /// Activate all loaded plugins and start the directory monitor if configured
    #[instrument(skip(self))]
    pub fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
        let activated = {
            let mut plugins = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
            for state in plugins.values_mut() {
                state.active = true;
            }
            plugins.len()
        };
        info!(plugins = activated, "Plugins started");

        if let Some(interval) = self.watch_interval {
            self.start_monitor(interval);
        }
    }

    fn start_monitor(&self, interval: Duration) {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.is_some() {
            return;
        }

        self.monitor_shared.shutdown_flag.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.monitor_shared);
        let dir = self.manifest_dir.clone();
        let task = PluginMonitor {
            dir,
            interval,
            shared,
        };
        let bus = self.bus.clone();
        *monitor = Some(tokio::spawn(task.run(bus)));
        info!(interval = ?interval, "Plugin monitor started");
    }

    /// Deactivate all plugins and stop the monitor
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.monitor_shared.shutdown_flag.store(true, Ordering::SeqCst);
        self.monitor_shared.shutdown_notify.notify_waiters();
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Plugin monitor task failed");
            }
        }

        let mut plugins = self.plugins.write().unwrap_or_else(PoisonError::into_inner);
        for state in plugins.values_mut() {
            state.active = false;
        }
        info!("Plugins stopped");
    }

    /// Commands declared by active plugins, ordered by plugin id
    pub fn plugin_commands(&self) -> Vec<PluginCommand> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|state| state.active)
            .flat_map(|state| {
                state.manifest.commands.iter().map(|spec| PluginCommand {
                    plugin_id: state.manifest.id.clone(),
                    spec: spec.clone(),
                })
            })
            .collect()
    }

    /// Loaded plugins as `(id, name, active)`
    pub fn list(&self) -> Vec<(String, String, bool)> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|state| {
                (
                    state.manifest.id.clone(),
                    state.manifest.name.clone(),
                    state.active,
                )
            })
            .collect()
    }
}

struct PluginMonitor {
    dir: PathBuf,
    interval: Duration,
    shared: Arc<MonitorShared>,
}

impl PluginMonitor {
    async fn run(self, bus: Arc<EventBus>) {
        let mut last = fingerprint(&self.dir).await;
        loop {
            if self.shared.shutdown_flag.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let current = fingerprint(&self.dir).await;
                    if current != last {
                        info!(dir = %self.dir.display(), "Plugin manifests changed");
                        last = current;
                        bus.publish(EventType::PluginReload, json!({ "reason": "manifests changed" }));
                    }
                }
                _ = self.shared.shutdown_notify.notified() => break,
            }
        }
        debug!("Plugin monitor stopped");
    }
}

#[async_trait]
impl Subsystem for PluginManager {
    async fn start(&self) -> anyhow::Result<()> {
        PluginManager::start(self);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        PluginManager::stop(self).await;
        Ok(())
    }
}

/// Startup step reading the manifests before plugins are started
pub struct PluginSync(pub Arc<PluginManager>);

#[async_trait]
impl Subsystem for PluginSync {
    async fn start(&self) -> anyhow::Result<()> {
        self.0.sync().await?;
        Ok(())
    }
}
