// Module manager
//
// Functional modules are loaded at startup, torn down first at shutdown, and can be
// reloaded as a set. A module that fails to initialize is logged and left out.

use crate::errors::ModuleError;
use crate::lifecycle::Subsystem;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

#[async_trait]
pub trait Module: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    async fn init(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Availability check: `(available, message)`
    async fn test(&self) -> (bool, String);
}

pub struct ModuleManager {
    available: Vec<Arc<dyn Module>>,
    running: RwLock<BTreeMap<String, Arc<dyn Module>>>,
}

impl ModuleManager {
    pub fn new(available: Vec<Arc<dyn Module>>) -> Self {
        Self {
            available,
            running: RwLock::new(BTreeMap::new()),
        }
    }

    /// Initialize every available module; returns how many are running
    #[instrument(skip(self))]
    pub async fn load(&self) -> usize {
        let mut running = self.running.write().await;
        for module in &self.available {
            if running.contains_key(module.id()) {
                continue;
            }
            match module.init().await {
                Ok(()) => {
                    info!(module = module.id(), name = module.name(), "Module loaded");
                    running.insert(module.id().to_string(), module.clone());
                }
                Err(e) => {
                    let e = ModuleError::InitFailed {
                        id: module.id().to_string(),
                        reason: format!("{:#}", e),
                    };
                    error!(error = %e, "Module skipped");
                }
            }
        }
        running.len()
    }

    /// Stop every running module; stop failures are logged
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        for (id, module) in running.iter() {
            if let Err(e) = module.stop().await {
                warn!(module = %id, error = %e, "Module failed to stop cleanly");
            }
        }
        let count = running.len();
        running.clear();
        info!(modules = count, "Modules stopped");
    }

    /// Stop all modules, then load them again
    pub async fn reload(&self) -> usize {
        self.stop().await;
        self.load().await
    }

    /// Running modules as `(id, name)`
    pub async fn list(&self) -> Vec<(String, String)> {
        self.running
            .read()
            .await
            .values()
            .map(|module| (module.id().to_string(), module.name().to_string()))
            .collect()
    }

    pub async fn test(&self, id: &str) -> Result<(bool, String), ModuleError> {
        let module = self
            .running
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(id.to_string()))?;
        Ok(module.test().await)
    }

    /// Test every running module: `(id, available, message)`
    pub async fn test_all(&self) -> Vec<(String, bool, String)> {
        let modules: Vec<_> = self.running.read().await.values().cloned().collect();
        let mut results = Vec::with_capacity(modules.len());
        for module in modules {
            let (available, message) = module.test().await;
            results.push((module.id().to_string(), available, message));
        }
        results
    }
}

#[async_trait]
impl Subsystem for ModuleManager {
    async fn start(&self) -> anyhow::Result<()> {
        self.load().await;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        ModuleManager::stop(self).await;
        Ok(())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        ModuleManager::reload(self).await;
        Ok(())
    }
}

/// Keeps the log directory in place for the log feed
pub struct LogStorageModule {
    dir: PathBuf,
}

impl LogStorageModule {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Module for LogStorageModule {
    fn id(&self) -> &str {
        "log_storage"
    }

    fn name(&self) -> &str {
        "Log storage"
    }

    async fn init(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn test(&self) -> (bool, String) {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => (true, "ok".to_string()),
            Ok(_) => (false, format!("{} is not a directory", self.dir.display())),
            Err(e) => (false, format!("{}: {}", self.dir.display(), e)),
        }
    }
}
