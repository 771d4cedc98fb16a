// Lifecycle steps for collaborators owned outside this crate
//
// Display, monitor and site-auth helpers are started and stopped by their own
// owners; the orchestrator only needs a hook to keep its ordering. Resource
// verification and the frontend bootstrap are done here.

use crate::lifecycle::Subsystem;
use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

/// Logs its start and stop; stands in for a collaborator managed elsewhere
pub struct ServiceHook {
    name: &'static str,
}

impl ServiceHook {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Subsystem for ServiceHook {
    async fn start(&self) -> anyhow::Result<()> {
        info!(service = self.name, "Service started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!(service = self.name, "Service stopped");
        Ok(())
    }

    async fn reload(&self) -> anyhow::Result<()> {
        info!(service = self.name, "Service reloaded");
        Ok(())
    }
}

/// Makes sure every directory the process writes to exists
pub struct ResourceCheck {
    directories: Vec<PathBuf>,
}

impl ResourceCheck {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self { directories }
    }
}

#[async_trait]
impl Subsystem for ResourceCheck {
    async fn start(&self) -> anyhow::Result<()> {
        for dir in &self.directories {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to prepare directory {}", dir.display()))?;
            debug!(path = %dir.display(), "Resource directory ready");
        }
        info!(directories = self.directories.len(), "Resources verified");
        Ok(())
    }
}

/// Desktop frontend bootstrap, only meaningful on Windows hosts
pub struct FrontendBootstrap;

#[async_trait]
impl Subsystem for FrontendBootstrap {
    async fn start(&self) -> anyhow::Result<()> {
        if cfg!(windows) {
            info!("Frontend bootstrapped");
        } else {
            debug!("No platform frontend on this host");
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if cfg!(windows) {
            info!("Frontend torn down");
        }
        Ok(())
    }
}
