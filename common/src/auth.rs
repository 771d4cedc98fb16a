// Site authentication check
//
// After boot the site-auth collaborator reports the level the current user is
// authenticated at. Below the required level the user is told through the
// message surface and a notification. A failing check never blocks startup.

use crate::lifecycle::Subsystem;
use crate::messages::{MessageQueue, Role};
use crate::models::Notification;
use crate::notify::NotificationSink;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Minimum level at which no reminder is shown
pub const REQUIRED_AUTH_LEVEL: u8 = 2;

pub const AUTH_NOTICE_TITLE: &str = "User authentication";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SiteAuth: Send + Sync {
    async fn auth_level(&self) -> anyhow::Result<u8>;
}

/// Site-auth collaborator with a configured level
pub struct StaticSiteAuth {
    level: u8,
}

impl StaticSiteAuth {
    pub fn new(level: u8) -> Self {
        Self { level }
    }
}

#[async_trait]
impl SiteAuth for StaticSiteAuth {
    async fn auth_level(&self) -> anyhow::Result<u8> {
        Ok(self.level)
    }
}

#[async_trait]
impl Subsystem for StaticSiteAuth {
    async fn start(&self) -> anyhow::Result<()> {
        info!(level = self.level, "Site authentication ready");
        Ok(())
    }
}

pub struct AuthCheck {
    auth: Arc<dyn SiteAuth>,
    messages: Arc<MessageQueue>,
    notifier: Arc<dyn NotificationSink>,
    link: Option<String>,
}

impl AuthCheck {
    pub fn new(
        auth: Arc<dyn SiteAuth>,
        messages: Arc<MessageQueue>,
        notifier: Arc<dyn NotificationSink>,
        link: Option<String>,
    ) -> Self {
        Self {
            auth,
            messages,
            notifier,
            link,
        }
    }

    /// Returns true when the user had to be reminded
    #[instrument(skip(self))]
    pub async fn check(&self) -> bool {
        let level = match self.auth.auth_level().await {
            Ok(level) => level,
            Err(e) => {
                warn!(error = %e, "Could not determine authentication level");
                return false;
            }
        };
        if level >= REQUIRED_AUTH_LEVEL {
            info!(level, "User authentication verified");
            return false;
        }

        let text = format!(
            "Authentication level {} is below the required level {}",
            level, REQUIRED_AUTH_LEVEL
        );
        warn!(level, required = REQUIRED_AUTH_LEVEL, "User authentication insufficient");
        self.messages.put(AUTH_NOTICE_TITLE, text.clone(), Role::System);

        let mut notification = Notification::new(AUTH_NOTICE_TITLE).with_text(text);
        if let Some(link) = &self.link {
            notification = notification.with_link(link.clone());
        }
        if let Err(e) = self.notifier.post(notification).await {
            warn!(error = %e, "Failed to post authentication notice");
        }
        true
    }
}

#[async_trait]
impl Subsystem for AuthCheck {
    async fn start(&self) -> anyhow::Result<()> {
        self.check().await;
        Ok(())
    }
}
