//! Identity resolution against the Telegram host environment.
//!
//! The host populates its init data asynchronously after the page loads, so
//! a missing id is polled a bounded number of times before falling back to a
//! configured debug identity (for running outside Telegram). No identity
//! means every downstream access check short-circuits to "no access" without
//! touching the network.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{config::Config, domain::UserId};

/// Port over the host environment's init data.
pub trait InitDataPort: Send + Sync {
    /// User id embedded in the init data, if the host has populated it yet.
    fn user_id(&self) -> Option<i64>;

    /// Raw signed init-data blob, forwarded to the backend for verification.
    fn init_data_raw(&self) -> Option<String>;
}

#[derive(Clone, Copy, Debug)]
pub struct IdentitySettings {
    pub debug_user_id: Option<UserId>,
    pub poll_tries: u32,
    pub poll_delay: Duration,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            debug_user_id: None,
            poll_tries: 12,
            poll_delay: Duration::from_millis(120),
        }
    }
}

impl IdentitySettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            debug_user_id: cfg.debug_tg_user_id.map(UserId),
            poll_tries: cfg.id_poll_tries,
            poll_delay: cfg.id_poll_delay,
        }
    }
}

pub struct IdentityResolver {
    port: Arc<dyn InitDataPort>,
    settings: IdentitySettings,
    // Resolved once per app load; later calls return the cached id.
    resolved: Mutex<Option<UserId>>,
}

impl IdentityResolver {
    pub fn new(port: Arc<dyn InitDataPort>, settings: IdentitySettings) -> Self {
        Self {
            port,
            settings,
            resolved: Mutex::new(None),
        }
    }

    /// Raw init data for request signing, straight from the port.
    pub fn init_data_raw(&self) -> Option<String> {
        self.port.init_data_raw()
    }

    /// Resolve the current user id, polling the host while it warms up.
    pub async fn resolve(&self) -> Option<UserId> {
        let mut resolved = self.resolved.lock().await;
        if let Some(id) = *resolved {
            return Some(id);
        }

        let tries = self.settings.poll_tries.max(1);
        for attempt in 0..tries {
            if let Some(id) = self.port.user_id() {
                let id = UserId(id);
                *resolved = Some(id);
                return Some(id);
            }
            if attempt + 1 < tries {
                tokio::time::sleep(self.settings.poll_delay).await;
            }
        }

        if let Some(id) = self.settings.debug_user_id {
            debug!(user_id = id.0, "host supplied no identity; using debug override");
            *resolved = Some(id);
            return Some(id);
        }

        None
    }
}
