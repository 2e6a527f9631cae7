//! Session: the set of pools behind one provider connection.
//!
//! Pools are keyed by their mount URL, the base URL callers address
//! requests to. Registering the same mount twice is an error. The
//! shared worker network is created lazily the first time a pool needs
//! one and released when the session closes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::channel::ChannelKind;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::ingress::Ingress;
use crate::pool::{Pool, PoolConfig};
use crate::provider::{NetworkHandle, Provider};

const DEFAULT_NETWORK_CIDR: &str = "192.168.0.0/24";

pub struct Session {
    provider: Arc<dyn Provider>,
    pools: Mutex<HashMap<String, Arc<Pool>>>,
    network: Mutex<Option<NetworkHandle>>,
    network_cidr: String,
}

impl Session {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            pools: Mutex::new(HashMap::new()),
            network: Mutex::new(None),
            network_cidr: DEFAULT_NETWORK_CIDR.to_string(),
        }
    }

    pub fn with_network_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.network_cidr = cidr.into();
        self
    }

    /// Builds a session with all pools declared in a config file.
    pub async fn from_config_file(
        provider: Arc<dyn Provider>,
        path: impl AsRef<Path>,
    ) -> Result<Self, SessionError> {
        let config = SessionConfig::from_yaml_file(path)?;
        Self::from_config(provider, config).await
    }

    pub async fn from_config(
        provider: Arc<dyn Provider>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let session = Session::new(provider).with_network_cidr(config.network_cidr.clone());
        for (mount_url, mount) in &config.mounts {
            session.register(mount_url, mount.to_pool_config()?).await?;
        }
        Ok(session)
    }

    /// Registers a pool under a mount URL. The pool is created idle;
    /// call [`Session::start_all`] or [`Pool::start`] to bring up
    /// workers.
    pub async fn register(
        &self,
        mount_url: impl Into<String>,
        config: PoolConfig,
    ) -> Result<Arc<Pool>, SessionError> {
        let mount_url = mount_url.into();
        let mut pools = self.pools.lock().await;
        if pools.contains_key(&mount_url) {
            return Err(SessionError::DuplicateMount(mount_url));
        }

        if config.channel == ChannelKind::Tunnel {
            self.ensure_network().await?;
        }

        let pool = Arc::new(Pool::new(
            mount_name(&mount_url),
            config,
            Arc::clone(&self.provider),
        ));
        info!(mount_url = %mount_url, "Pool registered");
        pools.insert(mount_url, Arc::clone(&pool));
        Ok(pool)
    }

    /// Creates the shared worker network once.
    async fn ensure_network(&self) -> Result<(), SessionError> {
        let mut network = self.network.lock().await;
        if network.is_none() {
            let handle = self.provider.create_network(&self.network_cidr).await?;
            info!(network_id = %handle.id, cidr = %handle.cidr, "Worker network ready");
            *network = Some(handle);
        }
        Ok(())
    }

    /// Handle for submitting requests to a registered mount.
    pub async fn ingress(&self, mount_url: &str) -> Result<Ingress, SessionError> {
        let pools = self.pools.lock().await;
        let pool = pools
            .get(mount_url)
            .ok_or_else(|| SessionError::UnknownMount(mount_url.to_string()))?;
        Ok(Ingress::new(mount_url, pool.queue()))
    }

    pub async fn pool(&self, mount_url: &str) -> Result<Arc<Pool>, SessionError> {
        let pools = self.pools.lock().await;
        pools
            .get(mount_url)
            .cloned()
            .ok_or_else(|| SessionError::UnknownMount(mount_url.to_string()))
    }

    pub async fn start_all(&self) {
        let pools = self.pools.lock().await;
        for pool in pools.values() {
            pool.start().await;
        }
    }

    /// Stops every pool and releases the shared network. Requests
    /// still queued resolve with a closed-queue error.
    pub async fn close(&self) {
        let pools = self.pools.lock().await;
        for pool in pools.values() {
            pool.stop().await;
        }
        let mut network = self.network.lock().await;
        if let Some(handle) = network.take() {
            if let Err(err) = self.provider.release_network(&handle).await {
                warn!(network_id = %handle.id, error = %err, "Network release failed");
            }
        }
        info!("Session closed");
    }
}

/// Short pool name derived from a mount URL, used in worker ids.
fn mount_name(mount_url: &str) -> String {
    let trimmed = mount_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(mount_url);
    let host = trimmed
        .split(|c: char| matches!(c, '/' | ':' | '?'))
        .next()
        .unwrap_or(trimmed);
    if host.is_empty() {
        "pool".to_string()
    } else {
        host.to_string()
    }
}
