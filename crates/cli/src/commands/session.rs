//! Per-invocation wiring from a profile name to a gateway
//!
//! The profile is validated before the client is built, so a missing
//! profile or empty credential never reaches the store.

use std::sync::Arc;

use loft_core::{
    Config, ConfigManager, EventStream, FolderOps, Gateway, ListingCache, ProfileManager, Result,
    SchedulerOptions, TransferScheduler,
};
use loft_s3::{MultipartConfig, S3Client};

/// Connection to one profile's store
pub(crate) struct Session {
    config: Config,
    folders: FolderOps,
}

impl Session {
    /// Load configuration and connect using the named profile
    pub(crate) async fn open(profile_name: &str) -> Result<Self> {
        let config_manager = ConfigManager::new()?;
        let config = config_manager.load()?;
        let profile =
            ProfileManager::with_config_manager(config_manager).load_validated(profile_name)?;

        let client = S3Client::new(&profile, MultipartConfig::from(&config.transfer)).await?;
        let gateway = Gateway::new(Arc::new(client)).with_retry(config.transfer.retry.clone());
        tracing::debug!(profile = %profile.name, "Session opened");

        Ok(Self {
            config,
            folders: FolderOps::new(gateway, Arc::new(ListingCache::new())),
        })
    }

    pub(crate) fn folders(&self) -> &FolderOps {
        &self.folders
    }

    pub(crate) fn gateway(&self) -> &Gateway {
        self.folders.gateway()
    }

    /// Start a scheduler sharing this session's listing cache
    pub(crate) fn spawn_scheduler(&self, parallel: Option<usize>) -> (TransferScheduler, EventStream) {
        let mut options = SchedulerOptions::from(&self.config.transfer)
            .with_cache(Arc::clone(self.folders.cache()));
        if let Some(n) = parallel {
            options.max_parallel = n.max(1);
        }
        TransferScheduler::spawn(self.gateway().clone(), options)
    }
}
