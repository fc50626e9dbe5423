//! Credential profiles
//!
//! A profile is a named set of credentials and connection details for an
//! S3-compatible store. Profiles are stored in the configuration file and
//! validated before any gateway or scheduler is built from them.

use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::{Error, Result};

/// Timeout configuration for a profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// Read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_ms: u64,
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    60_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            read_ms: default_read_timeout(),
        }
    }
}

/// Named credentials for one object store account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Unique name for this profile
    pub name: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Region
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint URL for non-AWS stores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[serde(default)]
    pub path_style: bool,

    /// Timeout configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutConfig>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Profile {
    /// Create a new profile with required fields
    pub fn new(
        name: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            endpoint: None,
            path_style: false,
            timeout: None,
        }
    }

    /// Set a custom endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Get the effective timeout configuration
    pub fn timeout_config(&self) -> TimeoutConfig {
        self.timeout.clone().unwrap_or_default()
    }

    /// Check that the profile carries usable credentials.
    ///
    /// Called before a client is constructed so that missing credentials
    /// surface as a configuration error rather than an auth failure mid-transfer.
    pub fn validate(&self) -> Result<()> {
        if self.access_key.trim().is_empty() || self.secret_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "Profile '{}' has no credentials configured",
                self.name
            )));
        }
        if self.region.trim().is_empty() {
            return Err(Error::Config(format!(
                "Profile '{}' has no region configured",
                self.name
            )));
        }
        if let Some(endpoint) = &self.endpoint {
            url::Url::parse(endpoint)?;
        }
        Ok(())
    }
}

/// Manager for profile operations
pub struct ProfileManager {
    config_manager: ConfigManager,
}

impl ProfileManager {
    /// Create a new ProfileManager with a specific ConfigManager
    pub fn with_config_manager(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Create a new ProfileManager using the default config location
    pub fn new() -> Result<Self> {
        let config_manager = ConfigManager::new()?;
        Ok(Self { config_manager })
    }

    /// List all configured profiles
    pub fn list(&self) -> Result<Vec<Profile>> {
        let config = self.config_manager.load()?;
        Ok(config.profiles)
    }

    /// Get a profile by name
    pub fn get(&self, name: &str) -> Result<Profile> {
        let config = self.config_manager.load()?;
        config
            .profiles
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    /// Get a profile by name and check its credentials
    pub fn load_validated(&self, name: &str) -> Result<Profile> {
        let profile = self.get(name)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Add or update a profile
    pub fn set(&self, profile: Profile) -> Result<()> {
        profile.validate()?;
        let mut config = self.config_manager.load()?;

        config.profiles.retain(|p| p.name != profile.name);
        config.profiles.push(profile);

        self.config_manager.save(&config)
    }

    /// Remove a profile
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config_manager.load()?;
        let original_len = config.profiles.len();

        config.profiles.retain(|p| p.name != name);

        if config.profiles.len() == original_len {
            return Err(Error::ProfileNotFound(name.to_string()));
        }

        self.config_manager.save(&config)
    }

    /// Check if a profile exists
    pub fn exists(&self, name: &str) -> Result<bool> {
        let config = self.config_manager.load()?;
        Ok(config.profiles.iter().any(|p| p.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_profile_manager() -> (ProfileManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let config_manager = ConfigManager::with_path(config_path);
        let manager = ProfileManager::with_config_manager(config_manager);
        (manager, temp_dir)
    }

    #[test]
    fn test_profile_new() {
        let profile = Profile::new("work", "access", "secret", "eu-central-1");
        assert_eq!(profile.name, "work");
        assert_eq!(profile.region, "eu-central-1");
        assert!(profile.endpoint.is_none());
        assert!(!profile.path_style);
        assert_eq!(profile.timeout_config().read_ms, 60_000);
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let profile = Profile::new("work", "", "secret", "us-east-1");
        assert!(matches!(profile.validate(), Err(Error::Config(_))));

        let profile = Profile::new("work", "access", "  ", "us-east-1");
        assert!(matches!(profile.validate(), Err(Error::Config(_))));

        let profile = Profile::new("work", "access", "secret", "");
        assert!(matches!(profile.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let profile =
            Profile::new("minio", "a", "b", "us-east-1").with_endpoint("not a url");
        assert!(profile.validate().is_err());

        let profile =
            Profile::new("minio", "a", "b", "us-east-1").with_endpoint("http://localhost:9000");
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_profile_manager_set_and_get() {
        let (manager, _temp_dir) = temp_profile_manager();

        manager
            .set(Profile::new("work", "AKIA", "secret", "us-east-1"))
            .unwrap();

        let retrieved = manager.get("work").unwrap();
        assert_eq!(retrieved.name, "work");
        assert_eq!(retrieved.access_key, "AKIA");
        assert!(manager.load_validated("work").is_ok());
    }

    #[test]
    fn test_profile_manager_list_and_remove() {
        let (manager, _temp_dir) = temp_profile_manager();

        manager.set(Profile::new("a", "a", "a", "us-east-1")).unwrap();
        manager.set(Profile::new("b", "b", "b", "us-east-1")).unwrap();
        assert_eq!(manager.list().unwrap().len(), 2);

        manager.remove("a").unwrap();
        assert!(!manager.exists("a").unwrap());
        assert!(manager.exists("b").unwrap());
    }

    #[test]
    fn test_profile_manager_not_found() {
        let (manager, _temp_dir) = temp_profile_manager();

        assert!(matches!(
            manager.get("nonexistent"),
            Err(Error::ProfileNotFound(_))
        ));
        assert!(matches!(
            manager.remove("nonexistent"),
            Err(Error::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_profile_update_existing() {
        let (manager, _temp_dir) = temp_profile_manager();

        manager.set(Profile::new("p", "old", "b", "us-east-1")).unwrap();
        manager.set(Profile::new("p", "new", "d", "us-east-1")).unwrap();

        let profiles = manager.list().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].access_key, "new");
    }
}
