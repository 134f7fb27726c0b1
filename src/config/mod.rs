//! Local session cache
//!
//! Persists the current identity under a fixed file in the platform config
//! directory. Recovery aid only, never a source of truth: the in-memory
//! identity published by the session manager always wins.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::models::Identity;

/// On-disk shape of the cached identity.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedSession {
    id: String,
    email: String,
    display_name: String,
}

/// Handle on the session cache file.
pub struct SessionCache {
    path: PathBuf,
}

impl SessionCache {
    /// Cache at the platform default location.
    pub fn open() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "pairchat", "pairchat")
            .context("Could not determine config directory")?;
        Ok(Self {
            path: proj_dirs.config_dir().join("session.toml"),
        })
    }

    /// Cache at an explicit path.
    #[cfg(test)]
    pub(crate) fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the cached identity, if any.
    pub fn load(&self) -> Result<Option<Identity>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).context("Failed to read session cache")?;
        let cached: CachedSession =
            toml::from_str(&content).context("Failed to parse session cache")?;
        Ok(Some(Identity {
            id: cached.id,
            email: cached.email,
            display_name: cached.display_name,
        }))
    }

    /// Persist the identity, replacing any previous entry.
    pub fn save(&self, identity: &Identity) -> Result<()> {
        let cached = CachedSession {
            id: identity.id.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(&cached).context("Failed to serialize session")?;
        fs::write(&self.path, content).context("Failed to write session cache")?;

        // The cache identifies a signed-in user; keep it private.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms).context("Failed to set cache permissions")?;
        }

        Ok(())
    }

    /// Remove the cached identity. Missing file is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to clear session cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache() -> SessionCache {
        let path = std::env::temp_dir()
            .join(format!("pairchat-test-{}", uuid::Uuid::new_v4()))
            .join("session.toml");
        SessionCache::at(path)
    }

    #[test]
    fn test_round_trip_and_clear() {
        let cache = temp_cache();
        assert!(cache.load().unwrap().is_none());

        let identity = Identity {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            display_name: "U One".to_string(),
        };
        cache.save(&identity).unwrap();
        assert_eq!(cache.load().unwrap(), Some(identity));

        cache.clear().unwrap();
        assert!(cache.load().unwrap().is_none());
        // Clearing twice is fine.
        cache.clear().unwrap();
    }
}
