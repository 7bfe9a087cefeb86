use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;

pub const ENV_API_KEY: &str = "PROMPTQL_API_KEY";
pub const ENV_SERVICE_URL: &str = "PROMPTQL_SERVICE_URL";
pub const ENV_AUTH_TOKEN: &str = "PROMPTQL_AUTH_TOKEN";

/// Credentials for the remote query service.
///
/// `api_key` and `service_url` are required before any remote call is made;
/// `auth_token` is service-dependent and forwarded only when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub service_url: Option<String>,

    #[serde(default)]
    pub auth_token: Option<String>,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl Config {
    pub fn new(
        api_key: impl Into<String>,
        service_url: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            api_key: Some(api_key.into()),
            service_url: Some(service_url.into()),
            auth_token: auth_token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// True when every required field is present and non-empty.
    pub fn is_valid(&self) -> bool {
        non_empty(&self.api_key) && non_empty(&self.service_url)
    }

    /// Names of the required fields that are still missing.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !non_empty(&self.api_key) {
            missing.push("api_key");
        }
        if !non_empty(&self.service_url) {
            missing.push("service_url");
        }
        missing
    }
}

/// Redact the middle of a secret, keeping a short prefix and suffix.
/// Values too short to split are truncated to a prefix only.
pub fn mask_secret(value: &str, prefix: usize, suffix: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > prefix + suffix {
        let head: String = chars[..prefix].iter().collect();
        let tail: String = chars[chars.len() - suffix..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        let head: String = chars[..chars.len() / 2].iter().collect();
        format!("{}...", head)
    }
}

/// Persistent store for [`Config`].
///
/// Environment variables (`PROMPTQL_API_KEY`, `PROMPTQL_SERVICE_URL`,
/// `PROMPTQL_AUTH_TOKEN`) take precedence over the on-disk file. Saves are
/// atomic: the file is either the old config or the new one, never a
/// partial write.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config dir, e.g. `~/.config/promptql-mcp/config.toml`.
    pub fn open_default() -> Result<Self, Error> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::config("Could not determine config directory"))?;
        Ok(Self::new(config_dir.join("promptql-mcp").join("config.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted config and overlay environment variables.
    ///
    /// A missing file yields an empty config; an unreadable or unparseable
    /// file is an error so corruption never silently drops credentials.
    pub fn load(&self) -> Result<Config, Error> {
        let mut config = if self.path.exists() {
            let content = std::fs::read_to_string(&self.path).map_err(|e| {
                Error::config(format!("Failed to read {}: {}", self.path.display(), e))
            })?;
            toml::from_str(&content).map_err(|e| {
                Error::config(format!("Invalid config file {}: {}", self.path.display(), e))
            })?
        } else {
            Config::default()
        };

        overlay_env(&mut config);
        Ok(config)
    }

    /// Persist the config, replacing any prior contents atomically.
    pub fn save(&self, config: &Config) -> Result<(), Error> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::config(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        let body = toml::to_string_pretty(config)
            .map_err(|e| Error::config(format!("Failed to encode config: {}", e)))?;

        // Write a sibling temp file, then rename over the target. Rename is
        // atomic on the same filesystem, so an interrupted save leaves the
        // previous config intact.
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, body)
            .map_err(|e| Error::config(format!("Failed to write {}: {}", tmp.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&tmp, perms)
                .map_err(|e| Error::config(format!("Failed to set permissions: {}", e)))?;
        }

        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::config(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        tracing::info!(path = %self.path.display(), "Configuration saved");
        Ok(())
    }
}

fn overlay_env(config: &mut Config) {
    for (var, field) in [
        (ENV_API_KEY, &mut config.api_key),
        (ENV_SERVICE_URL, &mut config.service_url),
        (ENV_AUTH_TOKEN, &mut config.auth_token),
    ] {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                tracing::debug!(var, "Using credential from environment");
                *field = Some(value);
            }
        }
    }
}
