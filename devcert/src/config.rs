use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{DevcertError, Result};
use crate::paths::ConfigPaths;

/// Settings from `<config>/devcert.toml`. Every table is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub trust: TrustOptions,

    #[serde(default)]
    pub ca: CaOptions,

    #[serde(default)]
    pub domains: DomainOptions,
}

/// How trust stores are populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustOptions {
    /// Never install NSS tooling through a package manager; fall back to
    /// the manual Firefox flow instead.
    #[serde(default)]
    pub skip_certutil_install: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaOptions {
    /// Root certificate validity in days (default: 180)
    #[serde(default = "default_ca_validity_days")]
    pub validity_days: u32,
}

impl Default for CaOptions {
    fn default() -> Self {
        Self {
            validity_days: default_ca_validity_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainOptions {
    /// Leaf certificate validity in days (default: 30)
    #[serde(default = "default_domain_validity_days")]
    pub validity_days: u32,
}

impl Default for DomainOptions {
    fn default() -> Self {
        Self {
            validity_days: default_domain_validity_days(),
        }
    }
}

fn default_ca_validity_days() -> u32 {
    180
}

fn default_domain_validity_days() -> u32 {
    30
}

impl Settings {
    /// Load settings for `paths`. A missing file yields defaults.
    pub fn load(paths: &ConfigPaths) -> Result<Self> {
        Self::load_from_file(&paths.settings_path())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(path).map_err(|e| DevcertError::FileRead(path.to_path_buf(), e))?;
        let settings = Self::parse(&content)
            .map_err(|e| DevcertError::Config(path.to_path_buf(), e))?;
        settings
            .validate()
            .map_err(|e| DevcertError::Config(path.to_path_buf(), e))?;
        Ok(settings)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.ca.validity_days == 0 {
            return Err("ca.validity_days must be at least 1".to_string());
        }
        if self.domains.validity_days == 0 {
            return Err("domains.validity_days must be at least 1".to_string());
        }
        Ok(())
    }
}
