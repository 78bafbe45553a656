//! Per-OS trust-store drivers.
//!
//! All variants compile everywhere so they can be tested on any host;
//! [`current_driver`] picks the one for the running OS.

mod flavor;
mod hosts;
mod linux;
mod macos;
mod windows;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::browser::{ProcessProbe, SysinfoProbe};
use crate::command::{CommandRunner, SystemRunner};
use crate::config::TrustOptions;
use crate::error::{DevcertError, Result};
use crate::paths::ConfigPaths;
use crate::ui::{TerminalUi, UserInterface};

pub use flavor::{FlavorDetails, LinuxFlavor, distro_name_from_os_release, resolve_flavor};
pub use hosts::{hosts_entry, hosts_file_mentions};
pub use linux::{LinuxDriver, LinuxLayout};
pub use macos::{MacosDriver, MacosLayout};
pub use windows::{WindowsDriver, WindowsLayout};

#[async_trait]
pub trait TrustStoreDriver: Send + Sync {
    /// Register `cert_path` with every trust store this OS uses. Failures in
    /// one store are logged and do not stop the others.
    async fn add_to_trust_stores(&self, cert_path: &Path, options: &TrustOptions) -> Result<()>;

    /// Best-effort removal from every trust store.
    async fn remove_from_trust_stores(&self, cert_path: &Path) -> Result<()>;

    /// Append `127.0.0.1 <domain>` to the hosts file unless already mapped.
    async fn add_domain_to_hosts_file_if_missing(&self, domain: &str) -> Result<()>;

    async fn read_protected(&self, path: &Path) -> Result<Vec<u8>>;

    async fn write_protected(&self, path: &Path, contents: &[u8]) -> Result<()>;

    fn delete_protected(&self, path: &Path) -> Result<()>;
}

/// Collaborators every driver shells out through.
#[derive(Clone)]
pub struct PlatformServices {
    pub runner: Arc<dyn CommandRunner>,
    pub ui: Arc<dyn UserInterface>,
    pub probe: Arc<dyn ProcessProbe>,
}

impl PlatformServices {
    pub fn system() -> Self {
        Self {
            runner: Arc::new(SystemRunner),
            ui: Arc::new(TerminalUi),
            probe: Arc::new(SysinfoProbe),
        }
    }
}

/// Select the driver for the running OS. Called once at startup.
pub fn current_driver(
    paths: ConfigPaths,
    services: PlatformServices,
) -> Result<Arc<dyn TrustStoreDriver>> {
    let home = dirs::home_dir().ok_or_else(|| {
        DevcertError::UnsupportedPlatformState("Could not determine home directory".to_string())
    })?;

    if cfg!(target_os = "macos") {
        Ok(Arc::new(MacosDriver::new(
            MacosLayout::for_home(&home),
            paths,
            services,
        )))
    } else if cfg!(target_os = "linux") {
        Ok(Arc::new(LinuxDriver::new(
            LinuxLayout::for_home(&home),
            paths,
            services,
        )))
    } else if cfg!(windows) {
        Ok(Arc::new(WindowsDriver::new(
            WindowsLayout::system(),
            paths,
            services,
        )))
    } else {
        Err(DevcertError::UnsupportedPlatformState(format!(
            "Unsupported platform: {}",
            std::env::consts::OS
        )))
    }
}
