use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use super::hosts::{hosts_addition, hosts_file_mentions, read_hosts};
use super::{PlatformServices, TrustStoreDriver};
use crate::command::{CommandRunner, Invocation};
use crate::config::TrustOptions;
use crate::domains::validate_domain;
use crate::error::Result;
use crate::paths::ConfigPaths;
use crate::protected::{EncryptedProtectedFiles, ProtectedFileStore};
use crate::signing::CA_COMMON_NAME;
use crate::wizard::{BrowserLaunch, run_manual_firefox_trust_flow};

#[derive(Debug, Clone)]
pub struct WindowsLayout {
    pub hosts_file: PathBuf,
}

impl WindowsLayout {
    pub fn system() -> Self {
        Self {
            hosts_file: PathBuf::from(r"C:\Windows\System32\Drivers\etc\hosts"),
        }
    }
}

pub struct WindowsDriver {
    layout: WindowsLayout,
    services: PlatformServices,
    files: EncryptedProtectedFiles,
}

impl WindowsDriver {
    pub fn new(layout: WindowsLayout, paths: ConfigPaths, services: PlatformServices) -> Self {
        let files = EncryptedProtectedFiles::new(paths, services.ui.clone());
        Self {
            layout,
            services,
            files,
        }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.services.runner.as_ref()
    }
}

/// Firefox is started through the shell so it is found without a known install path.
fn firefox_launcher() -> BrowserLaunch {
    BrowserLaunch::command("cmd", ["/C", "start", "", "firefox"])
}

/// Append `text` to `path` from an elevated PowerShell. The payload travels
/// base64-encoded so it never needs shell quoting.
pub(crate) fn elevated_append_invocation(path: &Path, text: &str) -> Invocation {
    let payload = STANDARD.encode(text.as_bytes());
    let script = format!(
        "[IO.File]::AppendAllText('{}', [Text.Encoding]::UTF8.GetString([Convert]::FromBase64String('{payload}')))",
        path.display()
    );
    Invocation::new(
        "powershell",
        [
            "-NoProfile".to_string(),
            "-Command".to_string(),
            format!(
                "Start-Process powershell -Verb RunAs -Wait -ArgumentList '-NoProfile','-Command',\"{script}\""
            ),
        ],
    )
}

#[async_trait]
impl TrustStoreDriver for WindowsDriver {
    async fn add_to_trust_stores(&self, cert_path: &Path, _options: &TrustOptions) -> Result<()> {
        debug!("Adding devcert root CA to the Windows user root store");
        let add = Invocation::new(
            "certutil",
            [
                "-addstore".to_string(),
                "-user".to_string(),
                "root".to_string(),
                cert_path.display().to_string(),
            ],
        );
        if let Err(e) = self.runner().run(&add) {
            warn!(error = %e, "certutil -addstore failed");
        }

        // Firefox on Windows keeps its own store and there is no reliable
        // certutil for it, so the manual flow is always offered.
        if let Err(e) = run_manual_firefox_trust_flow(
            self.runner(),
            self.services.ui.as_ref(),
            &firefox_launcher(),
            cert_path,
        )
        .await
        {
            debug!(error = %e, "Firefox trust flow skipped");
        }
        Ok(())
    }

    async fn remove_from_trust_stores(&self, _cert_path: &Path) -> Result<()> {
        self.services.ui.warn_removing_windows_certificate();
        let remove = Invocation::new(
            "certutil",
            ["-delstore", "-user", "root", CA_COMMON_NAME],
        );
        if let Err(e) = self.runner().run(&remove) {
            warn!(error = %e, "certutil -delstore failed");
        }
        Ok(())
    }

    async fn add_domain_to_hosts_file_if_missing(&self, domain: &str) -> Result<()> {
        validate_domain(domain)?;
        let hosts = &self.layout.hosts_file;
        let existing = read_hosts(hosts)?;
        if hosts_file_mentions(&existing, domain) {
            debug!(domain, "Domain already in hosts file");
            return Ok(());
        }
        let addition = hosts_addition(&existing, domain).replace('\n', "\r\n");
        self.runner()
            .run(&elevated_append_invocation(hosts, &addition))?;
        Ok(())
    }

    async fn read_protected(&self, path: &Path) -> Result<Vec<u8>> {
        self.files.read(path).await
    }

    async fn write_protected(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.files.write(path, contents).await
    }

    fn delete_protected(&self, path: &Path) -> Result<()> {
        self.files.delete(path)
    }
}
