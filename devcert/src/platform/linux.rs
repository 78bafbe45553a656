use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::flavor::{FlavorDetails, LinuxFlavor, distro_name_from_os_release, resolve_flavor};
use super::hosts::{hosts_addition, hosts_file_mentions, read_hosts};
use super::{PlatformServices, TrustStoreDriver};
use crate::browser::ensure_firefox_closed;
use crate::command::{CommandRunner, Invocation};
use crate::config::TrustOptions;
use crate::domains::validate_domain;
use crate::error::Result;
use crate::nss;
use crate::paths::ConfigPaths;
use crate::protected::{PermissionProtectedFiles, ProtectedFileStore};
use crate::wizard::{BrowserLaunch, run_manual_firefox_trust_flow};

const CERTUTIL: &str = "certutil";
const ANCHOR_FILE_NAME: &str = "devcert.crt";

/// Filesystem locations the Linux driver looks at. `root` is `/` outside tests.
#[derive(Debug, Clone)]
pub struct LinuxLayout {
    root: PathBuf,
    home: PathBuf,
}

impl LinuxLayout {
    pub fn for_home(home: &Path) -> Self {
        Self::rooted("/", home)
    }

    pub fn rooted(root: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            home: home.into(),
        }
    }

    pub fn system_path(&self, absolute: &Path) -> PathBuf {
        self.root
            .join(absolute.strip_prefix("/").unwrap_or(absolute))
    }

    fn os_release(&self) -> PathBuf {
        self.system_path(Path::new("/etc/os-release"))
    }

    pub fn hosts_file(&self) -> PathBuf {
        self.system_path(Path::new("/etc/hosts"))
    }

    fn firefox_bin(&self) -> PathBuf {
        self.system_path(Path::new("/usr/bin/firefox"))
    }

    fn chrome_bin(&self) -> PathBuf {
        self.system_path(Path::new("/usr/bin/google-chrome"))
    }

    fn firefox_nss_pattern(&self) -> String {
        nss::children_pattern(&self.home.join(".mozilla").join("firefox"))
    }

    fn chrome_nss_pattern(&self) -> String {
        nss::exact_pattern(&self.home.join(".pki").join("nssdb"))
    }
}

pub struct LinuxDriver {
    layout: LinuxLayout,
    services: PlatformServices,
    files: PermissionProtectedFiles,
}

impl LinuxDriver {
    pub fn new(layout: LinuxLayout, paths: ConfigPaths, services: PlatformServices) -> Self {
        let files = PermissionProtectedFiles::new(paths, services.runner.clone());
        Self {
            layout,
            services,
            files,
        }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.services.runner.as_ref()
    }

    /// Resolve the running distribution fresh from os-release.
    pub fn flavor(&self) -> LinuxFlavor {
        let path = self.layout.os_release();
        let name = fs::read_to_string(&path)
            .ok()
            .and_then(|contents| distro_name_from_os_release(&contents))
            .unwrap_or_default();
        resolve_flavor(&name)
    }

    fn anchor_targets(&self, details: &FlavorDetails) -> Vec<PathBuf> {
        details
            .ca_folders
            .iter()
            .map(|folder| self.layout.system_path(folder).join(ANCHOR_FILE_NAME))
            .collect()
    }

    fn run_all(&self, commands: &[Invocation]) {
        for command in commands {
            if let Err(e) = self.runner().run(command) {
                warn!(error = %e, "Trust store refresh failed");
            }
        }
    }

    /// Make certutil available for Firefox, installing it when allowed.
    fn ensure_certutil(&self, details: &FlavorDetails, options: &TrustOptions) -> bool {
        if self.runner().command_exists(CERTUTIL) {
            return true;
        }
        if options.skip_certutil_install {
            debug!("certutil missing and automatic install disabled");
            return false;
        }
        match self.runner().run(&details.nss_tools_install) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Failed to install NSS tools");
                false
            }
        }
    }

    async fn manual_firefox_flow(&self, cert_path: &Path) {
        let browser = BrowserLaunch::binary(self.layout.firefox_bin());
        if let Err(e) = run_manual_firefox_trust_flow(
            self.runner(),
            self.services.ui.as_ref(),
            &browser,
            cert_path,
        )
        .await
        {
            warn!(error = %e, "Manual Firefox trust flow failed");
        }
    }
}

/// Copy `cert_path` into each target. A failing target does not stop the rest.
pub(crate) fn copy_into_targets(
    runner: &dyn CommandRunner,
    cert_path: &Path,
    targets: &[PathBuf],
) -> usize {
    let source = cert_path.display().to_string();
    let mut copied = 0;
    for target in targets {
        let invocation = Invocation::elevated("cp", [source.clone(), target.display().to_string()]);
        match runner.run(&invocation) {
            Ok(_) => copied += 1,
            Err(e) => warn!(anchor = %target.display(), error = %e, "Failed to copy CA certificate"),
        }
    }
    copied
}

pub(crate) fn remove_from_targets(runner: &dyn CommandRunner, targets: &[PathBuf]) -> usize {
    let mut removed = 0;
    for target in targets {
        let invocation = Invocation::elevated("rm", ["-f".to_string(), target.display().to_string()]);
        match runner.run(&invocation) {
            Ok(_) => removed += 1,
            Err(e) => warn!(anchor = %target.display(), error = %e, "Failed to remove CA certificate"),
        }
    }
    removed
}

#[async_trait]
impl TrustStoreDriver for LinuxDriver {
    async fn add_to_trust_stores(&self, cert_path: &Path, options: &TrustOptions) -> Result<()> {
        let details = self.flavor().details()?;

        debug!("Adding devcert root CA to Linux system trust stores");
        copy_into_targets(self.runner(), cert_path, &self.anchor_targets(&details));
        self.run_all(&details.post_install_commands);

        let mut certutil_ready = self.runner().command_exists(CERTUTIL);
        if self.layout.firefox_bin().exists() {
            certutil_ready = self.ensure_certutil(&details, options);
            if certutil_ready {
                ensure_firefox_closed(self.services.probe.as_ref(), self.services.ui.as_ref())
                    .await;
                nss::install_into(
                    self.runner(),
                    &self.layout.firefox_nss_pattern(),
                    cert_path,
                    CERTUTIL,
                );
            } else {
                self.manual_firefox_flow(cert_path).await;
            }
        }

        if self.layout.chrome_bin().exists() {
            if certutil_ready {
                // Chrome reads its NSS database from disk, so no close-wait here.
                nss::install_into(
                    self.runner(),
                    &self.layout.chrome_nss_pattern(),
                    cert_path,
                    CERTUTIL,
                );
            } else {
                self.services.ui.warn_chrome_without_certutil();
            }
        }
        Ok(())
    }

    async fn remove_from_trust_stores(&self, cert_path: &Path) -> Result<()> {
        let details = self.flavor().details()?;

        remove_from_targets(self.runner(), &self.anchor_targets(&details));
        self.run_all(&details.post_removal_commands);

        if !self.runner().command_exists(CERTUTIL) {
            return Ok(());
        }
        if self.layout.firefox_bin().exists() {
            ensure_firefox_closed(self.services.probe.as_ref(), self.services.ui.as_ref()).await;
            nss::remove_from(
                self.runner(),
                &self.layout.firefox_nss_pattern(),
                cert_path,
                CERTUTIL,
            );
        }
        if self.layout.chrome_bin().exists() {
            nss::remove_from(
                self.runner(),
                &self.layout.chrome_nss_pattern(),
                cert_path,
                CERTUTIL,
            );
        }
        Ok(())
    }

    async fn add_domain_to_hosts_file_if_missing(&self, domain: &str) -> Result<()> {
        validate_domain(domain)?;
        let hosts = self.layout.hosts_file();
        let existing = read_hosts(&hosts)?;
        if hosts_file_mentions(&existing, domain) {
            debug!(domain, "Domain already in hosts file");
            return Ok(());
        }
        let invocation = Invocation::elevated("tee", ["-a".to_string(), hosts.display().to_string()])
            .with_stdin(hosts_addition(&existing, domain));
        self.runner().run(&invocation)?;
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
