use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

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

const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";
const BREW: &str = "brew";
const NSS_FORMULA: &str = "nss";

#[derive(Debug, Clone)]
pub struct MacosLayout {
    root: PathBuf,
    home: PathBuf,
}

impl MacosLayout {
    pub fn for_home(home: &Path) -> Self {
        Self::rooted("/", home)
    }

    pub fn rooted(root: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            home: home.into(),
        }
    }

    fn system_path(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }

    fn firefox_bundle(&self) -> PathBuf {
        self.system_path("/Applications/Firefox.app")
    }

    fn firefox_bin(&self) -> PathBuf {
        self.firefox_bundle().join("Contents/MacOS/firefox")
    }

    fn firefox_nss_pattern(&self) -> String {
        nss::children_pattern(
            &self
                .home
                .join("Library/Application Support/Firefox/Profiles"),
        )
    }

    pub fn hosts_file(&self) -> PathBuf {
        self.system_path("/etc/hosts")
    }
}

pub struct MacosDriver {
    layout: MacosLayout,
    services: PlatformServices,
    files: PermissionProtectedFiles,
}

impl MacosDriver {
    pub fn new(layout: MacosLayout, paths: ConfigPaths, services: PlatformServices) -> Self {
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

    fn is_firefox_installed(&self) -> bool {
        self.layout.firefox_bundle().exists()
    }

    /// Whether Homebrew reports the `nss` formula as installed.
    fn is_nss_installed(&self) -> bool {
        if !self.runner().command_exists(BREW) {
            return false;
        }
        match self.runner().run(&Invocation::new(BREW, ["list", "-1"])) {
            Ok(output) => output
                .stdout_text()
                .lines()
                .any(|line| line.trim() == NSS_FORMULA),
            Err(e) => {
                debug!(error = %e, "brew list failed");
                false
            }
        }
    }

    /// Absolute path to Homebrew's certutil, falling back to `PATH` lookup.
    fn certutil_path(&self) -> String {
        match self
            .runner()
            .run(&Invocation::new(BREW, ["--prefix", NSS_FORMULA]))
        {
            Ok(output) => {
                let prefix = output.stdout_text().trim().to_string();
                if prefix.is_empty() {
                    "certutil".to_string()
                } else {
                    Path::new(&prefix)
                        .join("bin")
                        .join("certutil")
                        .display()
                        .to_string()
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not locate Homebrew nss prefix");
                "certutil".to_string()
            }
        }
    }

    /// Resolve certutil for Firefox, installing nss through Homebrew when allowed.
    fn ensure_certutil(&self, options: &TrustOptions) -> Option<String> {
        if self.is_nss_installed() {
            return Some(self.certutil_path());
        }
        if options.skip_certutil_install {
            debug!("nss missing and automatic install disabled");
            return None;
        }
        if !self.runner().command_exists(BREW) {
            debug!("Homebrew unavailable, cannot install nss");
            return None;
        }
        match self
            .runner()
            .run(&Invocation::new(BREW, ["install", NSS_FORMULA]))
        {
            Ok(_) => Some(self.certutil_path()),
            Err(e) => {
                warn!(error = %e, "Failed to install nss with Homebrew");
                None
            }
        }
    }
}

#[async_trait]
impl TrustStoreDriver for MacosDriver {
    async fn add_to_trust_stores(&self, cert_path: &Path, options: &TrustOptions) -> Result<()> {
        debug!("Adding devcert root CA to the macOS system keychain");
        let add = Invocation::elevated(
            "security",
            [
                "add-trusted-cert".to_string(),
                "-d".to_string(),
                "-r".to_string(),
                "trustRoot".to_string(),
                "-k".to_string(),
                SYSTEM_KEYCHAIN.to_string(),
                "-p".to_string(),
                "ssl".to_string(),
                "-p".to_string(),
                "basic".to_string(),
                cert_path.display().to_string(),
            ],
        );
        if let Err(e) = self.runner().run(&add) {
            warn!(error = %e, "Failed to add CA to the system keychain");
        }

        if !self.is_firefox_installed() {
            return Ok(());
        }
        match self.ensure_certutil(options) {
            Some(certutil) => {
                ensure_firefox_closed(self.services.probe.as_ref(), self.services.ui.as_ref())
                    .await;
                nss::install_into(
                    self.runner(),
                    &self.layout.firefox_nss_pattern(),
                    cert_path,
                    &certutil,
                );
            }
            None => {
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
        Ok(())
    }

    async fn remove_from_trust_stores(&self, cert_path: &Path) -> Result<()> {
        let remove = Invocation::elevated(
            "security",
            [
                "remove-trusted-cert".to_string(),
                "-d".to_string(),
                cert_path.display().to_string(),
            ],
        );
        if let Err(e) = self.runner().run(&remove) {
            warn!(error = %e, "Failed to remove CA from the system keychain");
        }

        if self.is_firefox_installed() && self.is_nss_installed() {
            let certutil = self.certutil_path();
            ensure_firefox_closed(self.services.probe.as_ref(), self.services.ui.as_ref()).await;
            nss::remove_from(
                self.runner(),
                &self.layout.firefox_nss_pattern(),
                cert_path,
                &certutil,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProbe, RecordingRunner, ScriptedUi, UiEvent};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        home: PathBuf,
        cert: PathBuf,
        runner: Arc<RecordingRunner>,
        ui: Arc<ScriptedUi>,
        probe: Arc<FakeProbe>,
        driver: MacosDriver,
    }

    fn fixture(firefox_running_checks: usize) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        let home = temp.path().join("home");
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::create_dir_all(&home).unwrap();
        let cert = temp.path().join("certificate.cert");
        fs::write(&cert, "pem").unwrap();

        let runner = Arc::new(RecordingRunner::new());
        let ui = Arc::new(ScriptedUi::new());
        let probe = Arc::new(FakeProbe::running_for(firefox_running_checks));
        let services = PlatformServices {
            runner: runner.clone(),
            ui: ui.clone(),
            probe: probe.clone(),
        };
        let paths = ConfigPaths::new(temp.path().join("config"), temp.path().join("legacy"));
        let driver = MacosDriver::new(MacosLayout::rooted(&root, &home), paths, services);
        Fixture {
            _temp: temp,
            root,
            home,
            cert,
            runner,
            ui,
            probe,
            driver,
        }
    }

    fn install_firefox(fx: &Fixture) -> PathBuf {
        fs::create_dir_all(fx.root.join("Applications/Firefox.app/Contents/MacOS")).unwrap();
        let profile = fx
            .home
            .join("Library/Application Support/Firefox/Profiles/xyz.default-release");
        fs::create_dir_all(&profile).unwrap();
        fs::write(profile.join("cert9.db"), "").unwrap();
        profile
    }

    fn with_brew_nss(fx: &Fixture) {
        fx.runner.make_available("brew");
        fx.runner.respond_with("brew list -1", "openssl@3\nnss\nwget\n");
        fx.runner
            .respond_with("brew --prefix nss", "/opt/homebrew/opt/nss\n");
    }

    #[tokio::test]
    async fn adds_to_system_keychain_exactly_once() {
        let fx = fixture(0);

        fx.driver
            .add_to_trust_stores(&fx.cert, &TrustOptions::default())
            .await
            .unwrap();

        assert_eq!(fx.runner.count_containing("security add-trusted-cert"), 1);
        let commands = fx.runner.commands();
        assert_eq!(
            commands[0],
            format!(
                "sudo security add-trusted-cert -d -r trustRoot -k {SYSTEM_KEYCHAIN} -p ssl -p basic {}",
                fx.cert.display()
            )
        );
    }

    #[tokio::test]
    async fn keychain_failure_does_not_stop_firefox() {
        let fx = fixture(0);
        let profile = install_firefox(&fx);
        with_brew_nss(&fx);
        fx.runner.fail_when_contains("add-trusted-cert");

        fx.driver
            .add_to_trust_stores(&fx.cert, &TrustOptions::default())
            .await
            .unwrap();

        let address = format!("sql:{}", profile.display());
        assert_eq!(fx.runner.nss_nickname_count(&address, nss::NSS_NICKNAME), 1);
    }

    #[tokio::test]
    async fn firefox_uses_homebrew_certutil_after_it_closes() {
        let fx = fixture(2);
        install_firefox(&fx);
        with_brew_nss(&fx);

        fx.driver
            .add_to_trust_stores(&fx.cert, &TrustOptions::default())
            .await
            .unwrap();

        let certutil_runs: Vec<_> = fx
            .runner
            .invocations()
            .into_iter()
            .filter(|inv| inv.args.first().map(String::as_str) == Some("-A"))
            .collect();
        assert_eq!(certutil_runs.len(), 1);
        assert_eq!(certutil_runs[0].program, "/opt/homebrew/opt/nss/bin/certutil");
        assert_eq!(fx.ui.events(), vec![UiEvent::CloseFirefoxPrompt]);
        assert!(fx.probe.checks() >= 3);
        assert_eq!(fx.runner.count_containing("brew install"), 0);
    }

    #[tokio::test]
    async fn installing_twice_leaves_one_nss_entry() {
        let fx = fixture(0);
        let profile = install_firefox(&fx);
        with_brew_nss(&fx);

        for _ in 0..2 {
            fx.driver
                .add_to_trust_stores(&fx.cert, &TrustOptions::default())
                .await
                .unwrap();
        }

        let address = format!("sql:{}", profile.display());
        assert_eq!(fx.runner.nss_nickname_count(&address, nss::NSS_NICKNAME), 1);
    }

    #[tokio::test]
    async fn missing_nss_is_installed_with_homebrew() {
        let fx = fixture(0);
        install_firefox(&fx);
        fx.runner.make_available("brew");

        fx.driver
            .add_to_trust_stores(&fx.cert, &TrustOptions::default())
            .await
            .unwrap();

        assert_eq!(fx.runner.count_containing("brew install nss"), 1);
        assert!(fx.runner.spawned().is_empty());
    }

    #[tokio::test]
    async fn without_homebrew_firefox_gets_the_wizard() {
        let fx = fixture(0);
        install_firefox(&fx);

        fx.driver
            .add_to_trust_stores(&fx.cert, &TrustOptions::default())
            .await
            .unwrap();

        let spawned = fx.runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].program.ends_with("Firefox.app/Contents/MacOS/firefox"));
        assert!(spawned[0].args[0].starts_with("http://localhost:"));
        assert!(fx.ui.events().contains(&UiEvent::WizardFinished));
    }

    #[tokio::test]
    async fn skip_flag_prevents_homebrew_install() {
        let fx = fixture(0);
        install_firefox(&fx);
        fx.runner.make_available("brew");
        let options = TrustOptions {
            skip_certutil_install: true,
        };

        fx.driver.add_to_trust_stores(&fx.cert, &options).await.unwrap();

        assert_eq!(fx.runner.count_containing("brew install"), 0);
        assert_eq!(fx.runner.spawned().len(), 1);
    }

    #[tokio::test]
    async fn removal_mirrors_install() {
        let fx = fixture(0);
        let profile = install_firefox(&fx);
        with_brew_nss(&fx);

        fx.driver
            .add_to_trust_stores(&fx.cert, &TrustOptions::default())
            .await
            .unwrap();
        fx.driver.remove_from_trust_stores(&fx.cert).await.unwrap();

        assert_eq!(
            fx.runner.count_containing("sudo security remove-trusted-cert -d"),
            1
        );
        let address = format!("sql:{}", profile.display());
        assert_eq!(fx.runner.nss_nickname_count(&address, nss::NSS_NICKNAME), 0);
    }

    #[tokio::test]
    async fn hosts_file_left_untouched_when_domain_present() {
        let fx = fixture(0);
        let hosts = fx.root.join("etc/hosts");
        let before = "127.0.0.1 localhost\n127.0.0.1 app.test\n";
        fs::write(&hosts, before).unwrap();

        fx.driver
            .add_domain_to_hosts_file_if_missing("app.test")
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&hosts).unwrap(), before);
        assert!(fx.runner.invocations().is_empty());

        fx.driver
            .add_domain_to_hosts_file_if_missing("other.test")
            .await
            .unwrap();
        assert_eq!(
            fs::read_to_string(&hosts).unwrap(),
            format!("{before}127.0.0.1 other.test\n")
        );
    }
}
