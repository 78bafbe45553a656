//! Root certificate authority lifecycle.
//!
//! The CA lives under `<config>/certificate-authority/`:
//! - `private-key.key` is written through the driver's protected store
//! - `certificate.cert` is always a plain, world-readable file
//! - `serial` and `index.txt` are OpenSSL-style issuance bookkeeping
//!
//! Installing always starts from a full uninstall so no stale trust-store
//! entry can outlive the key it was made for.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{CaOptions, TrustOptions};
use crate::error::{DevcertError, Result};
use crate::paths::ConfigPaths;
use crate::platform::TrustStoreDriver;
use crate::protected::write_owner_only;
use crate::signing::{CaKeyMaterial, SigningAuthority};

/// On-disk layout version written to `devcert-ca-version`.
pub const CA_VERSION: &str = "2";

/// First serial handed out after install.
pub const INITIAL_SERIAL: &str = "01";

pub struct CertificateAuthority {
    pub(crate) paths: ConfigPaths,
    pub(crate) driver: Arc<dyn TrustStoreDriver>,
    pub(crate) signer: Arc<dyn SigningAuthority>,
}

fn write_plain(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).map_err(|e| DevcertError::FileWrite(path.to_path_buf(), e))
}

impl CertificateAuthority {
    pub fn new(
        paths: ConfigPaths,
        driver: Arc<dyn TrustStoreDriver>,
        signer: Arc<dyn SigningAuthority>,
    ) -> Self {
        Self {
            paths,
            driver,
            signer,
        }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn driver(&self) -> &dyn TrustStoreDriver {
        self.driver.as_ref()
    }

    /// Path to the root certificate, for tools that want to trust it directly.
    pub fn ca_certificate_path(&self) -> PathBuf {
        self.paths.ca_cert_path()
    }

    pub fn read_ca_certificate(&self) -> Result<String> {
        let path = self.paths.ca_cert_path();
        fs::read_to_string(&path).map_err(|e| DevcertError::FileRead(path, e))
    }

    /// Both the key and the certificate are on disk.
    pub fn is_installed(&self) -> bool {
        self.paths.ca_key_path().exists() && self.paths.ca_cert_path().exists()
    }

    /// Replace any existing CA with a fresh one and trust it everywhere.
    ///
    /// Key or certificate generation failure aborts before any trust store is
    /// touched. Trust-store failures are per-store and only logged, except for
    /// an unsupported platform which is returned.
    pub async fn install(&self, trust: &TrustOptions, ca: &CaOptions) -> Result<()> {
        debug!(validity_days = ca.validity_days, "Installing root certificate authority");
        self.uninstall().await?;
        self.paths.ensure_dirs()?;

        let root = self.signer.generate_root(ca.validity_days)?;

        let cert_path = self.paths.ca_cert_path();
        write_plain(&cert_path, root.cert_pem.as_bytes())?;
        write_plain(&self.paths.version_path(), CA_VERSION.as_bytes())?;
        write_plain(&self.paths.serial_path(), INITIAL_SERIAL.as_bytes())?;
        write_plain(&self.paths.index_path(), b"")?;

        self.driver
            .write_protected(&self.paths.ca_key_path(), root.key_pem.as_bytes())
            .await?;

        self.driver.add_to_trust_stores(&cert_path, trust).await?;
        debug!(cert = %cert_path.display(), "Root certificate authority installed");
        Ok(())
    }

    /// Remove trust-store entries and every CA, domain and legacy directory.
    ///
    /// Each step is attempted regardless of earlier failures. `devcert.toml`
    /// is kept.
    pub async fn uninstall(&self) -> Result<()> {
        debug!("Uninstalling root certificate authority");
        let cert_path = self.paths.ca_cert_path();
        if let Err(e) = self.driver.remove_from_trust_stores(&cert_path).await {
            warn!(error = %e, "Failed to remove CA from trust stores");
        }

        for dir in self.paths.uninstall_dirs() {
            if let Err(e) = self.driver.delete_protected(&dir) {
                warn!(path = %dir.display(), error = %e, "Failed to delete directory");
            }
        }
        Ok(())
    }

    /// Migrate installs whose certificate was stored like a private key.
    ///
    /// A valid certificate is left alone. Otherwise it is read back through the
    /// protected store and rewritten as a plain file; if that does not produce
    /// a valid certificate the CA is reinstalled.
    pub async fn repair_readability(&self, trust: &TrustOptions, ca: &CaOptions) -> Result<()> {
        let cert_path = self.paths.ca_cert_path();
        if self.signer.validate_certificate(&cert_path).is_ok() {
            return Ok(());
        }

        debug!(cert = %cert_path.display(), "CA certificate unreadable, repairing");
        match self.rewrite_as_plain(&cert_path).await {
            Ok(()) if self.signer.validate_certificate(&cert_path).is_ok() => {
                debug!("CA certificate repaired");
                return Ok(());
            }
            Ok(()) => warn!("CA certificate still invalid after repair"),
            Err(e) => warn!(error = %e, "Could not repair CA certificate"),
        }
        self.install(trust, ca).await
    }

    async fn rewrite_as_plain(&self, cert_path: &Path) -> Result<()> {
        let contents = self.driver.read_protected(cert_path).await?;
        self.driver.delete_protected(cert_path)?;
        write_plain(cert_path, &contents)
    }

    /// Install when no CA exists, otherwise repair the existing one.
    pub async fn ensure_installed(&self, trust: &TrustOptions, ca: &CaOptions) -> Result<()> {
        if self.is_installed() {
            self.repair_readability(trust, ca).await
        } else {
            self.install(trust, ca).await
        }
    }

    /// Run `f` with the CA key materialized in a private temporary file.
    ///
    /// The temporary copy is removed before returning, whatever `f` returns.
    pub async fn with_ca_key_material<T>(
        &self,
        f: impl FnOnce(&CaKeyMaterial) -> Result<T>,
    ) -> Result<T> {
        let key = self
            .driver
            .read_protected(&self.paths.ca_key_path())
            .await?;

        let scratch = tempfile::Builder::new().prefix("devcert-").tempdir()?;
        let material = CaKeyMaterial {
            key_path: scratch.path().join("ca.key"),
            cert_path: self.paths.ca_cert_path(),
        };
        let result = write_owner_only(&material.key_path, &key).and_then(|()| f(&material));

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(path = %scratch_path.display(), error = %e, "Failed to remove temporary CA key");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{DomainRequest, GeneratedRoot, IssuedCertificate, RcgenSigner};
    use crate::testing::{RecordingDriver, TrustEvent};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        paths: ConfigPaths,
        driver: Arc<RecordingDriver>,
        ca: CertificateAuthority,
    }

    fn fixture_with(signer: Arc<dyn SigningAuthority>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::new(temp.path().join("config"), temp.path().join("legacy"));
        let driver = Arc::new(RecordingDriver::new(paths.clone()));
        let ca = CertificateAuthority::new(paths.clone(), driver.clone(), signer);
        Fixture {
            _temp: temp,
            paths,
            driver,
            ca,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(RcgenSigner))
    }

    struct BrokenSigner;

    impl SigningAuthority for BrokenSigner {
        fn generate_root(&self, _validity_days: u32) -> Result<GeneratedRoot> {
            Err(DevcertError::Signing("no entropy".to_string()))
        }

        fn validate_certificate(&self, _cert_path: &Path) -> Result<()> {
            Err(DevcertError::Signing("invalid".to_string()))
        }

        fn sign_domain(
            &self,
            _request: &DomainRequest,
            _ca: &CaKeyMaterial,
        ) -> Result<IssuedCertificate> {
            Err(DevcertError::Signing("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn install_writes_bookkeeping_files() {
        let fx = fixture();

        fx.ca
            .install(&TrustOptions::default(), &CaOptions::default())
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(fx.paths.serial_path()).unwrap(), "01");
        assert_eq!(fs::read_to_string(fx.paths.index_path()).unwrap(), "");
        assert_eq!(fs::read_to_string(fx.paths.version_path()).unwrap(), "2");
        assert!(fx.ca.read_ca_certificate().unwrap().contains("BEGIN CERTIFICATE"));
        assert!(fx.paths.ca_key_path().exists());
        assert_eq!(fx.driver.adds(), 1);
    }

    #[tokio::test]
    async fn install_always_uninstalls_first() {
        let fx = fixture();

        fx.ca
            .install(&TrustOptions::default(), &CaOptions::default())
            .await
            .unwrap();

        let cert = fx.paths.ca_cert_path();
        assert_eq!(
            fx.driver.events(),
            vec![TrustEvent::Remove(cert.clone()), TrustEvent::Add(cert)]
        );
    }

    #[tokio::test]
    async fn reinstall_replaces_the_root() {
        let fx = fixture();
        let (trust, ca) = (TrustOptions::default(), CaOptions::default());

        fx.ca.install(&trust, &ca).await.unwrap();
        let first = fx.ca.read_ca_certificate().unwrap();
        let domain_dir = fx.paths.domain_dir("app.test");
        fs::create_dir_all(&domain_dir).unwrap();

        fx.ca.install(&trust, &ca).await.unwrap();

        assert_ne!(fx.ca.read_ca_certificate().unwrap(), first);
        assert!(!domain_dir.exists());
        assert_eq!(fx.driver.adds(), 2);
        assert_eq!(fx.driver.removes(), 2);
    }

    #[tokio::test]
    async fn generation_failure_aborts_before_trusting() {
        let fx = fixture_with(Arc::new(BrokenSigner));

        let err = fx
            .ca
            .install(&TrustOptions::default(), &CaOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DevcertError::Signing(_)));
        assert_eq!(fx.driver.adds(), 0);
        assert!(!fx.paths.ca_key_path().exists());
    }

    #[tokio::test]
    async fn uninstall_removes_all_directories() {
        let fx = fixture();
        fx.ca
            .install(&TrustOptions::default(), &CaOptions::default())
            .await
            .unwrap();
        fs::create_dir_all(fx.paths.legacy_root().join("certificate-authority")).unwrap();

        fx.ca.uninstall().await.unwrap();

        assert!(!fx.paths.ca_dir().exists());
        assert!(!fx.paths.domains_dir().exists());
        assert!(!fx.paths.legacy_root().exists());
        assert!(matches!(fx.driver.events().last(), Some(TrustEvent::Remove(_))));
    }

    #[tokio::test]
    async fn settings_survive_when_legacy_root_is_the_config_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("devcert");
        let paths = ConfigPaths::new(&root, &root);
        let driver = Arc::new(RecordingDriver::new(paths.clone()));
        let ca = CertificateAuthority::new(paths.clone(), driver.clone(), Arc::new(RcgenSigner));
        let (trust, ca_options) = (TrustOptions::default(), CaOptions::default());
        fs::create_dir_all(&root).unwrap();
        fs::write(paths.settings_path(), "[ca]\nvalidity_days = 400\n").unwrap();

        ca.install(&trust, &ca_options).await.unwrap();
        assert!(paths.settings_path().exists());
        assert!(ca.is_installed());

        fs::create_dir_all(paths.domain_dir("app.test")).unwrap();
        ca.uninstall().await.unwrap();

        assert_eq!(
            fs::read_to_string(paths.settings_path()).unwrap(),
            "[ca]\nvalidity_days = 400\n"
        );
        assert!(!paths.ca_dir().exists());
        assert!(!paths.domains_dir().exists());
    }

    #[tokio::test]
    async fn ensure_installed_reinstalls_when_certificate_is_missing() {
        let fx = fixture();
        let (trust, ca) = (TrustOptions::default(), CaOptions::default());
        fx.ca.install(&trust, &ca).await.unwrap();
        fs::remove_file(fx.paths.ca_cert_path()).unwrap();
        assert!(!fx.ca.is_installed());

        fx.ca.ensure_installed(&trust, &ca).await.unwrap();

        assert!(fx.ca.is_installed());
        assert_eq!(fx.driver.adds(), 2);
    }

    #[tokio::test]
    async fn uninstall_without_install_succeeds() {
        let fx = fixture();
        fx.ca.uninstall().await.unwrap();
        assert_eq!(fx.driver.removes(), 1);
    }

    #[tokio::test]
    async fn repair_leaves_valid_install_alone() {
        let fx = fixture();
        let (trust, ca) = (TrustOptions::default(), CaOptions::default());
        fx.ca.install(&trust, &ca).await.unwrap();
        let before = fx.ca.read_ca_certificate().unwrap();

        fx.ca.repair_readability(&trust, &ca).await.unwrap();

        assert_eq!(fx.ca.read_ca_certificate().unwrap(), before);
        assert_eq!(fx.driver.adds(), 1);
    }

    #[tokio::test]
    async fn repair_reinstalls_when_certificate_is_unusable() {
        let fx = fixture();
        let (trust, ca) = (TrustOptions::default(), CaOptions::default());
        fx.ca.install(&trust, &ca).await.unwrap();
        fs::write(fx.paths.ca_cert_path(), "garbage").unwrap();

        fx.ca.repair_readability(&trust, &ca).await.unwrap();

        assert!(RcgenSigner.validate_certificate(&fx.paths.ca_cert_path()).is_ok());
        assert_eq!(fx.driver.adds(), 2);
    }

    #[tokio::test]
    async fn ensure_installed_installs_once() {
        let fx = fixture();
        let (trust, ca) = (TrustOptions::default(), CaOptions::default());

        fx.ca.ensure_installed(&trust, &ca).await.unwrap();
        fx.ca.ensure_installed(&trust, &ca).await.unwrap();

        assert_eq!(fx.driver.adds(), 1);
    }

    #[tokio::test]
    async fn key_material_is_scoped_to_the_callback() {
        let fx = fixture();
        fx.ca
            .install(&TrustOptions::default(), &CaOptions::default())
            .await
            .unwrap();

        let seen = fx
            .ca
            .with_ca_key_material(|material| {
                let key = fs::read_to_string(&material.key_path).unwrap();
                assert!(key.contains("PRIVATE KEY"));
                assert_eq!(material.cert_path, fx.paths.ca_cert_path());
                Ok(material.key_path.clone())
            })
            .await
            .unwrap();

        assert!(!seen.exists());
        assert!(!seen.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn key_material_is_removed_when_callback_fails() {
        let fx = fixture();
        fx.ca
            .install(&TrustOptions::default(), &CaOptions::default())
            .await
            .unwrap();

        let mut seen = None;
        let result: Result<()> = fx
            .ca
            .with_ca_key_material(|material| {
                seen = Some(material.key_path.clone());
                Err(DevcertError::Signing("callback failed".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert!(!seen.unwrap().exists());
    }

    #[tokio::test]
    async fn key_material_requires_an_installed_ca() {
        let fx = fixture();
        let result = fx.ca.with_ca_key_material(|_| Ok(())).await;
        assert!(matches!(result, Err(DevcertError::FileRead(..))));
    }
}
