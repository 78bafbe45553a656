use std::fs;
use std::path::{Component, Path, PathBuf};
#[cfg(test)]
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::{DevcertError, Result};

/// Environment variable overriding the config root.
pub const HOME_ENV: &str = "DEVCERT_HOME";

const CA_DIR: &str = "certificate-authority";
const DOMAINS_DIR: &str = "domains";
const SETTINGS_FILE: &str = "devcert.toml";

/// Get devcert's config root.
///
/// - `DEVCERT_HOME` wins when set and non-empty.
/// - Otherwise the platform config dir, e.g. `~/.config/devcert` or
///   `~/Library/Application Support/devcert`.
pub fn config_root() -> std::result::Result<PathBuf, std::io::Error> {
    if let Ok(v) = std::env::var(HOME_ENV)
        && !v.trim().is_empty()
    {
        return Ok(PathBuf::from(v));
    }

    let base = dirs::config_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine config directory",
        )
    })?;

    Ok(base.join("devcert"))
}

/// Directory used by earlier devcert releases. It is only ever deleted.
pub fn legacy_config_root() -> std::result::Result<PathBuf, std::io::Error> {
    let home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine home directory",
        )
    })?;
    let local_app_data = std::env::var_os("LOCALAPPDATA").map(PathBuf::from);

    Ok(legacy_root_for(
        cfg!(windows),
        cfg!(target_os = "linux"),
        local_app_data.as_deref(),
        running_as_root(),
        &home,
    ))
}

pub(crate) fn legacy_root_for(
    windows: bool,
    linux: bool,
    local_app_data: Option<&Path>,
    is_root: bool,
    home: &Path,
) -> PathBuf {
    if windows && let Some(dir) = local_app_data {
        return dir.join("devcert").join("config");
    }
    let home = if linux && is_root {
        Path::new("/usr/local/share")
    } else {
        home
    };
    home.join(".config").join("devcert")
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

/// Every on-disk location devcert manages, rooted at the config directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    root: PathBuf,
    legacy_root: PathBuf,
}

impl ConfigPaths {
    pub fn new(root: impl Into<PathBuf>, legacy_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            legacy_root: legacy_root.into(),
        }
    }

    /// Resolve the real config and legacy roots for this machine.
    pub fn discover() -> Result<Self> {
        Ok(Self::new(config_root()?, legacy_config_root()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn legacy_root(&self) -> &Path {
        &self.legacy_root
    }

    pub fn ca_dir(&self) -> PathBuf {
        self.root.join(CA_DIR)
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.ca_dir().join("private-key.key")
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.ca_dir().join("certificate.cert")
    }

    pub fn serial_path(&self) -> PathBuf {
        self.ca_dir().join("serial")
    }

    pub fn index_path(&self) -> PathBuf {
        self.ca_dir().join("index.txt")
    }

    pub fn version_path(&self) -> PathBuf {
        self.root.join("devcert-ca-version")
    }

    pub fn domains_dir(&self) -> PathBuf {
        self.root.join(DOMAINS_DIR)
    }

    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        self.domains_dir().join(domain)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    /// Directories deleted on uninstall.
    ///
    /// The legacy root is skipped when the config root lives inside it, as it
    /// does on Linux where both resolve to `~/.config/devcert`.
    pub fn uninstall_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.ca_dir(), self.domains_dir()];
        if !self.root.starts_with(&self.legacy_root) {
            dirs.push(self.legacy_root.clone());
        }
        dirs
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.ca_dir(), self.domains_dir()] {
            fs::create_dir_all(&dir).map_err(|e| DevcertError::FileWrite(dir.clone(), e))?;
        }
        Ok(())
    }

    /// Reject any path that does not live under the config root or the
    /// legacy root. Paths with `..` components are always rejected.
    pub fn assert_contains(&self, path: &Path, operation: &'static str) -> Result<()> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        let inside = path.starts_with(&self.root) || path.starts_with(&self.legacy_root);
        if escapes || !inside {
            return Err(DevcertError::PathOutsideConfigRoot {
                operation,
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_home_env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .expect("DEVCERT_HOME test env lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths() -> ConfigPaths {
        ConfigPaths::new("/home/me/.config/devcert", "/home/me/.legacy/devcert")
    }

    #[test]
    fn config_root_respects_env_override() {
        let _lock = test_home_env_lock();
        let previous = std::env::var_os(HOME_ENV);
        let temp = TempDir::new().unwrap();
        unsafe {
            std::env::set_var(HOME_ENV, temp.path());
        }
        let got = config_root().unwrap();
        match previous {
            Some(value) => unsafe { std::env::set_var(HOME_ENV, value) },
            None => unsafe { std::env::remove_var(HOME_ENV) },
        }
        assert_eq!(got, temp.path());
    }

    #[test]
    fn layout_is_rooted_at_config_dir() {
        let paths = paths();
        assert_eq!(
            paths.ca_key_path(),
            PathBuf::from("/home/me/.config/devcert/certificate-authority/private-key.key")
        );
        assert_eq!(
            paths.ca_cert_path(),
            PathBuf::from("/home/me/.config/devcert/certificate-authority/certificate.cert")
        );
        assert_eq!(
            paths.version_path(),
            PathBuf::from("/home/me/.config/devcert/devcert-ca-version")
        );
        assert_eq!(
            paths.domain_dir("app.test"),
            PathBuf::from("/home/me/.config/devcert/domains/app.test")
        );
    }

    #[test]
    fn contains_paths_under_either_root() {
        let paths = paths();
        assert!(paths.assert_contains(&paths.ca_key_path(), "read").is_ok());
        assert!(
            paths
                .assert_contains(Path::new("/home/me/.legacy/devcert/old.key"), "delete")
                .is_ok()
        );
    }

    #[test]
    fn uninstall_includes_a_separate_legacy_root() {
        let paths = paths();
        assert_eq!(
            paths.uninstall_dirs(),
            vec![
                PathBuf::from("/home/me/.config/devcert/certificate-authority"),
                PathBuf::from("/home/me/.config/devcert/domains"),
                PathBuf::from("/home/me/.legacy/devcert"),
            ]
        );
    }

    #[test]
    fn uninstall_skips_legacy_root_holding_the_config_root() {
        let home = Path::new("/home/me");
        let legacy = legacy_root_for(false, true, None, false, home);
        assert_eq!(legacy, PathBuf::from("/home/me/.config/devcert"));

        let same = ConfigPaths::new("/home/me/.config/devcert", &legacy);
        assert!(!same.uninstall_dirs().contains(&legacy));

        let parent = ConfigPaths::new("/home/me/.config/devcert", "/home/me/.config");
        assert_eq!(parent.uninstall_dirs().len(), 2);
    }

    #[test]
    fn rejects_paths_outside_roots() {
        let paths = paths();
        let err = paths
            .assert_contains(Path::new("/etc/hosts"), "write")
            .unwrap_err();
        assert!(matches!(
            err,
            DevcertError::PathOutsideConfigRoot {
                operation: "write",
                ..
            }
        ));
    }

    #[test]
    fn rejects_sibling_with_shared_prefix() {
        let paths = paths();
        assert!(
            paths
                .assert_contains(Path::new("/home/me/.config/devcert-evil/key"), "read")
                .is_err()
        );
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let paths = paths();
        assert!(
            paths
                .assert_contains(Path::new("/home/me/.config/devcert/../../.ssh/id_rsa"), "read")
                .is_err()
        );
    }

    #[test]
    fn legacy_root_uses_local_app_data_on_windows() {
        let got = legacy_root_for(
            true,
            false,
            Some(Path::new("C:/Users/me/AppData/Local")),
            false,
            Path::new("C:/Users/me"),
        );
        assert_eq!(
            got,
            PathBuf::from("C:/Users/me/AppData/Local/devcert/config")
        );
    }

    #[test]
    fn legacy_root_for_linux_root_user_uses_shared_dir() {
        let got = legacy_root_for(false, true, None, true, Path::new("/root"));
        assert_eq!(got, PathBuf::from("/usr/local/share/.config/devcert"));
    }

    #[test]
    fn legacy_root_defaults_to_home_config() {
        let got = legacy_root_for(false, false, None, false, Path::new("/Users/me"));
        assert_eq!(got, PathBuf::from("/Users/me/.config/devcert"));
    }

    #[test]
    fn ensure_dirs_creates_layout() {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::new(temp.path().join("devcert"), temp.path().join("legacy"));
        paths.ensure_dirs().unwrap();
        assert!(paths.ca_dir().is_dir());
        assert!(paths.domains_dir().is_dir());
    }
}
