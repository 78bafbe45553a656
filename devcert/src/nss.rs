//! NSS certificate database discovery and mutation.
//!
//! Firefox profiles and Chrome's Linux profile keep their own trust stores.
//! They are rediscovered from the filesystem on every call.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::command::{CommandRunner, Invocation};

/// Fixed nickname, so re-adding replaces rather than duplicates.
pub const NSS_NICKNAME: &str = "devcert";

/// Trusted CA for TLS, no other trust bits.
pub const NSS_TRUST_FLAGS: &str = "C,,";

const LEGACY_MARKER: &str = "cert8.db";
const MODERN_MARKER: &str = "cert9.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NssFormat {
    /// Berkeley DB (`cert8.db`), addressed by bare path.
    Legacy,
    /// SQLite (`cert9.db`), addressed as `sql:<dir>`.
    Modern,
}

impl NssFormat {
    fn marker(self) -> &'static str {
        match self {
            NssFormat::Legacy => LEGACY_MARKER,
            NssFormat::Modern => MODERN_MARKER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NssDatabase {
    pub dir: PathBuf,
    pub format: NssFormat,
}

impl NssDatabase {
    /// The `-d` argument for certutil.
    pub fn address(&self) -> String {
        match self.format {
            NssFormat::Legacy => self.dir.display().to_string(),
            NssFormat::Modern => format!("sql:{}", self.dir.display()),
        }
    }
}

/// Glob pattern matching every direct child of `dir`.
pub fn children_pattern(dir: &Path) -> String {
    format!(
        "{}/*",
        glob::Pattern::escape(&dir.display().to_string())
    )
}

/// Glob pattern matching exactly `dir`.
pub fn exact_pattern(dir: &Path) -> String {
    glob::Pattern::escape(&dir.display().to_string())
}

/// Expand `pattern` and classify each matched directory. A directory with
/// both markers yields one entry per format.
pub fn discover(pattern: &str) -> Vec<NssDatabase> {
    let entries = match glob::glob(pattern) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(pattern, error = %e, "Invalid NSS profile pattern");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for dir in entries.flatten().filter(|p| p.is_dir()) {
        for format in [NssFormat::Legacy, NssFormat::Modern] {
            if dir.join(format.marker()).exists() {
                found.push(NssDatabase {
                    dir: dir.clone(),
                    format,
                });
            }
        }
    }
    found
}

pub fn for_each_nss_database(pattern: &str, mut visit: impl FnMut(&NssDatabase)) {
    for db in discover(pattern) {
        visit(&db);
    }
}

pub fn add_invocation(certutil: &str, db: &NssDatabase, cert_path: &Path) -> Invocation {
    Invocation::new(
        certutil,
        [
            "-A".to_string(),
            "-d".to_string(),
            db.address(),
            "-t".to_string(),
            NSS_TRUST_FLAGS.to_string(),
            "-i".to_string(),
            cert_path.display().to_string(),
            "-n".to_string(),
            NSS_NICKNAME.to_string(),
        ],
    )
}

pub fn remove_invocation(certutil: &str, db: &NssDatabase) -> Invocation {
    Invocation::new(
        certutil,
        [
            "-D".to_string(),
            "-d".to_string(),
            db.address(),
            "-n".to_string(),
            NSS_NICKNAME.to_string(),
        ],
    )
}

/// Add the certificate to every database under `pattern`. Returns how many
/// databases accepted it.
pub fn install_into(
    runner: &dyn CommandRunner,
    pattern: &str,
    cert_path: &Path,
    certutil: &str,
) -> usize {
    let mut installed = 0;
    for_each_nss_database(pattern, |db| {
        debug!(database = %db.address(), "Adding devcert to NSS database");
        match runner.run(&add_invocation(certutil, db, cert_path)) {
            Ok(_) => installed += 1,
            Err(e) => warn!(database = %db.address(), error = %e, "Failed to add certificate to NSS database"),
        }
    });
    installed
}

/// Remove the certificate from every database under `pattern`. Nothing is
/// attempted once the certificate file itself is gone.
pub fn remove_from(
    runner: &dyn CommandRunner,
    pattern: &str,
    cert_path: &Path,
    certutil: &str,
) -> usize {
    if !cert_path.exists() {
        debug!(cert = %cert_path.display(), "Certificate missing, skipping NSS removal");
        return 0;
    }

    let mut removed = 0;
    for_each_nss_database(pattern, |db| {
        debug!(database = %db.address(), "Removing devcert from NSS database");
        match runner.run(&remove_invocation(certutil, db)) {
            Ok(_) => removed += 1,
            Err(e) => warn!(database = %db.address(), error = %e, "Failed to remove certificate from NSS database"),
        }
    });
    removed
}
