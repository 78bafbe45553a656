//! Gated access to private key material under the config root.
//!
//! Every operation checks path containment before touching the filesystem.

mod encrypted;
mod permissions;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub use encrypted::EncryptedProtectedFiles;
pub use permissions::PermissionProtectedFiles;
pub(crate) use permissions::write_owner_only;

#[async_trait]
pub trait ProtectedFileStore: Send + Sync {
    /// A missing file is an error.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Replace any existing file.
    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Remove a file or directory tree. Failures other than containment are logged and ignored.
    fn delete(&self, path: &Path) -> Result<()>;
}

/// Remove `path` if present. Directories are removed recursively.
fn remove_path(path: &Path) -> std::io::Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
