use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ProtectedFileStore, remove_path};
use crate::command::{CommandRunner, Invocation};
use crate::error::{DevcertError, Result};
use crate::paths::ConfigPaths;

/// Protection through owner-only permission bits, escalating with `sudo`
/// when a file was left behind owned by root.
pub struct PermissionProtectedFiles {
    paths: ConfigPaths,
    runner: Arc<dyn CommandRunner>,
}

impl PermissionProtectedFiles {
    pub fn new(paths: ConfigPaths, runner: Arc<dyn CommandRunner>) -> Self {
        Self { paths, runner }
    }

    fn elevated(&self, program: &str, args: &[&str], path: &Path) -> Result<Vec<u8>> {
        let mut all: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        all.push(path.display().to_string());
        self.runner
            .run(&Invocation::elevated(program, all))
            .map(|out| out.stdout)
    }
}

#[async_trait]
impl ProtectedFileStore for PermissionProtectedFiles {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.paths.assert_contains(path, "read")?;
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                debug!(path = %path.display(), "Reading protected file with sudo");
                self.elevated("cat", &[], path)
            }
            Err(e) => Err(DevcertError::FileRead(path.to_path_buf(), e)),
        }
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.paths.assert_contains(path, "write")?;

        match remove_path(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                self.elevated("rm", &["-f"], path)?;
            }
            Err(e) => return Err(DevcertError::FileWrite(path.to_path_buf(), e)),
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DevcertError::FileWrite(parent.to_path_buf(), e))?;
        }

        match write_owner_only(path, contents) {
            Err(DevcertError::FileWrite(_, e)) if e.kind() == ErrorKind::PermissionDenied => {
                debug!(path = %path.display(), "Writing protected file with sudo");
                let target = path.display().to_string();
                self.runner
                    .run(&Invocation::elevated("tee", [target.clone()]).with_stdin(contents))?;
                self.runner
                    .run(&Invocation::elevated("chmod", ["600".to_string(), target]))?;
                Ok(())
            }
            other => other,
        }
    }

    fn delete(&self, path: &Path) -> Result<()> {
        self.paths.assert_contains(path, "delete")?;
        match remove_path(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                if let Err(e) = self.elevated("rm", &["-rf"], path) {
                    warn!(path = %path.display(), error = %e, "Failed to delete protected path");
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete protected path"),
        }
        Ok(())
    }
}

/// Create `path` fresh with owner-only permissions.
pub(crate) fn write_owner_only(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .map_err(|e| DevcertError::FileWrite(path.to_path_buf(), e))?;
    file.write_all(contents)
        .map_err(|e| DevcertError::FileWrite(path.to_path_buf(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| DevcertError::FileWrite(path.to_path_buf(), e))?;
    }

    Ok(())
}
