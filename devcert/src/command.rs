//! External command execution.
//!
//! Every shell-out goes through [`CommandRunner`] so trust-store drivers can
//! be exercised against a recording double.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{DevcertError, Result};

/// A single program invocation. Arguments are passed verbatim, never through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    /// Run `program` through `sudo`.
    pub fn elevated<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = vec![program.into()];
        all.extend(args.into_iter().map(Into::into));
        Self::new("sudo", all)
    }

    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The program and arguments, without a leading `sudo`.
    pub fn unelevated(&self) -> (&str, &[String]) {
        match self.args.split_first() {
            Some((program, rest)) if self.program == "sudo" => (program.as_str(), rest),
            _ => (self.program.as_str(), self.args.as_slice()),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run to completion. A non-zero exit is an error.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Start without waiting for the process to exit.
    fn spawn(&self, invocation: &Invocation) -> Result<()>;

    fn command_exists(&self, program: &str) -> bool;
}

/// Runs real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!(command = %invocation, "Running command");
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match &invocation.stdin {
            None => command
                .stdin(Stdio::inherit())
                .output()
                .map_err(|e| DevcertError::tool(invocation.to_string(), e.to_string()))?,
            Some(input) => {
                let mut child = command
                    .stdin(Stdio::piped())
                    .spawn()
                    .map_err(|e| DevcertError::tool(invocation.to_string(), e.to_string()))?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin
                        .write_all(input)
                        .map_err(|e| DevcertError::tool(invocation.to_string(), e.to_string()))?;
                }
                child
                    .wait_with_output()
                    .map_err(|e| DevcertError::tool(invocation.to_string(), e.to_string()))?
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim()
            } else {
                stderr.trim()
            };
            let message = if detail.is_empty() {
                output.status.to_string()
            } else {
                format!("{}: {}", output.status, detail)
            };
            return Err(DevcertError::tool(invocation.to_string(), message));
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn spawn(&self, invocation: &Invocation) -> Result<()> {
        debug!(command = %invocation, "Spawning command");
        Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|e| DevcertError::tool(invocation.to_string(), e.to_string()))
    }

    fn command_exists(&self, program: &str) -> bool {
        let path_var = std::env::var_os("PATH");
        find_in_path(program, path_var.as_deref()).is_some()
    }
}

/// Locate an executable the way a shell would, without running it.
pub(crate) fn find_in_path(program: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    let extensions: &[&str] = if cfg!(windows) {
        &["", ".exe", ".cmd", ".bat"]
    } else {
        &[""]
    };

    std::env::split_paths(path_var?).find_map(|dir| {
        extensions.iter().find_map(|ext| {
            let candidate = dir.join(format!("{program}{ext}"));
            is_executable(&candidate).then_some(candidate)
        })
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn elevated_prefixes_sudo() {
        let inv = Invocation::elevated("update-ca-trust", Vec::<String>::new());
        assert_eq!(inv.program, "sudo");
        assert_eq!(inv.args, vec!["update-ca-trust".to_string()]);
        assert_eq!(inv.unelevated(), ("update-ca-trust", &[][..]));
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let inv = Invocation::new(
            "certutil",
            ["-d", "sql:/home/me/Library/Application Support/x", "-n", "devcert"],
        );
        assert_eq!(
            inv.to_string(),
            "certutil -d \"sql:/home/me/Library/Application Support/x\" -n devcert"
        );
    }

    #[cfg(unix)]
    #[test]
    fn find_in_path_only_matches_executables() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("certutil");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o644)).unwrap();
        let path_var = std::env::join_paths([temp.path()]).unwrap();

        assert!(find_in_path("certutil", Some(&path_var)).is_none());

        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(find_in_path("certutil", Some(&path_var)), Some(tool));
    }

    #[test]
    fn find_in_path_without_path_var_finds_nothing() {
        assert!(find_in_path("certutil", None).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_feeds_stdin_and_captures_stdout() {
        let inv = Invocation::new("cat", Vec::<String>::new()).with_stdin("hello");
        let out = SystemRunner.run(&inv).unwrap();
        assert_eq!(out.stdout_text(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_failing_command() {
        let inv = Invocation::new("sh", ["-c", "echo boom >&2; exit 3"]);
        let err = SystemRunner.run(&inv).unwrap_err();
        match err {
            DevcertError::ExternalToolFailure { message, .. } => assert!(message.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
