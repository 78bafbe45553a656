use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by certificate authority and trust-store operations
#[derive(Debug, Error)]
pub enum DevcertError {
    #[error("Refusing to {operation} {path}: path is outside the devcert config directory")]
    PathOutsideConfigRoot { operation: &'static str, path: PathBuf },

    #[error("{0}")]
    UnsupportedPlatformState(String),

    #[error("Command `{command}` failed: {message}")]
    ExternalToolFailure { command: String, message: String },

    #[error("Failed to decrypt protected file: {0}")]
    DecryptionFailure(String),

    #[error("Failed to encrypt protected file: {0}")]
    Encryption(String),

    #[error("Failed to launch browser: {0}")]
    BrowserLaunchFailure(String),

    #[error("Certificate error: {0}")]
    Signing(String),

    #[error("Invalid domain name '{0}'")]
    InvalidDomain(String),

    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to write file {0}: {1}")]
    FileWrite(PathBuf, std::io::Error),

    #[error("Invalid config {0}: {1}")]
    Config(PathBuf, String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DevcertError>;

impl DevcertError {
    pub(crate) fn tool(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            command: command.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_outside_root_names_operation_and_path() {
        let err = DevcertError::PathOutsideConfigRoot {
            operation: "delete",
            path: PathBuf::from("/etc/passwd"),
        };
        let message = err.to_string();
        assert!(message.contains("delete"));
        assert!(message.contains("/etc/passwd"));
    }

    #[test]
    fn unsupported_platform_state_is_displayed_verbatim() {
        let err = DevcertError::UnsupportedPlatformState("Unknown linux distro: Arch Linux".into());
        assert_eq!(err.to_string(), "Unknown linux distro: Arch Linux");
    }

    #[test]
    fn tool_failure_includes_command() {
        let err = DevcertError::tool("sudo update-ca-trust", "exit status 1");
        assert_eq!(
            err.to_string(),
            "Command `sudo update-ca-trust` failed: exit status 1"
        );
    }
}
