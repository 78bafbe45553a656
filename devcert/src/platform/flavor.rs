use std::path::PathBuf;

use crate::command::Invocation;
use crate::error::{DevcertError, Result};

/// Supported Linux distributions. Anything else is rejected rather than guessed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinuxFlavor {
    /// Carries a diagnostic naming the unrecognised distribution.
    Unknown(String),
    Ubuntu,
    Rhel7,
    Fedora,
}

/// Where the CA goes on a given flavor and how the system store is refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorDetails {
    pub ca_folders: Vec<PathBuf>,
    pub post_install_commands: Vec<Invocation>,
    pub post_removal_commands: Vec<Invocation>,
    pub nss_tools_install: Invocation,
}

/// Classify an OS-reported distribution name.
pub fn resolve_flavor(distro: &str) -> LinuxFlavor {
    match distro.trim() {
        "Red Hat Enterprise Linux Workstation" => LinuxFlavor::Rhel7,
        "Ubuntu" => LinuxFlavor::Ubuntu,
        "Fedora" | "Fedora Linux" => LinuxFlavor::Fedora,
        other => LinuxFlavor::Unknown(format!("Unknown linux distro: {other}")),
    }
}

/// The `NAME` field of an os-release file.
pub fn distro_name_from_os_release(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let value = line.trim().strip_prefix("NAME=")?;
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

impl LinuxFlavor {
    /// Folder and command sets for this flavor.
    ///
    /// `Unknown` has none; asking for them is an error every time.
    pub fn details(&self) -> Result<FlavorDetails> {
        let anchors = PathBuf::from("/etc/pki/ca-trust/source/anchors");
        match self {
            LinuxFlavor::Unknown(message) => {
                Err(DevcertError::UnsupportedPlatformState(message.clone()))
            }
            LinuxFlavor::Ubuntu => Ok(FlavorDetails {
                ca_folders: vec![anchors, PathBuf::from("/usr/local/share/ca-certificates")],
                post_install_commands: vec![update_ca_certificates()],
                post_removal_commands: vec![update_ca_certificates()],
                nss_tools_install: Invocation::elevated(
                    "apt",
                    ["install", "-y", "libnss3-tools"],
                ),
            }),
            LinuxFlavor::Rhel7 | LinuxFlavor::Fedora => Ok(FlavorDetails {
                ca_folders: vec![anchors, PathBuf::from("/usr/share/pki/ca-trust-source")],
                post_install_commands: vec![update_ca_trust()],
                post_removal_commands: vec![update_ca_trust()],
                nss_tools_install: Invocation::elevated(
                    if *self == LinuxFlavor::Rhel7 { "yum" } else { "dnf" },
                    ["install", "-y", "nss-tools"],
                ),
            }),
        }
    }
}

fn update_ca_certificates() -> Invocation {
    Invocation::elevated("update-ca-certificates", Vec::<String>::new())
}

fn update_ca_trust() -> Invocation {
    Invocation::elevated("update-ca-trust", Vec::<String>::new())
}
