use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{DevcertError, Result};

const LOOPBACK: &str = "127.0.0.1";

pub fn hosts_entry(domain: &str) -> String {
    format!("{LOOPBACK} {domain}")
}

/// Whether any non-comment line already maps `domain`, to any address.
pub fn hosts_file_mentions(contents: &str, domain: &str) -> bool {
    contents.lines().any(|line| {
        let line = line.split('#').next().unwrap_or_default();
        line.split_whitespace()
            .skip(1)
            .any(|host| host.eq_ignore_ascii_case(domain))
    })
}

/// Current hosts file contents. A missing file reads as empty.
pub(crate) fn read_hosts(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(DevcertError::FileRead(path.to_path_buf(), e)),
    }
}

/// Text to append so the file gains exactly one entry line.
pub(crate) fn hosts_addition(existing: &str, domain: &str) -> String {
    let separator = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    format!("{separator}{}\n", hosts_entry(domain))
}
