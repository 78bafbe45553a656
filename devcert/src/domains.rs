//! Leaf certificates for development domains, signed by the root CA.

use std::fs;
use std::io::{ErrorKind, Write};
use std::net::IpAddr;
use std::path::PathBuf;

use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::ca::{CertificateAuthority, INITIAL_SERIAL};
use crate::config::DomainOptions;
use crate::error::{DevcertError, Result};
use crate::signing::DomainRequest;

const CERT_FILE: &str = "certificate.crt";
const KEY_FILE: &str = "private-key.key";

/// Longest name DNS allows.
const MAX_DOMAIN_LEN: usize = 253;

/// A domain certificate and key as stored under `<config>/domains/<domain>/`.
#[derive(Debug, Clone)]
pub struct DomainCertificate {
    pub domain: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_pem: String,
    pub key_pem: String,
}

/// Reject names that are not plain hostnames or IP addresses.
///
/// Domains become directory names and hosts-file entries, so anything that
/// could escape a directory or split a line is refused.
pub fn validate_domain(domain: &str) -> Result<()> {
    let invalid = || -> Result<()> { Err(DevcertError::InvalidDomain(domain.to_string())) };

    if domain.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return invalid();
    }
    for label in domain.split('.') {
        let valid_label = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid_label {
            return invalid();
        }
    }
    Ok(())
}

/// Names the certificate covers: each name plus its wildcard, without duplicates.
fn subject_alt_names(domain: &str, alt_names: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in std::iter::once(domain).chain(alt_names.iter().map(String::as_str)) {
        let mut candidates = vec![name.to_string()];
        if name.parse::<IpAddr>().is_err() {
            candidates.push(format!("*.{name}"));
        }
        for candidate in candidates {
            if !names.contains(&candidate) {
                names.push(candidate);
            }
        }
    }
    names
}

/// OpenSSL `ca` database time format, `YYMMDDHHMMSSZ`.
fn index_timestamp(at: OffsetDateTime) -> String {
    format!(
        "{:02}{:02}{:02}{:02}{:02}{:02}Z",
        at.year().rem_euclid(100),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Uppercase hex with an even number of digits, as OpenSSL writes serials.
fn format_serial(value: u64) -> String {
    let hex = format!("{value:02X}");
    if hex.len() % 2 == 1 {
        format!("0{hex}")
    } else {
        hex
    }
}

fn serial_bytes(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(bytes.len() - 1);
    bytes[first..].to_vec()
}

impl CertificateAuthority {
    fn domain_cert_path(&self, domain: &str) -> PathBuf {
        self.paths.domain_dir(domain).join(CERT_FILE)
    }

    fn domain_key_path(&self, domain: &str) -> PathBuf {
        self.paths.domain_dir(domain).join(KEY_FILE)
    }

    /// Take the next serial from the serial file and advance it.
    fn next_serial(&self) -> Result<(String, Vec<u8>)> {
        let path = self.paths.serial_path();
        let current = match fs::read_to_string(&path) {
            Ok(contents) => contents.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => INITIAL_SERIAL.to_string(),
            Err(e) => return Err(DevcertError::FileRead(path, e)),
        };
        let value = u64::from_str_radix(&current, 16).map_err(|e| {
            DevcertError::Signing(format!("Corrupt serial file {}: {e}", path.display()))
        })?;
        let next = value.checked_add(1).ok_or_else(|| {
            DevcertError::Signing(format!("Serial file {} is exhausted", path.display()))
        })?;

        fs::write(&path, format_serial(next))
            .map_err(|e| DevcertError::FileWrite(path.clone(), e))?;
        Ok((format_serial(value), serial_bytes(value)))
    }

    fn record_issued(&self, domain: &str, serial: &str, not_after: OffsetDateTime) -> Result<()> {
        let path = self.paths.index_path();
        let line = format!(
            "V\t{}\t\t{serial}\tunknown\t/CN={domain}\n",
            index_timestamp(not_after)
        );
        fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|e| DevcertError::FileWrite(path, e))
    }

    async fn load_domain_certificate(&self, domain: &str) -> Result<DomainCertificate> {
        let cert_path = self.domain_cert_path(domain);
        let key_path = self.domain_key_path(domain);
        let cert_pem = fs::read_to_string(&cert_path)
            .map_err(|e| DevcertError::FileRead(cert_path.clone(), e))?;
        let key = self.driver.read_protected(&key_path).await?;
        let key_pem = String::from_utf8(key).map_err(|_| {
            DevcertError::Signing(format!("Private key {} is not PEM", key_path.display()))
        })?;
        Ok(DomainCertificate {
            domain: domain.to_string(),
            cert_path,
            key_path,
            cert_pem,
            key_pem,
        })
    }

    /// Return the certificate for `domain`, issuing one if none is usable.
    ///
    /// The certificate covers `domain`, `*.domain` and each alternative name
    /// with its wildcard. An existing certificate that still validates is
    /// reused as is.
    pub async fn certificate_for(
        &self,
        domain: &str,
        alt_names: &[String],
        options: &DomainOptions,
    ) -> Result<DomainCertificate> {
        validate_domain(domain)?;
        for name in alt_names {
            validate_domain(name)?;
        }

        let cert_path = self.domain_cert_path(domain);
        if self.has_certificate_for(domain) && self.signer.validate_certificate(&cert_path).is_ok()
        {
            debug!(domain, "Reusing existing domain certificate");
            return self.load_domain_certificate(domain).await;
        }

        let (serial, serial_raw) = self.next_serial()?;
        let not_after =
            OffsetDateTime::now_utc() + Duration::days(i64::from(options.validity_days));
        let request = DomainRequest {
            common_name: domain.to_string(),
            subject_alt_names: subject_alt_names(domain, alt_names),
            serial: serial_raw,
            not_after,
        };
        debug!(domain, %serial, "Issuing domain certificate");
        let issued = self
            .with_ca_key_material(|ca| self.signer.sign_domain(&request, ca))
            .await?;

        let dir = self.paths.domain_dir(domain);
        fs::create_dir_all(&dir).map_err(|e| DevcertError::FileWrite(dir.clone(), e))?;
        fs::write(&cert_path, &issued.cert_pem)
            .map_err(|e| DevcertError::FileWrite(cert_path.clone(), e))?;
        let key_path = self.domain_key_path(domain);
        self.driver
            .write_protected(&key_path, issued.key_pem.as_bytes())
            .await?;
        self.record_issued(domain, &serial, not_after)?;

        Ok(DomainCertificate {
            domain: domain.to_string(),
            cert_path,
            key_path,
            cert_pem: issued.cert_pem,
            key_pem: issued.key_pem,
        })
    }

    pub fn has_certificate_for(&self, domain: &str) -> bool {
        validate_domain(domain).is_ok()
            && self.domain_cert_path(domain).exists()
            && self.domain_key_path(domain).exists()
    }

    /// Domains with stored certificates, sorted.
    pub fn configured_domains(&self) -> Result<Vec<String>> {
        let dir = self.paths.domains_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DevcertError::FileRead(dir, e)),
        };

        let mut domains: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| self.has_certificate_for(name))
            .collect();
        domains.sort();
        Ok(domains)
    }

    pub fn remove_domain(&self, domain: &str) -> Result<()> {
        validate_domain(domain)?;
        debug!(domain, "Removing domain certificate");
        self.driver.delete_protected(&self.paths.domain_dir(domain))
    }
}
